//! Registration scheduler implementation.
//!
//! Runs registrar jobs on tokio tasks:
//! - Triggered jobs: at most one per submission, bounded by a worker semaphore
//! - Manual retries: run on their own task, awaited by the caller, surfacing failures
//! - Sweep: periodic re-scheduling of failed and unfinished submissions

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::gating::GateVerdict;
use crate::metrics;
use crate::registration::{
    AttemptFailure, AttemptFailureKind, AttemptOutcome, PostSubmissionEvent, RegistrarError,
    Registrar, RetryPolicy,
};
use crate::submission::{RegistrationStatus, SubmissionFilter};

use super::config::SchedulerConfig;
use super::types::{JobKind, ScheduleOutcome, SchedulerStatus, TriggerError};

/// Upper bound on submissions one sweep query returns.
const SWEEP_BATCH_SIZE: i64 = 500;

/// How long `stop` waits for running jobs.
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct InFlight {
    kind: JobKind,
    /// Requests that arrived while the job was running, folded into one.
    rerun: Option<(JobKind, PostSubmissionEvent)>,
}

/// A submission's in-flight slot.
///
/// Dropping an unreleased claim frees the slot and starts any follow-up that
/// came in meanwhile, also when the job holding it was cancelled.
struct Claim {
    shared: Arc<Shared>,
    submission_id: String,
    kind: JobKind,
    released: bool,
}

impl Claim {
    /// Free the slot, or take the follow-up requested while the job ran.
    fn next(&mut self) -> Option<(JobKind, PostSubmissionEvent)> {
        let next = self.shared.finish(&self.submission_id);
        match next {
            Some((kind, _)) => self.kind = kind,
            None => self.released = true,
        }
        next
    }

    /// Run a job and any follow-ups requested while it ran.
    async fn drive(mut self, kind: JobKind, event: PostSubmissionEvent) {
        let mut next = Some((kind, event));
        while let Some((kind, event)) = next {
            self.shared.run_job(&self.submission_id, kind, event).await;
            next = self.next();
            if let Some((kind, event)) = next {
                debug!(
                    submission_id = %self.submission_id,
                    job = kind.as_str(),
                    trigger = %event,
                    "Running coalesced follow-up"
                );
            }
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let finished = self.kind;
        let Some((kind, event)) = self.next() else {
            return;
        };
        self.released = true;

        debug!(
            submission_id = %self.submission_id,
            job = kind.as_str(),
            "Running follow-up after {}",
            finished.as_str()
        );
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let follow_up = Claim {
                    shared: Arc::clone(&self.shared),
                    submission_id: self.submission_id.clone(),
                    kind,
                    released: false,
                };
                runtime.spawn(follow_up.drive(kind, event));
            }
            Err(_) => {
                warn!(submission_id = %self.submission_id, "No runtime left, dropping follow-up");
                self.shared.release(&self.submission_id);
            }
        }
    }
}

#[derive(Default)]
struct SweepStats {
    last_at: Option<DateTime<Utc>>,
    last_rescheduled: usize,
}

/// State shared with spawned jobs and the sweep loop.
struct Shared {
    config: SchedulerConfig,
    registrar: Arc<Registrar>,
    workers: Semaphore,
    in_flight: Mutex<HashMap<String, InFlight>>,
    sweeps: AtomicU64,
    sweep_stats: RwLock<SweepStats>,
}

/// Schedules and deduplicates registration work.
pub struct RegistrationScheduler {
    shared: Arc<Shared>,
    audit: Option<AuditHandle>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RegistrationScheduler {
    /// Create a new scheduler. Nothing runs until a job is scheduled or
    /// [`start`](Self::start) is called.
    pub fn new(
        config: SchedulerConfig,
        registrar: Arc<Registrar>,
        audit: Option<AuditHandle>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let workers = Semaphore::new(config.max_concurrent_jobs.max(1));

        Self {
            shared: Arc::new(Shared {
                config,
                registrar,
                workers,
                in_flight: Mutex::new(HashMap::new()),
                sweeps: AtomicU64::new(0),
                sweep_stats: RwLock::new(SweepStats::default()),
            }),
            audit,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn registrar(&self) -> &Arc<Registrar> {
        &self.shared.registrar
    }

    /// Schedule pre-registration of a completed submission.
    pub fn schedule_pre_registration(&self, submission_id: &str) -> ScheduleOutcome {
        self.shared.enqueue(
            JobKind::PreRegistration,
            submission_id,
            PostSubmissionEvent::OnCompletion,
            true,
        )
    }

    /// Schedule a registration attempt.
    pub fn schedule_registration(
        &self,
        submission_id: &str,
        event: PostSubmissionEvent,
    ) -> ScheduleOutcome {
        self.shared
            .enqueue(JobKind::Registration, submission_id, event, true)
    }

    /// Schedule pre-registration followed by registration.
    pub fn schedule_post_submission(
        &self,
        submission_id: &str,
        event: PostSubmissionEvent,
    ) -> ScheduleOutcome {
        self.shared
            .enqueue(JobKind::PostSubmission, submission_id, event, true)
    }

    /// Retry a submission now, on behalf of an operator.
    ///
    /// Pre-registers first when needed. Failures are returned, and the
    /// attempt limit does not apply. The attempt runs on its own task, so
    /// it finishes even if the caller stops waiting.
    pub async fn retry_now(
        &self,
        submission_id: &str,
        requested_by: &str,
    ) -> Result<AttemptOutcome, TriggerError> {
        let claim = self.shared.claim(submission_id, JobKind::ManualRetry)?;

        info!(submission_id, requested_by, "Manual retry requested");
        let audit = self.audit.clone();
        let requested_by = requested_by.to_string();
        self.shared
            .run_detached(claim, move |registrar, submission_id| async move {
                if let Some(audit) = audit {
                    audit
                        .emit(AuditEvent::RetryRequested {
                            submission_id: submission_id.clone(),
                            requested_by,
                        })
                        .await;
                }
                registrar
                    .process_submission(
                        &submission_id,
                        PostSubmissionEvent::OnRetry,
                        RetryPolicy::Surface,
                    )
                    .await
            })
            .await
    }

    /// Tell the backend about a payment on an already registered submission.
    pub async fn update_payment_status(&self, submission_id: &str) -> Result<bool, TriggerError> {
        let claim = self.shared.claim(submission_id, JobKind::PaymentStatus)?;

        self.shared
            .run_detached(claim, |registrar, submission_id| async move {
                registrar.update_payment_status(&submission_id).await
            })
            .await
    }

    /// Whether a job for this submission is running or waiting.
    pub fn is_in_flight(&self, submission_id: &str) -> bool {
        self.shared.lock_in_flight().contains_key(submission_id)
    }

    /// Wait until no jobs are in flight. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.shared.lock_in_flight().is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Start the sweep loop (spawns a background task).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        info!("Starting registration scheduler");

        // Attempts that were running when we shut down
        self.recover_interrupted_attempts();

        if self.shared.config.enabled {
            self.spawn_sweep_loop();
        } else {
            info!("Retry sweep disabled");
        }

        info!("Registration scheduler started");
    }

    /// Stop the sweep loop and wait briefly for running jobs.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }

        info!("Stopping registration scheduler");

        // Signal shutdown to the sweep loop
        let _ = self.shutdown_tx.send(());

        if !self.wait_idle(STOP_DRAIN_TIMEOUT).await {
            warn!(
                in_flight = self.shared.lock_in_flight().len(),
                "Stopped with jobs still running"
            );
        }

        info!("Registration scheduler stopped");
    }

    /// Run one sweep now. Returns the number of submissions re-scheduled.
    pub async fn sweep(&self) -> usize {
        self.shared.sweep().await
    }

    /// Get current scheduler status.
    pub async fn status(&self) -> SchedulerStatus {
        let stats = self.shared.sweep_stats.read().await;
        SchedulerStatus {
            running: self.running.load(Ordering::Relaxed),
            in_flight: self.shared.lock_in_flight().len(),
            available_workers: self.shared.workers.available_permits(),
            max_concurrent_jobs: self.shared.config.max_concurrent_jobs,
            sweeps_completed: self.shared.sweeps.load(Ordering::Relaxed),
            last_sweep_at: stats.last_at,
            last_sweep_rescheduled: stats.last_rescheduled,
        }
    }

    /// Re-schedule submissions left `InProgress` by a previous run.
    fn recover_interrupted_attempts(&self) {
        let filter = SubmissionFilter::new()
            .with_status(RegistrationStatus::InProgress)
            .with_limit(SWEEP_BATCH_SIZE);

        match self.shared.registrar.store().list(&filter) {
            Ok(submissions) => {
                let mut recovered = 0;
                for submission in submissions {
                    if self.is_in_flight(&submission.id) {
                        continue;
                    }
                    self.schedule_registration(&submission.id, PostSubmissionEvent::OnRetry);
                    info!(submission_id = %submission.id, "Recovered interrupted registration attempt");
                    recovered += 1;
                }
                if recovered > 0 {
                    info!("Recovered {} interrupted registration attempts", recovered);
                }
            }
            Err(e) => {
                error!("Failed to recover interrupted registration attempts: {}", e);
            }
        }
    }

    /// Spawn the sweep loop task.
    fn spawn_sweep_loop(&self) {
        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        let interval = Duration::from_millis(shared.config.sweep_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Sweep loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Sweep loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        shared.sweep().await;
                    }
                }
            }
            info!("Sweep loop stopped");
        });
    }
}

impl Shared {
    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight.lock().unwrap()
    }

    /// Register a job for the submission unless one is already running.
    fn claim(
        self: &Arc<Self>,
        submission_id: &str,
        kind: JobKind,
    ) -> Result<Claim, TriggerError> {
        let mut in_flight = self.lock_in_flight();
        if let Some(existing) = in_flight.get(submission_id) {
            debug!(
                submission_id,
                running = existing.kind.as_str(),
                requested = kind.as_str(),
                "Submission already in flight"
            );
            return Err(TriggerError::AlreadyInFlight(submission_id.to_string()));
        }
        in_flight.insert(submission_id.to_string(), InFlight { kind, rerun: None });
        metrics::JOBS_IN_FLIGHT.inc();
        Ok(Claim {
            shared: Arc::clone(self),
            submission_id: submission_id.to_string(),
            kind,
            released: false,
        })
    }

    /// Release the claim, or hand back the follow-up request if one came in.
    fn finish(&self, submission_id: &str) -> Option<(JobKind, PostSubmissionEvent)> {
        let mut in_flight = self.lock_in_flight();
        let next = in_flight
            .get_mut(submission_id)
            .and_then(|entry| {
                let next = entry.rerun.take();
                if let Some((kind, _)) = next {
                    entry.kind = kind;
                }
                next
            });
        if next.is_none() && in_flight.remove(submission_id).is_some() {
            metrics::JOBS_IN_FLIGHT.dec();
        }
        next
    }

    /// Drop the claim together with any follow-up.
    fn release(&self, submission_id: &str) {
        if self.lock_in_flight().remove(submission_id).is_some() {
            metrics::JOBS_IN_FLIGHT.dec();
        }
    }

    /// Schedule a job. With `coalesce`, a request for a submission that is
    /// already in flight is remembered and run once the current job ends.
    fn enqueue(
        self: &Arc<Self>,
        kind: JobKind,
        submission_id: &str,
        event: PostSubmissionEvent,
        coalesce: bool,
    ) -> ScheduleOutcome {
        {
            let mut in_flight = self.lock_in_flight();
            if let Some(entry) = in_flight.get_mut(submission_id) {
                if coalesce {
                    entry.rerun = Some(match entry.rerun {
                        Some((pending_kind, pending_event)) => {
                            (pending_kind.merge(kind), pending_event.merge(event))
                        }
                        None => (kind, event),
                    });
                }
                metrics::JOBS_DEDUPLICATED.inc();
                debug!(submission_id, job = kind.as_str(), coalesce, "Job already in flight");
                return ScheduleOutcome::AlreadyInFlight;
            }
            in_flight.insert(submission_id.to_string(), InFlight { kind, rerun: None });
        }
        metrics::JOBS_IN_FLIGHT.inc();

        debug!(submission_id, job = kind.as_str(), trigger = %event, "Job enqueued");
        let claim = Claim {
            shared: Arc::clone(self),
            submission_id: submission_id.to_string(),
            kind,
            released: false,
        };
        tokio::spawn(claim.drive(kind, event));
        ScheduleOutcome::Enqueued
    }

    /// Run a scheduled job. Failures are persisted by the registrar and
    /// only logged here.
    async fn run_job(&self, submission_id: &str, kind: JobKind, event: PostSubmissionEvent) {
        let Ok(_permit) = self.workers.acquire().await else {
            warn!(submission_id, "Worker pool closed, dropping job");
            return;
        };

        let job = async {
            let outcome = match kind {
                JobKind::PreRegistration => {
                    self.registrar
                        .pre_register(submission_id, event, RetryPolicy::Swallow)
                        .await?;
                    return Ok(());
                }
                JobKind::PaymentStatus => {
                    self.registrar.update_payment_status(submission_id).await?;
                    return Ok(());
                }
                JobKind::Registration => {
                    self.registrar
                        .register(submission_id, event, RetryPolicy::Swallow)
                        .await?
                }
                JobKind::PostSubmission | JobKind::ManualRetry => {
                    self.registrar
                        .process_submission(submission_id, event, RetryPolicy::Swallow)
                        .await?
                }
            };

            // A payment on an already registered submission still has to
            // reach the backend.
            if event == PostSubmissionEvent::OnPaymentComplete
                && matches!(
                    outcome,
                    AttemptOutcome::Skipped {
                        verdict: GateVerdict::SkipAlreadyDone
                    }
                )
            {
                self.registrar.update_payment_status(submission_id).await?;
            }
            Ok::<(), RegistrarError>(())
        };

        match AssertUnwindSafe(job).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(submission_id, job = kind.as_str(), error = %e, "Scheduled job failed");
            }
            Err(_) => {
                error!(submission_id, job = kind.as_str(), "Scheduled job panicked");
            }
        }
    }

    /// Run work for a claim on its own task and wait for the result.
    ///
    /// The claim is released when the task ends, whether or not anyone is
    /// still waiting for it.
    async fn run_detached<T, F, Fut>(
        self: &Arc<Self>,
        claim: Claim,
        work: F,
    ) -> Result<T, TriggerError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Registrar>, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RegistrarError>> + Send + 'static,
    {
        let kind = claim.kind;
        let submission_id = claim.submission_id.clone();
        let shared = Arc::clone(self);

        let task = tokio::spawn(async move {
            let result = {
                let _permit = shared.workers.acquire().await;
                let work = work(Arc::clone(&shared.registrar), claim.submission_id.clone());
                AssertUnwindSafe(work).catch_unwind().await
            };
            // Release after the permit so a follow-up can get a worker.
            drop(claim);
            result
        });

        let failure = match task.await {
            Ok(Ok(result)) => return Ok(result?),
            Ok(Err(_)) => format!("{} panicked", kind.as_str()),
            Err(e) => format!("{} did not finish: {}", kind.as_str(), e),
        };
        error!(submission_id = %submission_id, job = kind.as_str(), "{}", failure);
        Err(TriggerError::Registrar(RegistrarError::Attempt(AttemptFailure::new(
            AttemptFailureKind::Unexpected,
            failure,
        ))))
    }

    async fn sweep(self: &Arc<Self>) -> usize {
        let config = self.registrar.config();
        let window_start =
            Utc::now() - chrono::Duration::hours(self.config.sweep_window_hours as i64);
        let store = self.registrar.store();

        let failed = SubmissionFilter::new()
            .with_status(RegistrationStatus::Failed)
            .with_completed_after(window_start)
            .with_attempts_below(config.attempt_limit)
            .with_limit(SWEEP_BATCH_SIZE);
        let unfinished = SubmissionFilter::new()
            .with_completed(true)
            .with_pre_registration_completed(false)
            .with_completed_after(window_start)
            .with_limit(SWEEP_BATCH_SIZE);

        let mut candidates = BTreeSet::new();
        for filter in [&failed, &unfinished] {
            match store.list(filter) {
                Ok(submissions) => candidates.extend(submissions.into_iter().map(|s| s.id)),
                Err(e) => error!("Sweep query failed: {}", e),
            }
        }

        let mut rescheduled = 0;
        for submission_id in &candidates {
            let outcome = self.enqueue(
                JobKind::PostSubmission,
                submission_id,
                PostSubmissionEvent::OnRetry,
                false,
            );
            if outcome == ScheduleOutcome::Enqueued {
                rescheduled += 1;
            }
        }

        self.sweeps.fetch_add(1, Ordering::Relaxed);
        {
            let mut stats = self.sweep_stats.write().await;
            stats.last_at = Some(Utc::now());
            stats.last_rescheduled = rescheduled;
        }
        metrics::SWEEP_RUNS.inc();
        metrics::SWEEP_RESCHEDULED.inc_by(rescheduled as u64);

        if rescheduled > 0 {
            info!(rescheduled, candidates = candidates.len(), "Sweep re-scheduled submissions");
        } else {
            debug!("Sweep found nothing to retry");
        }
        rescheduled
    }
}
