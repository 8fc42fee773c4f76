use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Background task that receives audit events and writes them to storage
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Consume events until every `AuditHandle` has been dropped.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord::new(envelope.timestamp, envelope.event);

            if let Err(e) = self.store.insert(&record) {
                tracing::error!(event_type = %record.event_type, "Failed to write audit event: {}", e);
            }
        }

        tracing::info!("Audit writer shutting down");
    }
}

/// Create a complete audit system
///
/// Returns the `AuditHandle` to clone into components and the `AuditWriter`
/// to spawn with `tokio::spawn(writer.run())`. Emitters wait once
/// `buffer_size` events are queued.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use crate::audit::{AuditError, AuditEvent, AuditFilter, SkipReason};

    /// Store that keeps records in memory, optionally failing every insert.
    struct RecordingStore {
        records: Mutex<Vec<AuditRecord>>,
        should_fail: bool,
    }

    impl RecordingStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
                should_fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
                should_fail: true,
            })
        }

        fn records(&self) -> Vec<AuditRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl AuditStore for RecordingStore {
        fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
            if self.should_fail {
                return Err(AuditError::Database("Mock failure".to_string()));
            }
            let mut records = self.records.lock().unwrap();
            let id = records.len() as i64 + 1;
            let mut stored = record.clone();
            stored.id = id;
            records.push(stored);
            Ok(id)
        }

        fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(self.records())
        }

        fn count(&self, _filter: &AuditFilter) -> Result<i64, AuditError> {
            Ok(self.records.lock().unwrap().len() as i64)
        }

        fn outcome_counts(
            &self,
            _filter: &AuditFilter,
        ) -> Result<BTreeMap<String, i64>, AuditError> {
            let mut counts = BTreeMap::new();
            for record in self.records() {
                if let Some(outcome) = record.outcome {
                    *counts.entry(outcome).or_insert(0) += 1;
                }
            }
            Ok(counts)
        }
    }

    fn system(store: &Arc<RecordingStore>) -> (AuditHandle, AuditWriter) {
        let store_dyn: Arc<dyn AuditStore> = Arc::clone(store) as Arc<dyn AuditStore>;
        create_audit_system(store_dyn, 16)
    }

    #[tokio::test]
    async fn test_writer_extracts_submission_and_actor() {
        let store = RecordingStore::new();
        let (handle, writer) = system(&store);
        let writer_task = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::RetryRequested {
                submission_id: "sub-123".to_string(),
                requested_by: "admin".to_string(),
            })
            .await;
        drop(handle);
        writer_task.await.unwrap();

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "retry_requested");
        assert_eq!(records[0].submission_id.as_deref(), Some("sub-123"));
        assert_eq!(records[0].actor.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_writer_extracts_plugin_and_outcome() {
        let store = RecordingStore::new();
        let (handle, writer) = system(&store);
        let writer_task = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::RegistrationFailed {
                submission_id: "sub-7".to_string(),
                plugin: Some("email".to_string()),
                attempt: 1,
                kind: "invalid_options".to_string(),
                error: "missing to_emails".to_string(),
            })
            .await;
        drop(handle);
        writer_task.await.unwrap();

        let records = store.records();
        assert_eq!(records[0].plugin.as_deref(), Some("email"));
        assert_eq!(records[0].outcome.as_deref(), Some("invalid_options"));
        assert_eq!(records[0].actor, None);
    }

    #[tokio::test]
    async fn test_writer_continues_on_insert_failure() {
        let store = RecordingStore::failing();
        let (handle, writer) = system(&store);
        let writer_task = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::ServiceStopped {
                reason: "test".to_string(),
            })
            .await;
        drop(handle);

        writer_task.await.unwrap();
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles_to_drop() {
        let store = RecordingStore::new();
        let (main_handle, writer) = system(&store);
        let scheduler_handle = main_handle.clone();
        let writer_task = tokio::spawn(writer.run());

        scheduler_handle
            .emit(AuditEvent::RegistrationSkipped {
                submission_id: "s-1".to_string(),
                reason: SkipReason::PaymentPending,
            })
            .await;
        main_handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;

        drop(main_handle);
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert!(
            !writer_task.is_finished(),
            "Writer should still be running with handles alive"
        );

        drop(scheduler_handle);
        let result = tokio::time::timeout(tokio::time::Duration::from_secs(1), writer_task).await;
        assert!(result.is_ok(), "Writer should exit after all handles dropped");

        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_type, "registration_skipped");
        assert_eq!(records[1].event_type, "service_stopped");
    }
}
