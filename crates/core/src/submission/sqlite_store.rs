//! SQLite-backed submission store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::{
    CreateSubmissionRequest, PreRegistrationUpdate, RegistrationResultRecord, RegistrationStatus,
    ResultUpdate, Submission, SubmissionError, SubmissionFilter, SubmissionStore,
};

const COLUMNS: &str = "id, form_name, created_at, completed_on, pre_registration_completed, \
     public_registration_reference, registration_status, registration_attempts, \
     registration_result, cosign, payment, last_register_date, registration_backend, updated_at";

/// SQLite-backed submission store.
pub struct SqliteSubmissionStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> SubmissionError {
    SubmissionError::Database(e.to_string())
}

/// Fixed-width UTC timestamps so stored values sort and compare as text.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, SubmissionError> {
    serde_json::to_string(value).map_err(db_err)
}

fn from_json<T: DeserializeOwned>(value: Option<String>) -> Option<T> {
    value.and_then(|json| serde_json::from_str(&json).ok())
}

/// Decode a JSON column that must not silently fall back to a default.
fn required_json<T: DeserializeOwned>(column: usize, json: String) -> rusqlite::Result<T> {
    serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl SqliteSubmissionStore {
    /// Create a new SQLite submission store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, SubmissionError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite submission store (useful for testing).
    pub fn in_memory() -> Result<Self, SubmissionError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), SubmissionError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS submissions (
                id TEXT PRIMARY KEY,
                form_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed_on TEXT,
                pre_registration_completed INTEGER NOT NULL DEFAULT 0,
                public_registration_reference TEXT,
                registration_status TEXT NOT NULL DEFAULT 'not_started',
                registration_attempts INTEGER NOT NULL DEFAULT 0,
                registration_result TEXT NOT NULL DEFAULT '{}',
                cosign TEXT,
                payment TEXT NOT NULL,
                last_register_date TEXT,
                registration_backend TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_reference
                ON submissions(public_registration_reference);
            CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(registration_status);
            CREATE INDEX IF NOT EXISTS idx_submissions_completed_on ON submissions(completed_on);
            "#,
        )
        .map_err(db_err)
    }

    fn build_where_clause(filter: &SubmissionFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("registration_status = ?");
            params.push(Box::new(status.as_str()));
        }

        match filter.completed {
            Some(true) => conditions.push("completed_on IS NOT NULL"),
            Some(false) => conditions.push("completed_on IS NULL"),
            None => {}
        }

        if let Some(done) = filter.pre_registration_completed {
            conditions.push("pre_registration_completed = ?");
            params.push(Box::new(done));
        }

        if let Some(after) = filter.completed_after {
            conditions.push("completed_on >= ?");
            params.push(Box::new(timestamp(&after)));
        }

        if let Some(limit) = filter.attempts_below {
            conditions.push("registration_attempts < ?");
            params.push(Box::new(limit));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_submission(row: &rusqlite::Row) -> rusqlite::Result<Submission> {
        let created_at: String = row.get(2)?;
        let completed_on: Option<String> = row.get(3)?;
        let status: String = row.get(6)?;
        let last_register_date: Option<String> = row.get(11)?;
        let registration_result: String = row.get(8)?;
        let updated_at: String = row.get(13)?;

        Ok(Submission {
            id: row.get(0)?,
            form_name: row.get(1)?,
            created_at: parse_timestamp(&created_at),
            completed_on: completed_on.as_deref().map(parse_timestamp),
            pre_registration_completed: row.get(4)?,
            public_registration_reference: row.get(5)?,
            registration_status: RegistrationStatus::parse(&status).unwrap_or_default(),
            registration_attempts: row.get(7)?,
            registration_result: required_json(8, registration_result)?,
            cosign: from_json(row.get(9)?),
            payment: from_json(row.get(10)?).unwrap_or_default(),
            last_register_date: last_register_date.as_deref().map(parse_timestamp),
            registration_backend: from_json(row.get(12)?),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Submission, SubmissionError> {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM submissions WHERE id = ?"),
            params![id],
            Self::row_to_submission,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| SubmissionError::NotFound(id.to_string()))
    }

    /// Write back every mutable column of `submission`.
    fn save(conn: &Connection, submission: &Submission) -> Result<(), SubmissionError> {
        conn.execute(
            "UPDATE submissions SET completed_on = ?, pre_registration_completed = ?, \
             public_registration_reference = ?, registration_status = ?, \
             registration_attempts = ?, registration_result = ?, cosign = ?, payment = ?, \
             last_register_date = ?, updated_at = ? WHERE id = ?",
            params![
                submission.completed_on.as_ref().map(timestamp),
                submission.pre_registration_completed,
                submission.public_registration_reference,
                submission.registration_status.as_str(),
                submission.registration_attempts,
                to_json(&submission.registration_result)?,
                submission.cosign.as_ref().map(to_json).transpose()?,
                to_json(&submission.payment)?,
                submission.last_register_date.as_ref().map(timestamp),
                timestamp(&submission.updated_at),
                submission.id,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Fetch, mutate and write back a submission inside one transaction.
    fn modify<F>(&self, id: &str, f: F) -> Result<Submission, SubmissionError>
    where
        F: FnOnce(&mut Submission) -> Result<(), SubmissionError>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;

        let mut submission = Self::fetch(&tx, id)?;
        f(&mut submission)?;
        submission.updated_at = Utc::now();
        Self::save(&tx, &submission)?;

        tx.commit().map_err(db_err)?;
        Ok(submission)
    }
}

impl SubmissionStore for SqliteSubmissionStore {
    fn create(&self, request: CreateSubmissionRequest) -> Result<Submission, SubmissionError> {
        let conn = self.conn.lock().unwrap();

        let now = Utc::now();
        let submission = Submission {
            id: uuid::Uuid::new_v4().to_string(),
            form_name: request.form_name,
            created_at: now,
            completed_on: None,
            pre_registration_completed: false,
            public_registration_reference: None,
            registration_status: RegistrationStatus::NotStarted,
            registration_attempts: 0,
            registration_result: RegistrationResultRecord::default(),
            cosign: request.cosign,
            payment: request.payment,
            last_register_date: None,
            registration_backend: request.registration_backend,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO submissions (id, form_name, created_at, registration_status, \
             registration_result, cosign, payment, registration_backend, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                submission.id,
                submission.form_name,
                timestamp(&now),
                submission.registration_status.as_str(),
                to_json(&submission.registration_result)?,
                submission.cosign.as_ref().map(to_json).transpose()?,
                to_json(&submission.payment)?,
                submission
                    .registration_backend
                    .as_ref()
                    .map(to_json)
                    .transpose()?,
                timestamp(&now),
            ],
        )
        .map_err(db_err)?;

        Ok(submission)
    }

    fn get(&self, id: &str) -> Result<Option<Submission>, SubmissionError> {
        let conn = self.conn.lock().unwrap();

        match Self::fetch(&conn, id) {
            Ok(submission) => Ok(Some(submission)),
            Err(SubmissionError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>, SubmissionError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {COLUMNS} FROM submissions {where_clause} \
             ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?"
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        let mut all_params = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_submission)
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn count(&self, filter: &SubmissionFilter) -> Result<i64, SubmissionError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM submissions {where_clause}");
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn mark_completed(
        &self,
        id: &str,
        completed_on: DateTime<Utc>,
    ) -> Result<Submission, SubmissionError> {
        self.modify(id, |submission| {
            submission.completed_on.get_or_insert(completed_on);
            Ok(())
        })
    }

    fn record_cosign(
        &self,
        id: &str,
        signed_on: DateTime<Utc>,
    ) -> Result<Submission, SubmissionError> {
        self.modify(id, |submission| match submission.cosign.as_mut() {
            Some(cosign) if cosign.required => {
                cosign.signed_on.get_or_insert(signed_on);
                Ok(())
            }
            _ => Err(SubmissionError::invalid_state(
                id,
                "cosign",
                "no co-sign is required",
            )),
        })
    }

    fn record_payment(&self, id: &str) -> Result<Submission, SubmissionError> {
        self.modify(id, |submission| {
            if !submission.payment.required {
                return Err(SubmissionError::invalid_state(
                    id,
                    "record payment for",
                    "no payment is required",
                ));
            }
            submission.payment.user_has_paid = true;
            Ok(())
        })
    }

    fn mark_payment_registered(&self, id: &str) -> Result<Submission, SubmissionError> {
        self.modify(id, |submission| {
            submission.payment.registered = true;
            Ok(())
        })
    }

    fn reference_exists(&self, reference: &str) -> Result<bool, SubmissionError> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM submissions WHERE public_registration_reference = ?)",
            params![reference],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    fn remember_temporary_reference(&self, id: &str) -> Result<Submission, SubmissionError> {
        self.modify(id, |submission| {
            if let Some(reference) = submission.public_registration_reference.clone() {
                submission.registration_result.temporary_internal_reference = Some(reference);
            }
            Ok(())
        })
    }

    fn complete_pre_registration(
        &self,
        id: &str,
        update: PreRegistrationUpdate,
    ) -> Result<Submission, SubmissionError> {
        self.modify(id, |submission| {
            if submission.pre_registration_completed {
                return Err(SubmissionError::invalid_state(
                    id,
                    "pre-register",
                    "pre-registration already completed",
                ));
            }

            let reference = submission
                .public_registration_reference
                .take()
                .or(update.plugin_reference)
                .or(update.fallback_reference)
                .ok_or_else(|| {
                    SubmissionError::invalid_state(id, "pre-register", "no reference available")
                })?;

            submission.public_registration_reference = Some(reference);
            submission.registration_result.apply(ResultUpdate::Success {
                payload: update.payload,
            });
            submission.pre_registration_completed = true;
            Ok(())
        })
    }

    fn fail_pre_registration(
        &self,
        id: &str,
        fallback_reference: Option<String>,
        trace: String,
    ) -> Result<Submission, SubmissionError> {
        self.modify(id, |submission| {
            if !submission
                .registration_status
                .can_transition_to(RegistrationStatus::Failed)
            {
                return Err(SubmissionError::invalid_state(
                    id,
                    "fail pre-registration of",
                    format!("status is {}", submission.registration_status),
                ));
            }

            if submission.public_registration_reference.is_none() {
                submission.public_registration_reference = fallback_reference;
            }
            submission.registration_status = RegistrationStatus::Failed;
            submission
                .registration_result
                .apply(ResultUpdate::Failure { trace });
            Ok(())
        })
    }

    fn begin_attempt(
        &self,
        id: &str,
        expected_attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Result<Option<Submission>, SubmissionError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn
            .execute(
                "UPDATE submissions SET registration_status = ?, \
                 registration_attempts = registration_attempts + 1, \
                 last_register_date = ?, updated_at = ? \
                 WHERE id = ? AND registration_attempts = ? AND registration_status != ?",
                params![
                    RegistrationStatus::InProgress.as_str(),
                    timestamp(&started_at),
                    timestamp(&Utc::now()),
                    id,
                    expected_attempts,
                    RegistrationStatus::Success.as_str(),
                ],
            )
            .map_err(db_err)?;

        let submission = Self::fetch(&conn, id)?;
        Ok((changed == 1).then_some(submission))
    }

    fn save_result_value(
        &self,
        id: &str,
        key: &str,
        value: Value,
    ) -> Result<Submission, SubmissionError> {
        self.modify(id, |submission| {
            submission
                .registration_result
                .plugin_payload
                .insert(key.to_string(), value);
            Ok(())
        })
    }

    fn save_registration_status(
        &self,
        id: &str,
        status: RegistrationStatus,
        update: ResultUpdate,
    ) -> Result<Submission, SubmissionError> {
        self.modify(id, |submission| {
            if !submission.registration_status.can_transition_to(status) {
                return Err(SubmissionError::invalid_state(
                    id,
                    "update status of",
                    format!("{} -> {} not allowed", submission.registration_status, status),
                ));
            }

            submission.registration_status = status;
            submission.registration_result.apply(update);
            Ok(())
        })
    }
}
