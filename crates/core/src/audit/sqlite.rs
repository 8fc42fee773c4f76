use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use super::{AuditError, AuditEvent, AuditFilter, AuditOrder, AuditRecord, AuditStore};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        submission_id TEXT,
        plugin TEXT,
        outcome TEXT,
        actor TEXT,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_events_submission_id
        ON audit_events(submission_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
    CREATE INDEX IF NOT EXISTS idx_audit_events_plugin_outcome ON audit_events(plugin, outcome);
"#;

const COLUMNS: &str = "id, timestamp, event_type, submission_id, plugin, outcome, actor, data";

fn db_err(e: rusqlite::Error) -> AuditError {
    AuditError::Database(e.to_string())
}

type Params = Vec<Box<dyn rusqlite::ToSql>>;

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed audit store
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Create a new SQLite audit store, creating the database file and tables if needed
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Self::with_connection(Connection::open(path).map_err(db_err)?)
    }

    /// Create an in-memory SQLite audit store (useful for testing)
    pub fn in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conditions(filter: &AuditFilter) -> (Vec<String>, Params) {
        let mut conditions = Vec::new();
        let mut params: Params = Vec::new();

        let mut exact = |column: &str, value: &Option<String>| {
            if let Some(value) = value {
                conditions.push(format!("{} = ?", column));
                params.push(Box::new(value.clone()));
            }
        };
        exact("submission_id", &filter.submission_id);
        exact("plugin", &filter.plugin);
        exact("outcome", &filter.outcome);
        exact("actor", &filter.actor);

        if !filter.event_types.is_empty() {
            let placeholders = vec!["?"; filter.event_types.len()].join(", ");
            conditions.push(format!("event_type IN ({})", placeholders));
            for event_type in &filter.event_types {
                params.push(Box::new(event_type.clone()));
            }
        }

        if let Some(ref since) = filter.since {
            conditions.push("timestamp >= ?".to_string());
            params.push(Box::new(timestamp(since)));
        }

        if let Some(ref until) = filter.until {
            conditions.push("timestamp <= ?".to_string());
            params.push(Box::new(timestamp(until)));
        }

        (conditions, params)
    }

    fn where_clause(conditions: &[String]) -> String {
        if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        }
    }

    fn decode(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<AuditRecord, AuditError>> {
        let timestamp_str: String = row.get(1)?;
        let data_json: String = row.get(7)?;

        let timestamp = match DateTime::parse_from_rfc3339(&timestamp_str) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => return Ok(Err(AuditError::Database(format!("Invalid timestamp: {}", e)))),
        };
        let data: AuditEvent = match serde_json::from_str(&data_json) {
            Ok(data) => data,
            Err(e) => return Ok(Err(AuditError::Serialization(e.to_string()))),
        };

        Ok(Ok(AuditRecord {
            id: row.get(0)?,
            timestamp,
            event_type: row.get(2)?,
            submission_id: row.get(3)?,
            plugin: row.get(4)?,
            outcome: row.get(5)?,
            actor: row.get(6)?,
            data,
        }))
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let conn = self.conn.lock().unwrap();

        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO audit_events (timestamp, event_type, submission_id, plugin, outcome, actor, data)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                timestamp(&record.timestamp),
                record.event_type,
                record.submission_id,
                record.plugin,
                record.outcome,
                record.actor,
                data_json,
            ],
        )
        .map_err(db_err)?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.conn.lock().unwrap();

        let (conditions, mut params) = Self::conditions(filter);
        let order = match filter.order {
            AuditOrder::NewestFirst => "timestamp DESC, id DESC",
            AuditOrder::OldestFirst => "timestamp ASC, id ASC",
        };
        let sql = format!(
            "SELECT {} FROM audit_events {} ORDER BY {} LIMIT ? OFFSET ?",
            COLUMNS,
            Self::where_clause(&conditions),
            order
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::decode)
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db_err)??);
        }

        Ok(records)
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.conn.lock().unwrap();

        let (conditions, params) = Self::conditions(filter);
        let sql = format!(
            "SELECT COUNT(*) FROM audit_events {}",
            Self::where_clause(&conditions)
        );
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn outcome_counts(&self, filter: &AuditFilter) -> Result<BTreeMap<String, i64>, AuditError> {
        let conn = self.conn.lock().unwrap();

        let (mut conditions, params) = Self::conditions(filter);
        conditions.push("outcome IS NOT NULL".to_string());
        let sql = format!(
            "SELECT outcome, COUNT(*) FROM audit_events {} GROUP BY outcome",
            Self::where_clause(&conditions)
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(db_err)?;

        rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(db_err)
    }
}
