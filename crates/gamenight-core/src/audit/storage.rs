//! `SQLite`-backed audit trail storage.

// SQLite returns i64 for row IDs and counts, but they're always non-negative.
// Timestamps won't overflow u64 until the year 2554.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OpenFlags, Row, params};
use thiserror::Error;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors that can occur during audit trail operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuditError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found.
    #[error("audit record not found: seq_id={seq_id}")]
    RecordNotFound {
        /// The sequence ID that was not found.
        seq_id: u64,
    },
}

/// A single record in the audit trail.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Sequence ID (assigned by the log on append).
    pub seq_id: Option<u64>,

    /// Event type identifier, e.g. `registration.signed_up`.
    pub event_type: String,

    /// The session this record concerns.
    pub session_id: String,

    /// Who performed the action (player ID, admin handle, or `system`).
    pub actor: String,

    /// The registration or other entity this record relates to.
    pub related_id: String,

    /// JSON event payload.
    pub payload: Vec<u8>,

    /// Timestamp in nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
}

impl AuditRecord {
    /// Creates a new record with the current timestamp.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        session_id: impl Into<String>,
        actor: impl Into<String>,
        related_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_timestamp(event_type, session_id, actor, related_id, payload, timestamp_ns)
    }

    /// Creates a new record with a specific timestamp.
    #[must_use]
    pub fn with_timestamp(
        event_type: impl Into<String>,
        session_id: impl Into<String>,
        actor: impl Into<String>,
        related_id: impl Into<String>,
        payload: Vec<u8>,
        timestamp_ns: u64,
    ) -> Self {
        Self {
            seq_id: None,
            event_type: event_type.into(),
            session_id: session_id.into(),
            actor: actor.into(),
            related_id: related_id.into(),
            payload,
            timestamp_ns,
        }
    }

    /// Sets the sequence ID (builder pattern).
    #[must_use]
    pub const fn with_seq_id(mut self, seq_id: u64) -> Self {
        self.seq_id = Some(seq_id);
        self
    }
}

/// Statistics about the audit trail.
#[derive(Debug, Clone, Default)]
pub struct AuditStats {
    /// Total number of records.
    pub record_count: u64,

    /// Highest sequence ID (0 if empty).
    pub max_seq_id: u64,
}

/// The append-only audit trail backed by `SQLite`.
///
/// Uses WAL mode so reads proceed while a write is in progress. Records get
/// monotonically increasing sequence numbers and can never be modified or
/// deleted; triggers in the schema reject updates and deletes outright.
#[derive(Clone)]
pub struct AuditLog {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLog {
    /// Opens or creates an audit log at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory audit log for small deployments and tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Appends a record and returns its assigned sequence ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be inserted.
    pub fn append(&self, record: &AuditRecord) -> Result<u64, AuditError> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.execute(
            "INSERT INTO audit_log (event_type, session_id, actor, related_id, payload, timestamp_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.event_type,
                record.session_id,
                record.actor,
                record.related_id,
                record.payload,
                record.timestamp_ns,
            ],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    /// Reads records with sequence IDs >= `cursor`, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn read_from(&self, cursor: u64, limit: u64) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT seq_id, event_type, session_id, actor, related_id, payload, timestamp_ns
             FROM audit_log
             WHERE seq_id >= ?1
             ORDER BY seq_id ASC
             LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![cursor, limit], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Reads every record for one session, in sequence order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn read_session(
        &self,
        session_id: &str,
        limit: u64,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT seq_id, event_type, session_id, actor, related_id, payload, timestamp_ns
             FROM audit_log
             WHERE session_id = ?1
             ORDER BY seq_id ASC
             LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![session_id, limit], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Reads a single record by sequence ID.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if no record exists with that sequence ID.
    pub fn read_one(&self, seq_id: u64) -> Result<AuditRecord, AuditError> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT seq_id, event_type, session_id, actor, related_id, payload, timestamp_ns
             FROM audit_log
             WHERE seq_id = ?1",
        )?;
        stmt.query_row(params![seq_id], row_to_record)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => AuditError::RecordNotFound { seq_id },
                other => AuditError::Database(other),
            })
    }

    /// Returns the highest sequence ID, or 0 if the log is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn head(&self) -> Result<u64, AuditError> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let max: Option<i64> =
            conn.query_row("SELECT MAX(seq_id) FROM audit_log", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) as u64)
    }

    /// Gathers statistics about the log.
    ///
    /// # Errors
    ///
    /// Returns an error if statistics cannot be gathered.
    pub fn stats(&self) -> Result<AuditStats, AuditError> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let record_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        let max_seq_id: Option<i64> =
            conn.query_row("SELECT MAX(seq_id) FROM audit_log", [], |row| row.get(0))?;
        Ok(AuditStats {
            record_count: record_count as u64,
            max_seq_id: max_seq_id.unwrap_or(0) as u64,
        })
    }
}

fn row_to_record(row: &Row<'_>) -> Result<AuditRecord, rusqlite::Error> {
    Ok(AuditRecord {
        seq_id: Some(row.get::<_, i64>(0)? as u64),
        event_type: row.get(1)?,
        session_id: row.get(2)?,
        actor: row.get(3)?,
        related_id: row.get(4)?,
        payload: row.get(5)?,
        timestamp_ns: row.get::<_, i64>(6)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event_type: &str, session_id: &str, related_id: &str) -> AuditRecord {
        AuditRecord::new(event_type, session_id, "test-actor", related_id, vec![1, 2, 3])
    }

    #[test]
    fn test_append_assigns_sequential_ids() {
        let log = AuditLog::in_memory().unwrap();
        let a = log.append(&record("registration.signed_up", "s-1", "r-1")).unwrap();
        let b = log.append(&record("registration.approved", "s-1", "r-1")).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(log.head().unwrap(), 2);
    }

    #[test]
    fn test_read_from_cursor() {
        let log = AuditLog::in_memory().unwrap();
        for i in 0..5 {
            log.append(&record("registration.signed_up", "s-1", &format!("r-{i}")))
                .unwrap();
        }
        let records = log.read_from(3, 10).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].seq_id, Some(3));
        assert_eq!(records[0].related_id, "r-2");
    }

    #[test]
    fn test_read_session_filters() {
        let log = AuditLog::in_memory().unwrap();
        log.append(&record("registration.signed_up", "s-1", "r-1")).unwrap();
        log.append(&record("registration.signed_up", "s-2", "r-2")).unwrap();
        log.append(&record("registration.cancelled", "s-1", "r-1")).unwrap();

        let records = log.read_session("s-1", 100).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.session_id == "s-1"));
    }

    #[test]
    fn test_read_one_missing() {
        let log = AuditLog::in_memory().unwrap();
        let err = log.read_one(99).unwrap_err();
        assert!(matches!(err, AuditError::RecordNotFound { seq_id: 99 }));
    }

    #[test]
    fn test_updates_are_rejected() {
        let log = AuditLog::in_memory().unwrap();
        log.append(&record("registration.signed_up", "s-1", "r-1")).unwrap();

        let conn = log.conn.lock().unwrap();
        let result = conn.execute("UPDATE audit_log SET actor = 'tamper' WHERE seq_id = 1", []);
        assert!(result.is_err());
        let result = conn.execute("DELETE FROM audit_log WHERE seq_id = 1", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_open_on_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");

        {
            let log = AuditLog::open(&path).unwrap();
            log.append(&record("registration.signed_up", "s-1", "r-1")).unwrap();
        }

        let log = AuditLog::open(&path).unwrap();
        let stats = log.stats().unwrap();
        assert_eq!(stats.record_count, 1);
        assert_eq!(stats.max_seq_id, 1);
    }

    #[test]
    fn test_stats_empty() {
        let log = AuditLog::in_memory().unwrap();
        let stats = log.stats().unwrap();
        assert_eq!(stats.record_count, 0);
        assert_eq!(stats.max_seq_id, 0);
    }
}
