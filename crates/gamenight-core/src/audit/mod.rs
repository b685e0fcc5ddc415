//! Append-only audit trail for registration transitions.
//!
//! Every state transition the engine performs lands here as an
//! [`AuditRecord`] before it is reflected in the in-memory projection. The
//! trail is the only source of truth for "what happened": no state is hard
//! deleted, and the live registration book can always be rebuilt by
//! replaying the trail from the start.
//!
//! Backed by `SQLite` with WAL mode for concurrent reads. Records can only
//! be appended, never modified or removed.
//!
//! # Example
//!
//! ```rust
//! use gamenight_core::audit::{AuditLog, AuditRecord};
//!
//! # fn example() -> Result<(), gamenight_core::audit::AuditError> {
//! let log = AuditLog::in_memory()?;
//! let record = AuditRecord::new(
//!     "registration.signed_up",
//!     "session-1",
//!     "player-1",
//!     "reg-1",
//!     br#"{"status":"pending"}"#.to_vec(),
//! );
//! let seq_id = log.append(&record)?;
//! assert_eq!(log.read_session("session-1", 100)?.len(), 1);
//! # let _ = seq_id;
//! # Ok(())
//! # }
//! ```

mod storage;

pub use storage::{AuditError, AuditLog, AuditRecord, AuditStats};
