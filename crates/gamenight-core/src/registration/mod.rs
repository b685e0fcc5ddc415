//! Registration lifecycle state machine.
//!
//! A registration moves through its lifecycle by events appended to the
//! audit trail. The projection in [`book`] validates every transition
//! against this table before mutating state:
//!
//! ```text
//! Event              | Valid from            | Resulting status
//! -------------------+-----------------------+------------------
//! SignedUp           | (no active row)       | Pending | Confirmed | Waitlisted
//! Approved           | Pending               | Confirmed
//! Rejected           | Pending               | Cancelled
//! Cancelled (player) | Confirmed, Waitlisted | Cancelled
//! Cancelled (admin/  | Pending, Confirmed,   | Cancelled
//!   session)         |   Waitlisted          |
//! Promoted           | Waitlisted            | Confirmed
//! AttendanceMarked   | Confirmed             | Attended | NoShow
//! ```
//!
//! `SignedUp` on a pair whose previous registration was cancelled
//! resurrects the existing row with a fresh character snapshot and arrival
//! position, so each `(session, player)` pair owns at most one row for its
//! whole history.
//!
//! # Thread Safety
//!
//! The types here are plain data plus a single-threaded projection. The
//! coordinator wraps [`RegistrationBook`] in a lock; see
//! [`crate::engine`].

mod book;
mod error;
mod events;
mod state;


pub use book::RegistrationBook;
pub use error::RegistrationError;
pub use events::{CancelledBy, RegistrationEvent};
pub use state::{CharacterSnapshot, Registration, RegistrationStatus};
