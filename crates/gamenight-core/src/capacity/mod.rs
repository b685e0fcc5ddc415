//! Seat arbitration and per-session write serialization.
//!
//! Every operation that could change a session's confirmed count runs the
//! same critical section: take the session's lock, read the current count
//! from the projection, decide, append, apply. [`SessionLocks`] hands out
//! one mutex per session so sessions never contend with each other, and
//! [`decide_admission`] is the pure placement rule evaluated inside that
//! section.
//!
//! # Thread Safety
//!
//! `SessionLocks` is safe to share behind an `Arc`. Lock entries are
//! created lazily and kept for the lifetime of the map; the set of
//! sessions is small and bounded by the campaign calendar, so entries are
//! never evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::EngineConfig;
use crate::registration::RegistrationStatus;

/// Placement decision for one sign-up attempt, made under the session
/// lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatDecision {
    /// A seat is available and the sign-up enters the lifecycle with the
    /// given status.
    Admit(RegistrationStatus),
    /// Capacity is reached and the waitlist is disabled.
    Reject,
}

/// Decides where a new sign-up lands given the seats currently held.
///
/// Below capacity the sign-up is admitted, as `Pending` when the table
/// requires approval and directly `Confirmed` otherwise. At or
/// above capacity it is waitlisted, or rejected when the waitlist is
/// disabled.
#[must_use]
pub fn decide_admission(confirmed: usize, capacity: u32, config: &EngineConfig) -> SeatDecision {
    if confirmed < capacity as usize {
        if config.require_approval {
            SeatDecision::Admit(RegistrationStatus::Pending)
        } else {
            SeatDecision::Admit(RegistrationStatus::Confirmed)
        }
    } else if config.waitlist_enabled {
        SeatDecision::Admit(RegistrationStatus::Waitlisted)
    } else {
        SeatDecision::Reject
    }
}

/// Returns `true` when a pending approval may be confirmed without
/// exceeding capacity.
///
/// Approval is re-checked under the session lock because seats can fill
/// between the original sign-up and the admin acting on it.
#[must_use]
pub fn has_open_seat(confirmed: usize, capacity: u32) -> bool {
    confirmed < capacity as usize
}

/// One mutex per session ID, created on first use.
#[derive(Debug, Default)]
pub struct SessionLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    /// Creates an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock guarding capacity decisions for a session.
    ///
    /// The caller locks the returned mutex for the duration of its
    /// read-decide-append-apply sequence.
    #[must_use]
    pub fn for_session(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of sessions that have taken a lock at least once.
    #[must_use]
    pub fn tracked_sessions(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}
