//! Registration transition events as stored in the audit trail.

use serde::{Deserialize, Serialize};

use super::error::RegistrationError;
use super::state::{CharacterSnapshot, RegistrationStatus};
use crate::audit::AuditRecord;

/// Who initiated a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    /// The player withdrew (self-cancel or cancel-by-link).
    Player,
    /// An admin cancelled the registration.
    Admin,
    /// The whole session was called off; entries are bulk-cancelled with no
    /// individual promotion.
    Session,
}

/// A registration transition, serialized as JSON into the audit payload.
///
/// The `event_type` string on the enclosing [`AuditRecord`] mirrors the
/// variant so the trail can be filtered without decoding payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistrationEvent {
    /// A sign-up was accepted, either creating a new row or resurrecting a
    /// cancelled one for the same `(session, player)` pair.
    SignedUp {
        /// Registration identifier.
        registration_id: String,
        /// The player signing up.
        player_id: String,
        /// Character snapshot captured at sign-up.
        character: CharacterSnapshot,
        /// Entry status decided by the capacity coordinator: `Pending`,
        /// `Confirmed`, or `Waitlisted`.
        initial_status: RegistrationStatus,
    },

    /// Admin approved a pending registration; a seat was available.
    Approved {
        /// Registration identifier.
        registration_id: String,
    },

    /// Admin rejected a pending registration.
    Rejected {
        /// Registration identifier.
        registration_id: String,
        /// Optional reason, recorded for the audit history.
        reason: Option<String>,
    },

    /// A registration was cancelled.
    Cancelled {
        /// Registration identifier.
        registration_id: String,
        /// Who initiated the cancellation.
        cancelled_by: CancelledBy,
    },

    /// The oldest waitlisted entry was promoted into a freed seat.
    Promoted {
        /// Registration identifier.
        registration_id: String,
    },

    /// Attendance was recorded at session completion.
    AttendanceMarked {
        /// Registration identifier.
        registration_id: String,
        /// `true` for attended, `false` for no-show.
        attended: bool,
    },
}

impl RegistrationEvent {
    /// Returns the audit `event_type` string for this event.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::SignedUp { .. } => "registration.signed_up",
            Self::Approved { .. } => "registration.approved",
            Self::Rejected { .. } => "registration.rejected",
            Self::Cancelled { .. } => "registration.cancelled",
            Self::Promoted { .. } => "registration.promoted",
            Self::AttendanceMarked { .. } => "registration.attendance_marked",
        }
    }

    /// Returns the registration this event concerns.
    #[must_use]
    pub fn registration_id(&self) -> &str {
        match self {
            Self::SignedUp { registration_id, .. }
            | Self::Approved { registration_id }
            | Self::Rejected { registration_id, .. }
            | Self::Cancelled { registration_id, .. }
            | Self::Promoted { registration_id }
            | Self::AttendanceMarked { registration_id, .. } => registration_id,
        }
    }

    /// Packages this event as an audit record for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn to_record(
        &self,
        session_id: &str,
        actor: &str,
    ) -> Result<AuditRecord, RegistrationError> {
        let payload = serde_json::to_vec(self)?;
        Ok(AuditRecord::new(
            self.event_type(),
            session_id,
            actor,
            self.registration_id(),
            payload,
        ))
    }

    /// Decodes an event from an audit record payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid registration event.
    pub fn from_record(record: &AuditRecord) -> Result<Self, RegistrationError> {
        Ok(serde_json::from_slice(&record.payload)?)
    }
}
