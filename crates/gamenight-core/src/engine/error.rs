//! Coordinator error surface and the stable response shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admission::AdmissionError;
use crate::audit::AuditError;
use crate::eligibility::EligibilityError;
use crate::registration::RegistrationError;

/// Everything a coordinator operation can fail with.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request failed admission (token or rate limit).
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// The request failed eligibility validation.
    #[error(transparent)]
    Eligibility(#[from] EligibilityError),

    /// The request hit the lifecycle state machine's rules.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The session is full and the waitlist is disabled, or an approval
    /// would exceed capacity.
    #[error("session {session_id} is full")]
    SessionFull {
        /// The session that has no open seat.
        session_id: String,
    },

    /// The session is not known to the directory.
    #[error("session {session_id} not found")]
    SessionNotFound {
        /// The unknown session ID.
        session_id: String,
    },

    /// Attendance can only be recorded once the session has been played.
    #[error("session {session_id} has not been completed yet")]
    SessionNotCompleted {
        /// The session still scheduled or cancelled.
        session_id: String,
    },

    /// Players are not allowed to cancel their own registrations on this
    /// table.
    #[error("self-service cancellation is disabled")]
    SelfCancelDisabled,

    /// The audit trail could not be read or written.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl EngineError {
    /// Whether this is an expected business rejection rather than an
    /// engine fault.
    ///
    /// Business rejections are part of normal operation and are answered
    /// with a well-formed "no" ([`ApiResponse`] with `success: false`).
    /// Only storage faults and corrupt payloads are real errors.
    #[must_use]
    pub const fn is_business_rejection(&self) -> bool {
        !matches!(
            self,
            Self::Audit(_) | Self::Registration(RegistrationError::Decode(_))
        )
    }
}

/// The stable response envelope for callers driving the engine from an
/// HTTP or bot frontend.
///
/// Business rejections and successes share this shape, so a frontend can
/// always render `message` and the per-field `errors` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// `true` when the operation changed state.
    pub success: bool,

    /// Human-readable summary.
    pub message: String,

    /// Per-field validation messages, present only for form failures.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,

    /// The registration the operation created or acted on, when one
    /// exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
}

impl ApiResponse {
    /// Builds a success envelope.
    #[must_use]
    pub fn ok(message: impl Into<String>, registration_id: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            errors: BTreeMap::new(),
            registration_id,
        }
    }

    /// Builds a rejection envelope from a business error.
    ///
    /// Field-level validation errors are lifted into the `errors` map;
    /// everything else becomes the `message`.
    #[must_use]
    pub fn rejection(error: &EngineError) -> Self {
        let errors = match error {
            EngineError::Eligibility(EligibilityError::ValidationFailed { errors }) => {
                errors.clone()
            },
            _ => BTreeMap::new(),
        };
        Self {
            success: false,
            message: error.to_string(),
            errors,
            registration_id: None,
        }
    }
}
