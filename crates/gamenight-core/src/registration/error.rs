//! Registration ledger error types.

use thiserror::Error;

use super::state::RegistrationStatus;

/// Errors that can occur applying registration transitions.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Attempted a transition not listed in the transition table. The
    /// record is left untouched.
    #[error("invalid transition from {from} via {event}")]
    InvalidTransition {
        /// Status the registration was in.
        from: RegistrationStatus,
        /// The event type that was attempted.
        event: String,
    },

    /// A second active registration for the same `(session, player)` pair.
    #[error("player {player_id} already has an active registration for session {session_id}")]
    DuplicateRegistration {
        /// The session.
        session_id: String,
        /// The player.
        player_id: String,
    },

    /// No registration with the given ID.
    #[error("registration not found: {registration_id}")]
    RegistrationNotFound {
        /// The missing registration ID.
        registration_id: String,
    },

    /// Failed to decode an audit payload.
    #[error("payload decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
