//! Error types for the admission gatekeeper.

use thiserror::Error;

/// Errors that can occur during admission checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The token is unknown, expired, or already consumed.
    ///
    /// These three cases are deliberately indistinguishable to the caller:
    /// revealing which one applies would let a client probe the store.
    #[error("invalid or expired token")]
    InvalidToken,

    /// Too many attempts from the same identity within the window.
    #[error("too many attempts, slow down and try again later")]
    RateLimited,

    /// The token store is at its hard capacity and cleanup reclaimed nothing.
    #[error("token store is saturated")]
    StoreSaturated,
}
