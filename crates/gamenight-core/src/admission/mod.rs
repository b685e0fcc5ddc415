//! Admission gatekeeping: one-time tokens and per-identity rate limiting.
//!
//! Every sign-up request passes through two defensive checks before it can
//! touch the registration ledger:
//!
//! 1. A one-time token proves the request came from a freshly-loaded form
//!    (see [`TokenStore`]). Cancel-by-link tokens use the same store with a
//!    longer validity window.
//! 2. A sliding-window rate limiter throttles repeated attempts per
//!    normalized email (see [`RateLimiter`]).
//!
//! Both caches are process-lifetime and never authoritative: losing them on
//! restart costs nothing but a re-requested form token. Failures are
//! reported, never retried: the caller must re-request a token or wait out
//! the window.

mod error;
mod rate_limit;
mod token;

pub use error::AdmissionError;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use token::{TokenClaim, TokenConfig, TokenKind, TokenStore};

/// Issuance and consumption of one-time tokens.
///
/// The in-process [`TokenStore`] implements this; multi-instance
/// deployments can implement it against a shared cache instead, without
/// changing any engine call site.
pub trait TokenIssuer: Send + Sync {
    /// Issues a form-submission token.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot accept more tokens.
    fn issue_form(&self) -> Result<String, AdmissionError>;

    /// Issues a cancel-by-link token bound to one registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot accept more tokens.
    fn issue_cancel_link(&self, registration_id: &str) -> Result<String, AdmissionError>;

    /// Validates and consumes a token; a second presentation must fail.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for unknown, expired, or consumed tokens.
    fn check_and_consume(&self, token: &str) -> Result<TokenClaim, AdmissionError>;
}

/// Per-identity attempt throttling.
///
/// The in-process [`RateLimiter`] implements this; a shared-cache backend
/// slots in the same way as with [`TokenIssuer`].
pub trait AttemptLimiter: Send + Sync {
    /// Checks whether an attempt from `key` is allowed, recording it if so.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` when the attempt exceeds the limit.
    fn check(&self, key: &str) -> Result<(), AdmissionError>;
}
