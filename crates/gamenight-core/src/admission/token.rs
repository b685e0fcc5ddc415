//! One-time token store for form submissions and cancel-by-link requests.
//!
//! Tokens are opaque random strings, valid once within a kind-specific
//! window: 30 minutes for form-submission tokens, 48 hours for
//! cancel-by-link tokens. Consuming a token removes it immediately
//! regardless of outcome, so a replayed request always fails.
//!
//! # Memory Management
//!
//! The store is process-lifetime and must stay bounded even if clients
//! request tokens and never spend them. Two defenses:
//!
//! 1. Probabilistic cleanup: every Nth issue (default: 100) sweeps expired
//!    entries.
//! 2. A hard cap on live tokens (default: 10,000). At the cap, cleanup is
//!    forced; if the store is still full, issuance fails closed with
//!    `StoreSaturated` rather than growing without bound.
//!
//! # Thread Safety
//!
//! Internal state is behind an `RwLock`; the store is shared across
//! concurrent request handlers.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use super::error::AdmissionError;

/// Length of generated token strings.
const TOKEN_LEN: usize = 32;

/// What a one-time token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Proves a sign-up form was freshly loaded. Short window.
    Form,
    /// Authorizes cancelling one specific registration via emailed link.
    CancelLink,
}

/// The claim carried by a consumed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaim {
    /// What the token authorized.
    pub kind: TokenKind,

    /// For [`TokenKind::CancelLink`], the registration the link may cancel.
    pub registration_id: Option<String>,
}

/// Configuration for the token store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Validity window for form tokens, in seconds.
    #[serde(default = "default_form_ttl_secs")]
    pub form_ttl_secs: u64,

    /// Validity window for cancel-by-link tokens, in seconds.
    #[serde(default = "default_cancel_link_ttl_secs")]
    pub cancel_link_ttl_secs: u64,

    /// How often to run cleanup (every N issued tokens).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Hard cap on live tokens.
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,
}

const fn default_form_ttl_secs() -> u64 {
    30 * 60
}

const fn default_cancel_link_ttl_secs() -> u64 {
    48 * 60 * 60
}

const fn default_cleanup_interval() -> u64 {
    100
}

const fn default_max_tracked() -> usize {
    10_000
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            form_ttl_secs: default_form_ttl_secs(),
            cancel_link_ttl_secs: default_cancel_link_ttl_secs(),
            cleanup_interval: default_cleanup_interval(),
            max_tracked: default_max_tracked(),
        }
    }
}

impl TokenConfig {
    /// Returns the validity window for a token kind.
    #[must_use]
    pub const fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Form => Duration::from_secs(self.form_ttl_secs),
            TokenKind::CancelLink => Duration::from_secs(self.cancel_link_ttl_secs),
        }
    }
}

#[derive(Debug)]
struct IssuedToken {
    claim: TokenClaim,
    issued_at: Instant,
}

/// Process-lifetime store of single-use, time-boxed tokens.
pub struct TokenStore {
    config: TokenConfig,
    state: RwLock<HashMap<String, IssuedToken>>,
    issue_count: AtomicU64,
}

impl TokenStore {
    /// Creates a new store with the given configuration.
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HashMap::new()),
            issue_count: AtomicU64::new(0),
        }
    }

    /// Issues a form-submission token.
    ///
    /// # Errors
    ///
    /// Returns `StoreSaturated` if the store is at its hard cap and cleanup
    /// could not reclaim space.
    pub fn issue_form(&self) -> Result<String, AdmissionError> {
        self.issue(TokenClaim {
            kind: TokenKind::Form,
            registration_id: None,
        })
    }

    /// Issues a cancel-by-link token bound to one registration.
    ///
    /// # Errors
    ///
    /// Returns `StoreSaturated` if the store is at its hard cap and cleanup
    /// could not reclaim space.
    pub fn issue_cancel_link(&self, registration_id: &str) -> Result<String, AdmissionError> {
        self.issue(TokenClaim {
            kind: TokenKind::CancelLink,
            registration_id: Some(registration_id.to_string()),
        })
    }

    fn issue(&self, claim: TokenClaim) -> Result<String, AdmissionError> {
        // Probabilistic cleanup to bound memory growth. Relaxed ordering is
        // fine: a missed or duplicate sweep is harmless.
        let count = self.issue_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % self.config.cleanup_interval == 0 {
            tracing::debug!(issue_count = count, "running periodic token cleanup");
            self.cleanup();
        }

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();

        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if state.len() >= self.config.max_tracked {
            drop(state);
            tracing::debug!(
                max_tracked = self.config.max_tracked,
                "token store at hard cap, forcing cleanup"
            );
            self.cleanup();

            state = self
                .state
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if state.len() >= self.config.max_tracked {
                tracing::warn!(
                    tracked = state.len(),
                    max_tracked = self.config.max_tracked,
                    "refusing to issue token: store saturated"
                );
                return Err(AdmissionError::StoreSaturated);
            }
        }

        state.insert(
            token.clone(),
            IssuedToken {
                claim,
                issued_at: Instant::now(),
            },
        );

        Ok(token)
    }

    /// Validates and consumes a token.
    ///
    /// The token is removed from the store before its validity window is
    /// checked, so a second presentation fails even when the first one did.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the token is unknown, expired, or already
    /// consumed. The three cases are indistinguishable by design.
    pub fn check_and_consume(&self, token: &str) -> Result<TokenClaim, AdmissionError> {
        let issued = {
            let mut state = self
                .state
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state.remove(token)
        };

        let Some(issued) = issued else {
            tracing::debug!("rejecting unknown or already-consumed token");
            return Err(AdmissionError::InvalidToken);
        };

        if issued.issued_at.elapsed() > self.config.ttl(issued.claim.kind) {
            tracing::debug!(kind = ?issued.claim.kind, "rejecting expired token");
            return Err(AdmissionError::InvalidToken);
        }

        Ok(issued.claim)
    }

    /// Removes expired tokens from the store.
    pub fn cleanup(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.retain(|_, issued| issued.issued_at.elapsed() <= self.config.ttl(issued.claim.kind));
    }

    /// Returns the number of live tokens. Useful for monitoring.
    #[must_use]
    pub fn tracked(&self) -> usize {
        let state = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.len()
    }
}

impl super::TokenIssuer for TokenStore {
    fn issue_form(&self) -> Result<String, AdmissionError> {
        Self::issue_form(self)
    }

    fn issue_cancel_link(&self, registration_id: &str) -> Result<String, AdmissionError> {
        Self::issue_cancel_link(self, registration_id)
    }

    fn check_and_consume(&self, token: &str) -> Result<TokenClaim, AdmissionError> {
        Self::check_and_consume(self, token)
    }
}
