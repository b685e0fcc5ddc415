//! Per-identity rate limiting for sign-up attempts.
//!
//! Implements a sliding-window counter keyed by normalized email. The first
//! attempt opens a window; up to `max_attempts` (default: 5) attempts are
//! allowed within it; the next attempt is rejected with a "slow down"
//! signal. The window decays by time only.
//!
//! # Memory Management
//!
//! The cache is purely defensive and never authoritative, but it must stay
//! bounded against an attacker cycling through addresses:
//!
//! 1. Probabilistic cleanup: every Nth check (default: 100) removes keys
//!    with no recent attempts.
//! 2. A hard cap on tracked keys (default: 10,000). At the cap with a new
//!    key, cleanup is forced; if still full, the attempt is rejected.
//!
//! # Thread Safety
//!
//! State is behind an `RwLock`; checks from concurrent request handlers are
//! safe. The re-check under the write lock closes the gap where another
//! thread records attempts between the read and the write.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::error::AdmissionError;

/// Configuration for the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum attempts allowed within the window.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Size of the sliding window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How often to run cleanup (every N checks).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Hard cap on tracked identity keys.
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_window_secs() -> u64 {
    10 * 60
}

const fn default_cleanup_interval() -> u64 {
    100
}

const fn default_max_tracked_keys() -> usize {
    10_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_secs: default_window_secs(),
            cleanup_interval: default_cleanup_interval(),
            max_tracked_keys: default_max_tracked_keys(),
        }
    }
}

/// An in-memory sliding-window rate limiter keyed by identity string.
pub struct RateLimiter {
    config: RateLimitConfig,
    // Maps identity keys to recent attempt timestamps.
    state: RwLock<HashMap<String, Vec<Instant>>>,
    // Counter for probabilistic cleanup.
    check_count: AtomicU64,
}

impl RateLimiter {
    /// Creates a new rate limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HashMap::new()),
            check_count: AtomicU64::new(0),
        }
    }

    /// Checks whether an attempt from `key` is allowed, recording it if so.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` if the attempt would exceed the window limit,
    /// or if the key cap is reached and `key` is not already tracked.
    pub fn check(&self, key: &str) -> Result<(), AdmissionError> {
        let now = Instant::now();
        let window = std::time::Duration::from_secs(self.config.window_secs);
        let cutoff = now.checked_sub(window).unwrap_or(now);

        let count = self.check_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % self.config.cleanup_interval == 0 {
            tracing::debug!(check_count = count, "running periodic rate limiter cleanup");
            self.cleanup();
        }

        // Fast path: read-only check first.
        {
            let state = self
                .state
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);

            if let Some(attempts) = state.get(key) {
                let recent = attempts.iter().filter(|&&t| t > cutoff).count();
                if recent >= self.config.max_attempts as usize {
                    tracing::warn!(
                        key,
                        attempts = recent,
                        max = self.config.max_attempts,
                        "rate limit exceeded"
                    );
                    return Err(AdmissionError::RateLimited);
                }
            } else if state.len() >= self.config.max_tracked_keys {
                drop(state);
                tracing::debug!(
                    max_tracked_keys = self.config.max_tracked_keys,
                    "key cap reached, forcing cleanup"
                );
                self.cleanup();

                let state = self
                    .state
                    .read()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if !state.contains_key(key) && state.len() >= self.config.max_tracked_keys {
                    tracing::warn!(
                        key,
                        tracked = state.len(),
                        "rejecting new identity key: cap reached"
                    );
                    return Err(AdmissionError::RateLimited);
                }
            }
        }

        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // Re-check the cap for new keys under the write lock.
        if !state.contains_key(key) && state.len() >= self.config.max_tracked_keys {
            tracing::warn!(
                key,
                tracked = state.len(),
                "rejecting new identity key: cap reached"
            );
            return Err(AdmissionError::RateLimited);
        }

        let attempts = state.entry(key.to_string()).or_default();
        attempts.retain(|&t| t > cutoff);

        if attempts.len() >= self.config.max_attempts as usize {
            tracing::warn!(
                key,
                attempts = attempts.len(),
                max = self.config.max_attempts,
                "rate limit exceeded"
            );
            return Err(AdmissionError::RateLimited);
        }

        attempts.push(now);
        Ok(())
    }

    /// Removes keys with no attempts inside the current window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = std::time::Duration::from_secs(self.config.window_secs);
        let cutoff = now.checked_sub(window).unwrap_or(now);

        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.retain(|_, attempts| {
            attempts.retain(|&t| t > cutoff);
            !attempts.is_empty()
        });
    }

    /// Returns the number of tracked identity keys.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        let state = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.len()
    }
}

impl super::AttemptLimiter for RateLimiter {
    fn check(&self, key: &str) -> Result<(), AdmissionError> {
        Self::check(self, key)
    }
}
