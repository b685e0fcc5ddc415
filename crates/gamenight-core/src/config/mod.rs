//! Engine configuration.
//!
//! Configuration is loaded from a TOML file or built in code. Every field
//! has a default, so an empty file and [`EngineConfig::default`] produce
//! the same engine. Table policy (waitlist, approval, self-cancellation)
//! lives here alongside the abuse-control settings that the admission
//! layer consumes.
//!
//! # Example
//!
//! ```
//! use gamenight_core::config::EngineConfig;
//!
//! let config = EngineConfig::from_toml("waitlist_enabled = false").unwrap();
//! assert!(!config.waitlist_enabled);
//! assert!(config.require_approval);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admission::{RateLimitConfig, TokenConfig};

/// Errors from loading or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML or has a wrong field type.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// When capacity is reached, queue further sign-ups instead of
    /// rejecting them.
    #[serde(default = "default_true")]
    pub waitlist_enabled: bool,

    /// New sign-ups below capacity start `Pending` and need an explicit
    /// approval before they hold a seat.
    #[serde(default = "default_true")]
    pub require_approval: bool,

    /// Players may cancel their own confirmed or waitlisted
    /// registrations.
    #[serde(default = "default_true")]
    pub allow_self_cancel: bool,

    /// Sliding-window limits on sign-up attempts per player identity.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// One-time token issuance and expiry.
    #[serde(default)]
    pub tokens: TokenConfig,
}

const fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            waitlist_enabled: true,
            require_approval: true,
            allow_self_cancel: true,
            rate_limit: RateLimitConfig::default(),
            tokens: TokenConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error when the string is not valid TOML.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Serializes the configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
