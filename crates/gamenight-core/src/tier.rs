//! Character level tiers gating session eligibility.
//!
//! A tier is a named inclusive level range. The table is fixed:
//!
//! | Tier | Levels |
//! |------|--------|
//! | any | 1-20 |
//! | tier1 | 1-4 |
//! | tier2 | 5-10 |
//! | tier3 | 11-16 |
//! | tier4 | 17-20 |

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named inclusive character-level range attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LevelTier {
    /// Levels 1-20 (no restriction beyond the legal level range).
    #[default]
    Any,
    /// Levels 1-4.
    Tier1,
    /// Levels 5-10.
    Tier2,
    /// Levels 11-16.
    Tier3,
    /// Levels 17-20.
    Tier4,
}

impl LevelTier {
    /// Returns the inclusive `(min, max)` level range for this tier.
    #[must_use]
    pub const fn level_range(self) -> (u8, u8) {
        match self {
            Self::Any => (1, 20),
            Self::Tier1 => (1, 4),
            Self::Tier2 => (5, 10),
            Self::Tier3 => (11, 16),
            Self::Tier4 => (17, 20),
        }
    }

    /// Returns `true` if `level` falls within this tier's range.
    #[must_use]
    pub const fn contains(self, level: u8) -> bool {
        let (min, max) = self.level_range();
        level >= min && level <= max
    }

    /// Returns the tier name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
            Self::Tier4 => "tier4",
        }
    }
}

impl fmt::Display for LevelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
