//! Pure eligibility validation for sign-up requests.
//!
//! [`validate`] checks a request against a session with no side effects and
//! no clock access of its own, so the UI can call it optimistically before
//! submit and the server re-checks identically at submit time. Checks run
//! in a fixed order and the first failure wins:
//!
//! 1. session status is `Scheduled`
//! 2. the sign-up deadline, if set, has not passed
//! 3. the character level falls inside the session tier's range
//! 4. required fields are present and well-formed

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::directory::{GameSession, SessionStatus};
use crate::registration::CharacterSnapshot;
use crate::tier::LevelTier;

/// Legal character level bounds, independent of any tier.
pub const LEVEL_RANGE: (u8, u8) = (1, 20);

/// The player-supplied sign-up form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupForm {
    /// The player's display name as entered on the form.
    pub display_name: String,

    /// Character name.
    pub character_name: String,

    /// Character class tags; at least one is required.
    pub class_tags: Vec<String>,

    /// Character level.
    pub level: u8,

    /// Character race.
    pub race: String,
}

impl SignupForm {
    /// Captures the character fields as an immutable snapshot.
    ///
    /// The snapshot is taken at sign-up time and never auto-updated: the
    /// character may level or respec afterwards, but the table roster shows
    /// what was signed up.
    #[must_use]
    pub fn character_snapshot(&self) -> CharacterSnapshot {
        CharacterSnapshot {
            name: self.character_name.trim().to_string(),
            class_tags: self
                .class_tags
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            level: self.level,
            race: self.race.trim().to_string(),
        }
    }
}

/// Reasons a sign-up request is ineligible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EligibilityError {
    /// The session is not accepting registrations.
    #[error("session is not open for sign-ups: {reason}")]
    SessionNotOpen {
        /// Why the session is closed (wrong status or past deadline).
        reason: String,
    },

    /// The character's level falls outside the session tier's range.
    #[error("character level {level} is outside the {tier} range {min}-{max}")]
    TierMismatch {
        /// The session's tier.
        tier: LevelTier,
        /// The requested character level.
        level: u8,
        /// Tier minimum level.
        min: u8,
        /// Tier maximum level.
        max: u8,
    },

    /// One or more required fields are missing or malformed.
    #[error("sign-up form failed validation")]
    ValidationFailed {
        /// Field name to human-readable message.
        errors: BTreeMap<String, String>,
    },
}

/// Validates a sign-up request against a session.
///
/// Pure and synchronously re-checkable: identical inputs always produce the
/// identical verdict, which is the defense against stale client state.
///
/// # Errors
///
/// Returns the first failing check, in the order documented on this module.
pub fn validate(
    session: &GameSession,
    form: &SignupForm,
    now: DateTime<Utc>,
) -> Result<(), EligibilityError> {
    if session.status != SessionStatus::Scheduled {
        return Err(EligibilityError::SessionNotOpen {
            reason: format!("session status is {:?}", session.status),
        });
    }

    if let Some(deadline) = session.signup_deadline {
        if now > deadline {
            return Err(EligibilityError::SessionNotOpen {
                reason: format!("sign-up deadline {deadline} has passed"),
            });
        }
    }

    let (min, max) = session.level_tier.level_range();
    if !session.level_tier.contains(form.level) {
        return Err(EligibilityError::TierMismatch {
            tier: session.level_tier,
            level: form.level,
            min,
            max,
        });
    }

    let mut errors = BTreeMap::new();
    if form.display_name.trim().is_empty() {
        errors.insert("display_name".to_string(), "name is required".to_string());
    }
    if form.character_name.trim().is_empty() {
        errors.insert(
            "character_name".to_string(),
            "character name is required".to_string(),
        );
    }
    if form.class_tags.iter().all(|t| t.trim().is_empty()) {
        errors.insert(
            "class_tags".to_string(),
            "at least one class is required".to_string(),
        );
    }
    if form.level < LEVEL_RANGE.0 || form.level > LEVEL_RANGE.1 {
        errors.insert(
            "level".to_string(),
            format!("level must be between {} and {}", LEVEL_RANGE.0, LEVEL_RANGE.1),
        );
    }
    if form.race.trim().is_empty() {
        errors.insert("race".to_string(), "race is required".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(EligibilityError::ValidationFailed { errors })
    }
}
