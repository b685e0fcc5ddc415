//! External collaborator interfaces: session directory and player registry.
//!
//! The engine never owns scheduling or identity. Sessions are supplied by a
//! [`SessionDirectory`] and are read-only from the engine's perspective;
//! players are created or looked up through a [`PlayerRegistry`] keyed by
//! normalized email, and are never deleted by this core.
//!
//! In-memory implementations are provided for small deployments and tests.
//! Larger deployments implement the traits against their own storage.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tier::LevelTier;

/// Lifecycle status of a scheduled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The session is on the calendar and may accept registrations.
    Scheduled,
    /// The session has been played.
    Completed,
    /// The session was called off.
    Cancelled,
}

/// A scheduled game session, owned by the scheduling collaborator.
///
/// Registrations are only accepted while `status` is
/// [`SessionStatus::Scheduled`] and the deadline (if set) has not passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSession {
    /// Stable session identifier.
    pub id: String,

    /// Number of seats at the table. Always greater than zero.
    pub capacity: u32,

    /// Character-level tier gating eligibility.
    pub level_tier: LevelTier,

    /// Optional sign-up cutoff. `None` means sign-ups close only when the
    /// session stops being `Scheduled`.
    pub signup_deadline: Option<DateTime<Utc>>,

    /// Current lifecycle status.
    pub status: SessionStatus,
}

/// Verified identity of the acting user, supplied by the identity provider.
///
/// The engine never performs authentication; it trusts that the caller has
/// already established this identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    /// The player's email address as presented by the identity provider.
    pub email: String,

    /// Human-readable display name.
    pub display_name: String,
}

/// A known player. Created on first sign-up, never deleted by this core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Stable player identifier.
    pub id: String,

    /// Email address, unique under case-insensitive comparison.
    pub email: String,

    /// Human-readable display name.
    pub display_name: String,
}

/// Normalizes an email address for identity and rate-limit keying.
///
/// Emails are unique case-insensitively, so all lookups go through this.
#[must_use]
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Read-only access to session records.
pub trait SessionDirectory: Send + Sync {
    /// Looks up a session by ID. Returns `None` if unknown.
    fn get(&self, session_id: &str) -> Option<GameSession>;
}

/// Lookup-or-create access to player records.
pub trait PlayerRegistry: Send + Sync {
    /// Returns the player for `identity`, creating one on first sign-up.
    ///
    /// Lookup is by normalized email. An existing player's stored email and
    /// display name are left as-is; this core never updates identity data.
    fn find_or_create(&self, identity: &PlayerIdentity) -> Player;

    /// Looks up a player by ID.
    fn get(&self, player_id: &str) -> Option<Player>;
}

/// In-memory session directory for small deployments and tests.
#[derive(Debug, Default)]
pub struct InMemorySessionDirectory {
    sessions: RwLock<HashMap<String, GameSession>>,
}

impl InMemorySessionDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a session record.
    pub fn upsert(&self, session: GameSession) {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.insert(session.id.clone(), session);
    }
}

impl SessionDirectory for InMemorySessionDirectory {
    fn get(&self, session_id: &str) -> Option<GameSession> {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.get(session_id).cloned()
    }
}

/// In-memory player registry keyed by normalized email.
#[derive(Debug, Default)]
pub struct InMemoryPlayerRegistry {
    players: RwLock<HashMap<String, Player>>,
}

impl InMemoryPlayerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of known players.
    #[must_use]
    pub fn len(&self) -> usize {
        let players = self
            .players
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        players.len()
    }

    /// Returns `true` if no players are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlayerRegistry for InMemoryPlayerRegistry {
    fn find_or_create(&self, identity: &PlayerIdentity) -> Player {
        let key = normalize_email(&identity.email);
        let mut players = self
            .players
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        players
            .entry(key)
            .or_insert_with(|| Player {
                id: uuid::Uuid::new_v4().to_string(),
                email: identity.email.trim().to_string(),
                display_name: identity.display_name.clone(),
            })
            .clone()
    }

    fn get(&self, player_id: &str) -> Option<Player> {
        let players = self
            .players
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        players.values().find(|p| p.id == player_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(email: &str, name: &str) -> PlayerIdentity {
        PlayerIdentity {
            email: email.to_string(),
            display_name: name.to_string(),
        }
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
        assert_eq!(normalize_email("bob@example.com"), "bob@example.com");
    }

    #[test]
    fn test_find_or_create_is_idempotent() {
        let registry = InMemoryPlayerRegistry::new();
        let first = registry.find_or_create(&identity("alice@example.com", "Alice"));
        let second = registry.find_or_create(&identity("ALICE@example.com", "Alice A."));

        assert_eq!(first.id, second.id);
        assert_eq!(registry.len(), 1);
        // Identity data is not updated on re-lookup.
        assert_eq!(second.display_name, "Alice");
    }

    #[test]
    fn test_distinct_emails_create_distinct_players() {
        let registry = InMemoryPlayerRegistry::new();
        let a = registry.find_or_create(&identity("a@example.com", "A"));
        let b = registry.find_or_create(&identity("b@example.com", "B"));
        assert_ne!(a.id, b.id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_get_by_id() {
        let registry = InMemoryPlayerRegistry::new();
        let created = registry.find_or_create(&identity("a@example.com", "A"));
        let fetched = registry.get(&created.id).unwrap();
        assert_eq!(fetched, created);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_directory_upsert_and_get() {
        let directory = InMemorySessionDirectory::new();
        directory.upsert(GameSession {
            id: "friday-night".to_string(),
            capacity: 5,
            level_tier: LevelTier::Tier2,
            signup_deadline: None,
            status: SessionStatus::Scheduled,
        });

        let session = directory.get("friday-night").unwrap();
        assert_eq!(session.capacity, 5);
        assert!(directory.get("missing").is_none());
    }
}
