//! Registration record and status types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a registration.
///
/// The transition table lives in [`super::book`]; any status write outside
/// that table is rejected. `Cancelled`, `Attended`, and `NoShow` are
/// terminal, with one exception: a `Cancelled` entry may be resurrected by
/// a fresh sign-up from the same player for the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Signed up, awaiting DM approval.
    Pending,
    /// Holds a seat at the table.
    Confirmed,
    /// Session was full at sign-up time; queued for promotion.
    Waitlisted,
    /// Withdrawn or rejected. Kept for audit history, never deleted.
    Cancelled,
    /// Played the session.
    Attended,
    /// Held a seat but did not show up.
    NoShow,
}

impl RegistrationStatus {
    /// Returns `true` if this registration counts against session capacity.
    #[must_use]
    pub const fn counts_against_capacity(self) -> bool {
        matches!(self, Self::Confirmed | Self::Attended)
    }

    /// Returns `true` for statuses that block a second sign-up by the same
    /// player for the same session.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Returns `true` for terminal statuses.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Attended | Self::NoShow)
    }

    /// Returns the status name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Waitlisted => "waitlisted",
            Self::Cancelled => "cancelled",
            Self::Attended => "attended",
            Self::NoShow => "no_show",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Character fields captured at sign-up time.
///
/// A character may level up or respec after the session locks in, so these
/// are a snapshot and are never auto-updated. Re-registering takes a fresh
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    /// Character name.
    pub name: String,

    /// Class tags, at least one.
    pub class_tags: Vec<String>,

    /// Character level at sign-up.
    pub level: u8,

    /// Character race.
    pub race: String,
}

/// One player's relationship to one session.
///
/// At most one non-`Cancelled` registration exists per
/// `(session_id, player_id)` pair at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Stable registration identifier.
    pub id: String,

    /// The session signed up for.
    pub session_id: String,

    /// The registered player.
    pub player_id: String,

    /// Character snapshot from the most recent sign-up.
    pub character: CharacterSnapshot,

    /// Current lifecycle status.
    pub status: RegistrationStatus,

    /// Set when attendance has been marked at session completion.
    pub attendance_confirmed: bool,

    /// Sign-up timestamp in nanoseconds since the Unix epoch. Refreshed on
    /// re-registration, which re-enters the waitlist at the back.
    pub created_at_ns: u64,

    /// Monotonic arrival number, breaking timestamp ties for FIFO
    /// waitlist ordering.
    pub arrival_seq: u64,
}
