//! In-memory projection of the registration ledger.
//!
//! The [`RegistrationBook`] is derived state: it is rebuilt by replaying the
//! audit trail, and applying the same records in the same order always
//! produces the same book. All transition validation happens here, so an
//! event that is not in the transition table never mutates anything: the
//! failed apply leaves the book exactly as it was.

use std::collections::HashMap;

use super::error::RegistrationError;
use super::events::{CancelledBy, RegistrationEvent};
use super::state::{Registration, RegistrationStatus};
use crate::audit::AuditRecord;

/// Projection of all registrations, indexed for the coordinator's queries.
#[derive(Debug, Default)]
pub struct RegistrationBook {
    /// All registrations by ID, including cancelled ones (history is never
    /// hard-deleted).
    registrations: HashMap<String, Registration>,

    /// `(session_id, player_id)` to registration ID. One permanent row per
    /// pair; re-registration resurrects it.
    by_pair: HashMap<(String, String), String>,

    /// Registration IDs per session, in arrival order.
    by_session: HashMap<String, Vec<String>>,

    /// Monotonic arrival counter, breaks timestamp ties for FIFO ordering.
    arrival_counter: u64,
}

impl RegistrationBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a book by replaying audit records in sequence order.
    ///
    /// # Errors
    ///
    /// Returns the first apply error. A trail written by this engine always
    /// replays cleanly; an error here means the trail was tampered with or
    /// truncated mid-write.
    pub fn replay<'a>(
        records: impl IntoIterator<Item = &'a AuditRecord>,
    ) -> Result<Self, RegistrationError> {
        let mut book = Self::new();
        for record in records {
            book.apply(record)?;
        }
        Ok(book)
    }

    /// Returns the total number of registration rows, cancelled included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns `true` if the book has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Looks up a registration by ID.
    #[must_use]
    pub fn get(&self, registration_id: &str) -> Option<&Registration> {
        self.registrations.get(registration_id)
    }

    /// Returns the registration row for a `(session, player)` pair, in any
    /// status.
    #[must_use]
    pub fn for_pair(&self, session_id: &str, player_id: &str) -> Option<&Registration> {
        let key = (session_id.to_string(), player_id.to_string());
        self.by_pair.get(&key).and_then(|id| self.registrations.get(id))
    }

    /// Counts registrations holding a seat (`Confirmed` or `Attended`) for
    /// a session.
    #[must_use]
    pub fn confirmed_count(&self, session_id: &str) -> usize {
        self.session_registrations(session_id)
            .filter(|r| r.status.counts_against_capacity())
            .count()
    }

    /// Returns the oldest waitlisted registration for a session, if any.
    ///
    /// FIFO order is `(created_at_ns, arrival_seq)`; the arrival sequence
    /// breaks timestamp ties deterministically.
    #[must_use]
    pub fn oldest_waitlisted(&self, session_id: &str) -> Option<&Registration> {
        self.session_registrations(session_id)
            .filter(|r| r.status == RegistrationStatus::Waitlisted)
            .min_by_key(|r| (r.created_at_ns, r.arrival_seq))
    }

    /// Returns all registrations for a session in arrival order.
    pub fn session_registrations(
        &self,
        session_id: &str,
    ) -> impl Iterator<Item = &Registration> {
        self.by_session
            .get(session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.registrations.get(id))
    }

    /// Validates a record against the current state without applying it.
    ///
    /// The coordinator calls this before appending to the audit trail, so
    /// a record that would fail replay never reaches the trail.
    ///
    /// # Errors
    ///
    /// The same errors [`Self::apply`] would return for this record.
    pub fn preflight(&self, record: &AuditRecord) -> Result<(), RegistrationError> {
        if !record.event_type.starts_with("registration.") {
            return Ok(());
        }

        let event = RegistrationEvent::from_record(record)?;
        match event {
            RegistrationEvent::SignedUp {
                player_id,
                initial_status,
                ..
            } => {
                if !matches!(
                    initial_status,
                    RegistrationStatus::Pending
                        | RegistrationStatus::Confirmed
                        | RegistrationStatus::Waitlisted
                ) {
                    return Err(RegistrationError::InvalidTransition {
                        from: initial_status,
                        event: record.event_type.clone(),
                    });
                }
                if let Some(existing) = self.for_pair(&record.session_id, &player_id) {
                    if existing.status.is_active() {
                        return Err(RegistrationError::DuplicateRegistration {
                            session_id: record.session_id.clone(),
                            player_id,
                        });
                    }
                }
                Ok(())
            },
            RegistrationEvent::Approved { registration_id }
            | RegistrationEvent::Rejected { registration_id, .. } => self.check_from(
                &registration_id,
                record.event_type.as_str(),
                |status| matches!(status, RegistrationStatus::Pending),
            ),
            RegistrationEvent::Cancelled {
                registration_id,
                cancelled_by,
            } => self.check_from(
                &registration_id,
                record.event_type.as_str(),
                |status| match status {
                    RegistrationStatus::Confirmed | RegistrationStatus::Waitlisted => true,
                    RegistrationStatus::Pending => cancelled_by != CancelledBy::Player,
                    _ => false,
                },
            ),
            RegistrationEvent::Promoted { registration_id } => self.check_from(
                &registration_id,
                record.event_type.as_str(),
                |status| matches!(status, RegistrationStatus::Waitlisted),
            ),
            RegistrationEvent::AttendanceMarked { registration_id, .. } => self.check_from(
                &registration_id,
                record.event_type.as_str(),
                |status| matches!(status, RegistrationStatus::Confirmed),
            ),
        }
    }

    fn check_from(
        &self,
        registration_id: &str,
        event_type: &str,
        allowed_from: impl Fn(RegistrationStatus) -> bool,
    ) -> Result<(), RegistrationError> {
        let registration = self.registrations.get(registration_id).ok_or_else(|| {
            RegistrationError::RegistrationNotFound {
                registration_id: registration_id.to_string(),
            }
        })?;
        if !allowed_from(registration.status) {
            return Err(RegistrationError::InvalidTransition {
                from: registration.status,
                event: event_type.to_string(),
            });
        }
        Ok(())
    }

    /// Applies one audit record to the projection.
    ///
    /// Records whose `event_type` is not a registration event are ignored.
    /// A failed apply leaves the book untouched: every handler validates
    /// before it writes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for transitions outside the table,
    /// `DuplicateRegistration` for a second active sign-up on the same
    /// pair, `RegistrationNotFound` for events on unknown rows, and a
    /// decode error for malformed payloads.
    pub fn apply(&mut self, record: &AuditRecord) -> Result<(), RegistrationError> {
        if !record.event_type.starts_with("registration.") {
            return Ok(());
        }

        let event = RegistrationEvent::from_record(record)?;
        match event {
            RegistrationEvent::SignedUp {
                registration_id,
                player_id,
                character,
                initial_status,
            } => self.handle_signed_up(
                record,
                registration_id,
                player_id,
                character,
                initial_status,
            ),
            RegistrationEvent::Approved { registration_id } => self.transition(
                &registration_id,
                record.event_type.as_str(),
                |status| matches!(status, RegistrationStatus::Pending),
                RegistrationStatus::Confirmed,
            ),
            RegistrationEvent::Rejected { registration_id, .. } => self.transition(
                &registration_id,
                record.event_type.as_str(),
                |status| matches!(status, RegistrationStatus::Pending),
                RegistrationStatus::Cancelled,
            ),
            RegistrationEvent::Cancelled {
                registration_id,
                cancelled_by,
            } => self.transition(
                &registration_id,
                record.event_type.as_str(),
                |status| match status {
                    RegistrationStatus::Confirmed | RegistrationStatus::Waitlisted => true,
                    // A pending request is withdrawn by admin rejection or a
                    // session-level cancellation, never by the player.
                    RegistrationStatus::Pending => cancelled_by != CancelledBy::Player,
                    _ => false,
                },
                RegistrationStatus::Cancelled,
            ),
            RegistrationEvent::Promoted { registration_id } => self.transition(
                &registration_id,
                record.event_type.as_str(),
                |status| matches!(status, RegistrationStatus::Waitlisted),
                RegistrationStatus::Confirmed,
            ),
            RegistrationEvent::AttendanceMarked {
                registration_id,
                attended,
            } => {
                let target = if attended {
                    RegistrationStatus::Attended
                } else {
                    RegistrationStatus::NoShow
                };
                self.transition(
                    &registration_id,
                    record.event_type.as_str(),
                    |status| matches!(status, RegistrationStatus::Confirmed),
                    target,
                )?;
                if let Some(registration) = self.registrations.get_mut(&registration_id) {
                    registration.attendance_confirmed = true;
                }
                Ok(())
            },
        }
    }

    fn handle_signed_up(
        &mut self,
        record: &AuditRecord,
        registration_id: String,
        player_id: String,
        character: super::state::CharacterSnapshot,
        initial_status: RegistrationStatus,
    ) -> Result<(), RegistrationError> {
        if !matches!(
            initial_status,
            RegistrationStatus::Pending
                | RegistrationStatus::Confirmed
                | RegistrationStatus::Waitlisted
        ) {
            return Err(RegistrationError::InvalidTransition {
                from: initial_status,
                event: record.event_type.clone(),
            });
        }

        let session_id = record.session_id.clone();
        let key = (session_id.clone(), player_id.clone());

        if let Some(existing_id) = self.by_pair.get(&key).cloned() {
            let existing = self
                .registrations
                .get_mut(&existing_id)
                .ok_or_else(|| RegistrationError::RegistrationNotFound {
                    registration_id: existing_id.clone(),
                })?;
            if existing.status.is_active() {
                return Err(RegistrationError::DuplicateRegistration {
                    session_id,
                    player_id,
                });
            }

            // Re-registration: resurrect the cancelled row instead of
            // creating a second permanent one. The prior history stays in
            // the audit trail; a fresh snapshot and arrival position are
            // taken.
            self.arrival_counter += 1;
            existing.character = character;
            existing.status = initial_status;
            existing.attendance_confirmed = false;
            existing.created_at_ns = record.timestamp_ns;
            existing.arrival_seq = self.arrival_counter;
            return Ok(());
        }

        self.arrival_counter += 1;
        let registration = Registration {
            id: registration_id.clone(),
            session_id: session_id.clone(),
            player_id,
            character,
            status: initial_status,
            attendance_confirmed: false,
            created_at_ns: record.timestamp_ns,
            arrival_seq: self.arrival_counter,
        };

        let pair_key = (session_id.clone(), registration.player_id.clone());
        self.by_pair.insert(pair_key, registration_id.clone());
        self.by_session
            .entry(session_id)
            .or_default()
            .push(registration_id.clone());
        self.registrations.insert(registration_id, registration);
        Ok(())
    }

    fn transition(
        &mut self,
        registration_id: &str,
        event_type: &str,
        allowed_from: impl Fn(RegistrationStatus) -> bool,
        target: RegistrationStatus,
    ) -> Result<(), RegistrationError> {
        let registration = self.registrations.get_mut(registration_id).ok_or_else(|| {
            RegistrationError::RegistrationNotFound {
                registration_id: registration_id.to_string(),
            }
        })?;

        if !allowed_from(registration.status) {
            return Err(RegistrationError::InvalidTransition {
                from: registration.status,
                event: event_type.to_string(),
            });
        }

        registration.status = target;
        Ok(())
    }
}
