//! The registration coordinator.
//!
//! [`RegistrationEngine`] wires admission, eligibility, the audit trail,
//! the projection, and notifications into the operations a frontend
//! calls. Every capacity-affecting operation runs the same critical
//! section under the session's lock: read the confirmed count from the
//! projection, decide, append to the trail, apply to the projection.
//! Notifications go out after the lock is released, so a slow or failing
//! transport never extends the critical section.
//!
//! # Thread Safety
//!
//! The engine is `Send + Sync` and designed to sit behind an `Arc`, with
//! one instance per process. Operations on different sessions run
//! concurrently; operations on the same session serialize.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use gamenight_core::config::EngineConfig;
//! use gamenight_core::directory::{
//!     GameSession, InMemoryPlayerRegistry, InMemorySessionDirectory, PlayerIdentity,
//!     SessionStatus,
//! };
//! use gamenight_core::eligibility::SignupForm;
//! use gamenight_core::engine::RegistrationEngine;
//! use gamenight_core::notify::{
//!     InMemoryNoticeStore, InMemoryTransport, NotificationDispatcher,
//! };
//! use gamenight_core::registration::RegistrationStatus;
//! use gamenight_core::tier::LevelTier;
//!
//! let directory = Arc::new(InMemorySessionDirectory::new());
//! directory.upsert(GameSession {
//!     id: "friday".to_string(),
//!     capacity: 4,
//!     level_tier: LevelTier::Any,
//!     signup_deadline: None,
//!     status: SessionStatus::Scheduled,
//! });
//!
//! let mut config = EngineConfig::default();
//! config.require_approval = false;
//!
//! let engine = RegistrationEngine::new(
//!     config,
//!     directory,
//!     Arc::new(InMemoryPlayerRegistry::new()),
//!     NotificationDispatcher::new(
//!         Arc::new(InMemoryTransport::new()),
//!         Arc::new(InMemoryNoticeStore::new()),
//!     ),
//! )
//! .unwrap();
//!
//! let token = engine.issue_form_token().unwrap();
//! let outcome = engine
//!     .sign_up(
//!         &token,
//!         "friday",
//!         &PlayerIdentity {
//!             email: "mira@example.com".to_string(),
//!             display_name: "Mira".to_string(),
//!         },
//!         &SignupForm {
//!             display_name: "Mira".to_string(),
//!             character_name: "Sariel".to_string(),
//!             class_tags: vec!["wizard".to_string()],
//!             level: 7,
//!             race: "elf".to_string(),
//!         },
//!     )
//!     .unwrap();
//! assert_eq!(outcome.status, RegistrationStatus::Confirmed);
//! ```

mod error;

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::admission::{AttemptLimiter, RateLimiter, TokenIssuer, TokenKind, TokenStore};
use crate::audit::{AuditLog, AuditRecord};
use crate::capacity::{decide_admission, has_open_seat, SeatDecision, SessionLocks};
use crate::config::EngineConfig;
use crate::directory::{
    normalize_email, PlayerIdentity, PlayerRegistry, SessionDirectory, SessionStatus,
};
use crate::eligibility::{validate, SignupForm};
use crate::notify::{Notification, NotificationDispatcher, NotificationKind};
use crate::registration::{
    CancelledBy, Registration, RegistrationBook, RegistrationError, RegistrationEvent,
    RegistrationStatus,
};

pub use error::{ApiResponse, EngineError};

/// Actor recorded for engine-initiated events such as promotions.
const SYSTEM_ACTOR: &str = "system";

/// Batch size for replaying the audit trail at startup.
const REPLAY_BATCH: u64 = 512;

/// Result of a successful sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupOutcome {
    /// The registration that was created or resurrected.
    pub registration_id: String,
    /// Where the sign-up landed.
    pub status: RegistrationStatus,
}

/// Coordinates the full registration lifecycle for all sessions.
pub struct RegistrationEngine {
    config: EngineConfig,
    tokens: Arc<dyn TokenIssuer>,
    rate_limiter: Arc<dyn AttemptLimiter>,
    directory: Arc<dyn SessionDirectory>,
    players: Arc<dyn PlayerRegistry>,
    audit: AuditLog,
    book: RwLock<RegistrationBook>,
    locks: SessionLocks,
    dispatcher: NotificationDispatcher,
}

impl RegistrationEngine {
    /// Creates an engine with an in-memory audit trail.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit store cannot be initialized.
    pub fn new(
        config: EngineConfig,
        directory: Arc<dyn SessionDirectory>,
        players: Arc<dyn PlayerRegistry>,
        dispatcher: NotificationDispatcher,
    ) -> Result<Self, EngineError> {
        let audit = AuditLog::in_memory()?;
        Self::with_audit(config, directory, players, dispatcher, audit)
    }

    /// Opens an engine over an on-disk audit trail, replaying it to
    /// rebuild the projection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the trail
    /// does not replay cleanly.
    pub fn open(
        path: impl AsRef<Path>,
        config: EngineConfig,
        directory: Arc<dyn SessionDirectory>,
        players: Arc<dyn PlayerRegistry>,
        dispatcher: NotificationDispatcher,
    ) -> Result<Self, EngineError> {
        let audit = AuditLog::open(path)?;
        Self::with_audit(config, directory, players, dispatcher, audit)
    }

    fn with_audit(
        config: EngineConfig,
        directory: Arc<dyn SessionDirectory>,
        players: Arc<dyn PlayerRegistry>,
        dispatcher: NotificationDispatcher,
        audit: AuditLog,
    ) -> Result<Self, EngineError> {
        let mut book = RegistrationBook::new();
        let mut cursor = 1u64;
        let mut replayed = 0usize;
        loop {
            let batch = audit.read_from(cursor, REPLAY_BATCH)?;
            let Some(last) = batch.last() else { break };
            cursor = last.seq_id.unwrap_or(cursor) + 1;
            for record in &batch {
                book.apply(record)?;
            }
            replayed += batch.len();
        }
        if replayed > 0 {
            info!(records = replayed, "rebuilt registration book from audit trail");
        }

        let tokens: Arc<dyn TokenIssuer> = Arc::new(TokenStore::new(config.tokens.clone()));
        let rate_limiter: Arc<dyn AttemptLimiter> =
            Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Ok(Self {
            config,
            tokens,
            rate_limiter,
            directory,
            players,
            audit,
            book: RwLock::new(book),
            locks: SessionLocks::new(),
            dispatcher,
        })
    }

    /// Replaces the admission backends, e.g. with implementations backed
    /// by a cache shared across instances. Call sites are unchanged.
    #[must_use]
    pub fn with_admission(
        mut self,
        tokens: Arc<dyn TokenIssuer>,
        rate_limiter: Arc<dyn AttemptLimiter>,
    ) -> Self {
        self.tokens = tokens;
        self.rate_limiter = rate_limiter;
        self
    }

    /// Issues a one-time token to embed in a sign-up form.
    ///
    /// # Errors
    ///
    /// Returns an error if the token store is saturated.
    pub fn issue_form_token(&self) -> Result<String, EngineError> {
        Ok(self.tokens.issue_form()?)
    }

    /// Issues a one-time cancellation link token for a registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration is unknown or the token
    /// store is saturated.
    pub fn issue_cancel_link(&self, registration_id: &str) -> Result<String, EngineError> {
        self.get_registration(registration_id)?;
        Ok(self.tokens.issue_cancel_link(registration_id)?)
    }

    /// Processes one sign-up request end to end.
    ///
    /// Admission first (token, then rate limit on the normalized email),
    /// then eligibility against the session, then the capacity decision
    /// under the session lock. The gates run in that order and the first
    /// failure wins; a failed attempt still consumes its token and still
    /// counts toward the rate limit.
    ///
    /// # Errors
    ///
    /// Returns the first failing gate as a business rejection, or an
    /// audit error if the trail cannot be written.
    pub fn sign_up(
        &self,
        token: &str,
        session_id: &str,
        identity: &PlayerIdentity,
        form: &SignupForm,
    ) -> Result<SignupOutcome, EngineError> {
        let claim = self.tokens.check_and_consume(token)?;
        if claim.kind != TokenKind::Form {
            return Err(crate::admission::AdmissionError::InvalidToken.into());
        }

        self.rate_limiter.check(&normalize_email(&identity.email))?;

        let session =
            self.directory
                .get(session_id)
                .ok_or_else(|| EngineError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        validate(&session, form, Utc::now())?;

        let player = self.players.find_or_create(identity);

        let lock = self.locks.for_session(session_id);
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (registration_id, confirmed) = {
            let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = book.for_pair(session_id, &player.id) {
                if existing.status.is_active() {
                    return Err(RegistrationError::DuplicateRegistration {
                        session_id: session_id.to_string(),
                        player_id: player.id.clone(),
                    }
                    .into());
                }
            }
            let id = book
                .for_pair(session_id, &player.id)
                .map_or_else(|| uuid::Uuid::new_v4().to_string(), |r| r.id.clone());
            (id, book.confirmed_count(session_id))
        };

        let initial_status = match decide_admission(confirmed, session.capacity, &self.config) {
            SeatDecision::Admit(status) => status,
            SeatDecision::Reject => {
                debug!(session_id, confirmed, "sign-up rejected, session full");
                return Err(EngineError::SessionFull {
                    session_id: session_id.to_string(),
                });
            },
        };

        let event = RegistrationEvent::SignedUp {
            registration_id: registration_id.clone(),
            player_id: player.id.clone(),
            character: form.character_snapshot(),
            initial_status,
        };
        self.commit(&event.to_record(session_id, &player.id)?)?;
        drop(guard);

        info!(
            session_id,
            registration_id = %registration_id,
            status = %initial_status,
            "sign-up accepted"
        );
        self.dispatcher.dispatch(&Notification {
            kind: NotificationKind::SignupReceived,
            recipient: player.email,
            session_id: session_id.to_string(),
            registration_id: registration_id.clone(),
            detail: Some(format!("registration status: {initial_status}")),
        });

        Ok(SignupOutcome {
            registration_id,
            status: initial_status,
        })
    }

    /// Approves a pending registration, confirming its seat.
    ///
    /// The seat count is re-checked under the session lock: if the
    /// session filled between sign-up and approval, the approval fails
    /// with [`EngineError::SessionFull`] and the registration stays
    /// pending.
    ///
    /// # Errors
    ///
    /// Returns a business rejection if the registration is unknown, not
    /// pending, or no seat is open.
    pub fn approve(&self, registration_id: &str, actor: &str) -> Result<(), EngineError> {
        let registration = self.get_registration(registration_id)?;
        let session = self.directory.get(&registration.session_id).ok_or_else(|| {
            EngineError::SessionNotFound {
                session_id: registration.session_id.clone(),
            }
        })?;

        let lock = self.locks.for_session(&registration.session_id);
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        {
            let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
            if !has_open_seat(book.confirmed_count(&registration.session_id), session.capacity) {
                return Err(EngineError::SessionFull {
                    session_id: registration.session_id.clone(),
                });
            }
        }

        let event = RegistrationEvent::Approved {
            registration_id: registration_id.to_string(),
        };
        self.commit(&event.to_record(&registration.session_id, actor)?)?;
        drop(guard);

        info!(registration_id, actor, "registration approved");
        self.notify_player(
            NotificationKind::Approved,
            &registration.session_id,
            registration_id,
            &registration.player_id,
            None,
        );
        Ok(())
    }

    /// Rejects a pending registration.
    ///
    /// # Errors
    ///
    /// Returns a business rejection if the registration is unknown or
    /// not pending.
    pub fn reject(
        &self,
        registration_id: &str,
        reason: Option<String>,
        actor: &str,
    ) -> Result<(), EngineError> {
        let registration = self.get_registration(registration_id)?;

        let lock = self.locks.for_session(&registration.session_id);
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let event = RegistrationEvent::Rejected {
            registration_id: registration_id.to_string(),
            reason: reason.clone(),
        };
        self.commit(&event.to_record(&registration.session_id, actor)?)?;
        drop(guard);

        info!(registration_id, actor, "registration rejected");
        self.notify_player(
            NotificationKind::Rejected,
            &registration.session_id,
            registration_id,
            &registration.player_id,
            reason,
        );
        Ok(())
    }

    /// Cancels a registration.
    ///
    /// Cancelling a confirmed registration frees its seat; the oldest
    /// waitlisted registration, if any, is promoted into it inside the
    /// same critical section, so the freed seat can never be claimed by
    /// a concurrent sign-up first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SelfCancelDisabled`] for player-initiated
    /// cancellation when the table forbids it, or a business rejection
    /// for unknown registrations and invalid transitions.
    pub fn cancel(
        &self,
        registration_id: &str,
        cancelled_by: CancelledBy,
        actor: &str,
    ) -> Result<(), EngineError> {
        if cancelled_by == CancelledBy::Player && !self.config.allow_self_cancel {
            return Err(EngineError::SelfCancelDisabled);
        }

        let registration = self.get_registration(registration_id)?;
        let session_id = registration.session_id.clone();

        let lock = self.locks.for_session(&session_id);
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // The pre-lock snapshot can be stale: a concurrent cancellation may
        // have promoted this entry from the waitlist already. Whether the
        // cancellation frees a seat is decided from the status the entry
        // holds now, inside the critical section.
        let held_seat = {
            let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
            book.get(registration_id)
                .is_some_and(|r| r.status.counts_against_capacity())
        };

        let event = RegistrationEvent::Cancelled {
            registration_id: registration_id.to_string(),
            cancelled_by,
        };
        self.commit(&event.to_record(&session_id, actor)?)?;

        // Promote into the freed seat before releasing the lock.
        let promoted = if held_seat {
            self.promote_oldest(&session_id)?
        } else {
            None
        };
        drop(guard);

        info!(registration_id, ?cancelled_by, actor, "registration cancelled");
        self.notify_player(
            NotificationKind::Cancelled,
            &session_id,
            registration_id,
            &registration.player_id,
            None,
        );
        if let Some(next) = promoted {
            info!(
                registration_id = %next.id,
                session_id,
                "waitlisted registration promoted"
            );
            self.notify_player(
                NotificationKind::WaitlistPromoted,
                &session_id,
                &next.id,
                &next.player_id,
                None,
            );
        }
        Ok(())
    }

    /// Cancels a registration via a one-time cancellation link.
    ///
    /// # Errors
    ///
    /// Returns an invalid-token rejection for unknown, expired, consumed,
    /// or wrong-kind tokens, and otherwise behaves like player-initiated
    /// [`Self::cancel`].
    pub fn cancel_by_link(&self, token: &str) -> Result<(), EngineError> {
        let claim = self.tokens.check_and_consume(token)?;
        let registration_id = match (claim.kind, claim.registration_id) {
            (TokenKind::CancelLink, Some(id)) => id,
            _ => return Err(crate::admission::AdmissionError::InvalidToken.into()),
        };
        let registration = self.get_registration(&registration_id)?;
        self.cancel(&registration_id, CancelledBy::Player, &registration.player_id)
    }

    /// Records whether a confirmed player showed up.
    ///
    /// Attendance is an after-the-fact record, so the session must be
    /// marked [`SessionStatus::Completed`] in the directory first.
    ///
    /// # Errors
    ///
    /// Returns a business rejection if the registration is unknown, the
    /// registration is not confirmed, or the session has not been
    /// completed.
    pub fn mark_attendance(
        &self,
        registration_id: &str,
        attended: bool,
        actor: &str,
    ) -> Result<(), EngineError> {
        let registration = self.get_registration(registration_id)?;
        let session =
            self.directory
                .get(&registration.session_id)
                .ok_or_else(|| EngineError::SessionNotFound {
                    session_id: registration.session_id.clone(),
                })?;
        if session.status != SessionStatus::Completed {
            return Err(EngineError::SessionNotCompleted {
                session_id: registration.session_id.clone(),
            });
        }

        let lock = self.locks.for_session(&registration.session_id);
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let event = RegistrationEvent::AttendanceMarked {
            registration_id: registration_id.to_string(),
            attended,
        };
        self.commit(&event.to_record(&registration.session_id, actor)?)?;
        drop(guard);

        debug!(registration_id, attended, "attendance recorded");
        Ok(())
    }

    /// Cancels every open registration for a session.
    ///
    /// Used when the session itself is called off. No promotions happen;
    /// there is nothing left to promote into.
    ///
    /// # Errors
    ///
    /// Returns an audit error if the trail cannot be written. Returns
    /// the number of registrations cancelled on success.
    pub fn cancel_session(&self, session_id: &str, actor: &str) -> Result<usize, EngineError> {
        let lock = self.locks.for_session(session_id);
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let open: Vec<Registration> = {
            let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
            book.session_registrations(session_id)
                .filter(|r| {
                    matches!(
                        r.status,
                        RegistrationStatus::Pending
                            | RegistrationStatus::Confirmed
                            | RegistrationStatus::Waitlisted
                    )
                })
                .cloned()
                .collect()
        };

        for registration in &open {
            let event = RegistrationEvent::Cancelled {
                registration_id: registration.id.clone(),
                cancelled_by: CancelledBy::Session,
            };
            self.commit(&event.to_record(session_id, actor)?)?;
        }
        drop(guard);

        info!(session_id, cancelled = open.len(), "session cancelled");
        for registration in &open {
            self.notify_player(
                NotificationKind::Cancelled,
                session_id,
                &registration.id,
                &registration.player_id,
                Some("the session was cancelled".to_string()),
            );
        }
        Ok(open.len())
    }

    /// Sends a reminder to every confirmed registration for a session.
    ///
    /// Returns the number of reminders dispatched.
    pub fn remind(&self, session_id: &str) -> usize {
        let confirmed: Vec<Registration> = {
            let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
            book.session_registrations(session_id)
                .filter(|r| r.status == RegistrationStatus::Confirmed)
                .cloned()
                .collect()
        };
        for registration in &confirmed {
            self.notify_player(
                NotificationKind::Reminder,
                session_id,
                &registration.id,
                &registration.player_id,
                None,
            );
        }
        confirmed.len()
    }

    /// Looks up a registration by ID.
    #[must_use]
    pub fn registration(&self, registration_id: &str) -> Option<Registration> {
        let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
        book.get(registration_id).cloned()
    }

    /// Number of seats currently held for a session.
    #[must_use]
    pub fn confirmed_count(&self, session_id: &str) -> usize {
        let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
        book.confirmed_count(session_id)
    }

    /// Returns the full audit history for a session, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the trail cannot be read.
    pub fn history(&self, session_id: &str) -> Result<Vec<AuditRecord>, EngineError> {
        Ok(self.audit.read_session(session_id, u64::from(u32::MAX))?)
    }

    /// Preflights, appends, and applies one record.
    ///
    /// Callers hold the session lock. Preflight runs against the live
    /// projection first, so a record that would fail replay is rejected
    /// before it touches the trail.
    fn commit(&self, record: &AuditRecord) -> Result<(), EngineError> {
        {
            let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
            book.preflight(record)?;
        }
        let seq_id = self.audit.append(record)?;
        let mut book = self.book.write().unwrap_or_else(PoisonError::into_inner);
        book.apply(&record.clone().with_seq_id(seq_id))?;
        Ok(())
    }

    /// Promotes the oldest waitlisted registration, if any. Caller holds
    /// the session lock.
    fn promote_oldest(&self, session_id: &str) -> Result<Option<Registration>, EngineError> {
        let candidate = {
            let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
            book.oldest_waitlisted(session_id).cloned()
        };
        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let event = RegistrationEvent::Promoted {
            registration_id: candidate.id.clone(),
        };
        self.commit(&event.to_record(session_id, SYSTEM_ACTOR)?)?;
        Ok(Some(candidate))
    }

    fn get_registration(&self, registration_id: &str) -> Result<Registration, EngineError> {
        self.registration(registration_id).ok_or_else(|| {
            RegistrationError::RegistrationNotFound {
                registration_id: registration_id.to_string(),
            }
            .into()
        })
    }

    /// Dispatches a notification to a registration's player, resolving
    /// the recipient address through the registry.
    fn notify_player(
        &self,
        kind: NotificationKind,
        session_id: &str,
        registration_id: &str,
        player_id: &str,
        detail: Option<String>,
    ) {
        let Some(player) = self.players.get(player_id) else {
            warn!(player_id, registration_id, "player missing, notification skipped");
            return;
        };
        self.dispatcher.dispatch(&Notification {
            kind,
            recipient: player.email,
            session_id: session_id.to_string(),
            registration_id: registration_id.to_string(),
            detail,
        });
    }
}

impl std::fmt::Debug for RegistrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
