//! End-to-end scenarios driving the full engine through sign-up,
//! arbitration, approval, cancellation, and promotion.

use std::sync::Arc;

use chrono::{Duration, Utc};
use gamenight_core::admission::{AdmissionError, AttemptLimiter, TokenConfig, TokenStore};
use gamenight_core::config::EngineConfig;
use gamenight_core::directory::{
    GameSession, InMemoryPlayerRegistry, InMemorySessionDirectory, PlayerIdentity, SessionStatus,
};
use gamenight_core::eligibility::{EligibilityError, SignupForm};
use gamenight_core::engine::{EngineError, RegistrationEngine};
use gamenight_core::notify::{
    InMemoryNoticeStore, InMemoryTransport, NotificationDispatcher, NotificationKind, SendOutcome,
};
use gamenight_core::registration::{CancelledBy, RegistrationError, RegistrationStatus};
use gamenight_core::tier::LevelTier;

struct Fixture {
    engine: RegistrationEngine,
    directory: Arc<InMemorySessionDirectory>,
    transport: Arc<InMemoryTransport>,
}

fn session(id: &str, capacity: u32, tier: LevelTier) -> GameSession {
    GameSession {
        id: id.to_string(),
        capacity,
        level_tier: tier,
        signup_deadline: None,
        status: SessionStatus::Scheduled,
    }
}

fn fixture(config: EngineConfig) -> Fixture {
    let directory = Arc::new(InMemorySessionDirectory::new());
    let transport = Arc::new(InMemoryTransport::new());
    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&transport) as _,
        Arc::new(InMemoryNoticeStore::new()),
    );
    let engine = RegistrationEngine::new(
        config,
        Arc::clone(&directory) as _,
        Arc::new(InMemoryPlayerRegistry::new()),
        dispatcher,
    )
    .unwrap();
    Fixture {
        engine,
        directory,
        transport,
    }
}

fn no_approval() -> EngineConfig {
    EngineConfig {
        require_approval: false,
        ..EngineConfig::default()
    }
}

fn identity(name: &str) -> PlayerIdentity {
    PlayerIdentity {
        email: format!("{name}@example.com"),
        display_name: name.to_string(),
    }
}

fn form(name: &str, level: u8) -> SignupForm {
    SignupForm {
        display_name: name.to_string(),
        character_name: format!("{name}-the-bold"),
        class_tags: vec!["fighter".to_string()],
        level,
        race: "human".to_string(),
    }
}

fn sign_up(fx: &Fixture, session_id: &str, name: &str, level: u8) -> Result<String, EngineError> {
    let token = fx.engine.issue_form_token()?;
    fx.engine
        .sign_up(&token, session_id, &identity(name), &form(name, level))
        .map(|outcome| outcome.registration_id)
}

#[test]
fn exact_fill_cancel_promotes_oldest_waitlisted() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 2, LevelTier::Any));

    let x = sign_up(&fx, "friday", "xavi", 5).unwrap();
    let y = sign_up(&fx, "friday", "yola", 5).unwrap();
    let z = sign_up(&fx, "friday", "zora", 5).unwrap();

    assert_eq!(fx.engine.registration(&x).unwrap().status, RegistrationStatus::Confirmed);
    assert_eq!(fx.engine.registration(&y).unwrap().status, RegistrationStatus::Confirmed);
    assert_eq!(fx.engine.registration(&z).unwrap().status, RegistrationStatus::Waitlisted);
    assert_eq!(fx.engine.confirmed_count("friday"), 2);

    fx.engine.cancel(&x, CancelledBy::Player, "xavi").unwrap();

    assert_eq!(fx.engine.registration(&x).unwrap().status, RegistrationStatus::Cancelled);
    assert_eq!(fx.engine.registration(&z).unwrap().status, RegistrationStatus::Confirmed);
    assert_eq!(fx.engine.confirmed_count("friday"), 2);

    let promotions: Vec<_> = fx
        .transport
        .messages()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::WaitlistPromoted)
        .collect();
    assert_eq!(promotions.len(), 1);
    assert_eq!(promotions[0].registration_id, z);
}

#[test]
fn tier_mismatch_rejected_without_a_row() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("lowbies", 4, LevelTier::Tier1));

    let err = sign_up(&fx, "lowbies", "vet", 10).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Eligibility(EligibilityError::TierMismatch { level: 10, .. })
    ));
    assert!(err.is_business_rejection());
    assert_eq!(fx.engine.confirmed_count("lowbies"), 0);
    assert!(fx.engine.history("lowbies").unwrap().is_empty());
}

#[test]
fn deadline_passed_closes_signups() {
    let fx = fixture(no_approval());
    let mut past_deadline = session("sat", 4, LevelTier::Any);
    past_deadline.signup_deadline = Some(Utc::now() - Duration::hours(1));
    fx.directory.upsert(past_deadline);

    let err = sign_up(&fx, "sat", "late", 5).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Eligibility(EligibilityError::SessionNotOpen { .. })
    ));
}

#[test]
fn sixth_attempt_within_window_is_rate_limited() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 100, LevelTier::Any));

    // Five attempts pass admission (the first succeeds, the rest are
    // duplicates, which still count as attempts).
    for i in 0..5 {
        let token = fx.engine.issue_form_token().unwrap();
        let result = fx
            .engine
            .sign_up(&token, "friday", &identity("eager"), &form("eager", 5));
        if i == 0 {
            assert!(result.is_ok());
        }
    }

    let token = fx.engine.issue_form_token().unwrap();
    let err = fx
        .engine
        .sign_up(&token, "friday", &identity("eager"), &form("eager", 5))
        .unwrap_err();
    assert!(matches!(err, EngineError::Admission(AdmissionError::RateLimited)));
}

#[test]
fn form_token_is_single_use() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 4, LevelTier::Any));

    let token = fx.engine.issue_form_token().unwrap();
    fx.engine
        .sign_up(&token, "friday", &identity("ada"), &form("ada", 5))
        .unwrap();

    let err = fx
        .engine
        .sign_up(&token, "friday", &identity("bea"), &form("bea", 5))
        .unwrap_err();
    assert!(matches!(err, EngineError::Admission(AdmissionError::InvalidToken)));
}

#[test]
fn duplicate_signup_rejected_and_resignup_resurrects() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 4, LevelTier::Any));

    let first = sign_up(&fx, "friday", "ada", 5).unwrap();
    let err = sign_up(&fx, "friday", "ada", 6).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Registration(RegistrationError::DuplicateRegistration { .. })
    ));

    fx.engine.cancel(&first, CancelledBy::Player, "ada").unwrap();

    // Re-signing up reuses the same permanent row with a new snapshot.
    let second = sign_up(&fx, "friday", "ada", 8).unwrap();
    assert_eq!(second, first);
    let reg = fx.engine.registration(&second).unwrap();
    assert_eq!(reg.status, RegistrationStatus::Confirmed);
    assert_eq!(reg.character.level, 8);
}

#[test]
fn approval_gate_holds_seats_until_approved() {
    let fx = fixture(EngineConfig::default());
    fx.directory.upsert(session("friday", 1, LevelTier::Any));

    let a = sign_up(&fx, "friday", "ada", 5).unwrap();
    let b = sign_up(&fx, "friday", "bea", 5).unwrap();
    assert_eq!(fx.engine.registration(&a).unwrap().status, RegistrationStatus::Pending);
    assert_eq!(fx.engine.registration(&b).unwrap().status, RegistrationStatus::Pending);
    assert_eq!(fx.engine.confirmed_count("friday"), 0);

    fx.engine.approve(&a, "dm").unwrap();
    assert_eq!(fx.engine.registration(&a).unwrap().status, RegistrationStatus::Confirmed);

    // The single seat is now taken; the second approval must not
    // oversubscribe the table.
    let err = fx.engine.approve(&b, "dm").unwrap_err();
    assert!(matches!(err, EngineError::SessionFull { .. }));
    assert_eq!(fx.engine.registration(&b).unwrap().status, RegistrationStatus::Pending);

    fx.engine
        .reject(&b, Some("table is full this week".to_string()), "dm")
        .unwrap();
    assert_eq!(fx.engine.registration(&b).unwrap().status, RegistrationStatus::Cancelled);

    let rejected: Vec<_> = fx
        .transport
        .messages()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Rejected)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].detail.as_deref(), Some("table is full this week"));
}

#[test]
fn cancel_by_link_is_single_use() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 4, LevelTier::Any));

    let reg = sign_up(&fx, "friday", "ada", 5).unwrap();
    let link = fx.engine.issue_cancel_link(&reg).unwrap();

    fx.engine.cancel_by_link(&link).unwrap();
    assert_eq!(fx.engine.registration(&reg).unwrap().status, RegistrationStatus::Cancelled);

    let err = fx.engine.cancel_by_link(&link).unwrap_err();
    assert!(matches!(err, EngineError::Admission(AdmissionError::InvalidToken)));
}

#[test]
fn form_token_cannot_cancel_and_cancel_link_cannot_sign_up() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 4, LevelTier::Any));

    let reg = sign_up(&fx, "friday", "ada", 5).unwrap();

    let form_token = fx.engine.issue_form_token().unwrap();
    let err = fx.engine.cancel_by_link(&form_token).unwrap_err();
    assert!(matches!(err, EngineError::Admission(AdmissionError::InvalidToken)));

    let link = fx.engine.issue_cancel_link(&reg).unwrap();
    let err = fx
        .engine
        .sign_up(&link, "friday", &identity("bea"), &form("bea", 5))
        .unwrap_err();
    assert!(matches!(err, EngineError::Admission(AdmissionError::InvalidToken)));
}

#[test]
fn self_cancel_can_be_disabled() {
    let config = EngineConfig {
        require_approval: false,
        allow_self_cancel: false,
        ..EngineConfig::default()
    };
    let fx = fixture(config);
    fx.directory.upsert(session("friday", 4, LevelTier::Any));

    let reg = sign_up(&fx, "friday", "ada", 5).unwrap();
    let err = fx.engine.cancel(&reg, CancelledBy::Player, "ada").unwrap_err();
    assert!(matches!(err, EngineError::SelfCancelDisabled));

    // Admins still can.
    fx.engine.cancel(&reg, CancelledBy::Admin, "dm").unwrap();
    assert_eq!(fx.engine.registration(&reg).unwrap().status, RegistrationStatus::Cancelled);
}

#[test]
fn session_cancel_sweeps_open_registrations() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 1, LevelTier::Any));

    let a = sign_up(&fx, "friday", "ada", 5).unwrap();
    let b = sign_up(&fx, "friday", "bea", 5).unwrap();

    let cancelled = fx.engine.cancel_session("friday", "dm").unwrap();
    assert_eq!(cancelled, 2);
    assert_eq!(fx.engine.registration(&a).unwrap().status, RegistrationStatus::Cancelled);
    assert_eq!(fx.engine.registration(&b).unwrap().status, RegistrationStatus::Cancelled);

    // No one was promoted into a cancelled session's seats.
    assert!(fx
        .transport
        .messages()
        .iter()
        .all(|n| n.kind != NotificationKind::WaitlistPromoted));
}

#[test]
fn attendance_marking_and_reminders() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 4, LevelTier::Any));

    let a = sign_up(&fx, "friday", "ada", 5).unwrap();
    let b = sign_up(&fx, "friday", "bea", 5).unwrap();

    assert_eq!(fx.engine.remind("friday"), 2);
    let reminders = fx
        .transport
        .messages()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Reminder)
        .count();
    assert_eq!(reminders, 2);

    // Attendance is an after-the-fact record; the table has not been
    // played yet.
    let err = fx.engine.mark_attendance(&a, true, "dm").unwrap_err();
    assert!(matches!(err, EngineError::SessionNotCompleted { .. }));
    assert!(err.is_business_rejection());

    let mut played = session("friday", 4, LevelTier::Any);
    played.status = SessionStatus::Completed;
    fx.directory.upsert(played);

    fx.engine.mark_attendance(&a, true, "dm").unwrap();
    fx.engine.mark_attendance(&b, false, "dm").unwrap();
    assert_eq!(fx.engine.registration(&a).unwrap().status, RegistrationStatus::Attended);
    assert_eq!(fx.engine.registration(&b).unwrap().status, RegistrationStatus::NoShow);

    // Attended keeps the seat in the count; no-show frees it.
    assert_eq!(fx.engine.confirmed_count("friday"), 1);
}

#[test]
fn failing_transport_never_fails_the_operation() {
    let directory = Arc::new(InMemorySessionDirectory::new());
    directory.upsert(session("friday", 4, LevelTier::Any));
    let notices = Arc::new(InMemoryNoticeStore::new());
    let dispatcher = NotificationDispatcher::new(
        Arc::new(InMemoryTransport::with_outcome(SendOutcome::Failed)),
        Arc::clone(&notices) as _,
    );
    let engine = RegistrationEngine::new(
        no_approval(),
        Arc::clone(&directory) as _,
        Arc::new(InMemoryPlayerRegistry::new()),
        dispatcher,
    )
    .unwrap();

    let token = engine.issue_form_token().unwrap();
    let outcome = engine
        .sign_up(&token, "friday", &identity("ada"), &form("ada", 5))
        .unwrap();
    assert_eq!(outcome.status, RegistrationStatus::Confirmed);

    let records = notices.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1, SendOutcome::Failed);
}

#[test]
fn reopening_rebuilds_state_from_the_trail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.db");

    let directory = Arc::new(InMemorySessionDirectory::new());
    directory.upsert(session("friday", 2, LevelTier::Any));
    let players = Arc::new(InMemoryPlayerRegistry::new());

    let make_dispatcher = || {
        NotificationDispatcher::new(
            Arc::new(InMemoryTransport::new()),
            Arc::new(InMemoryNoticeStore::new()),
        )
    };

    let (a, z) = {
        let engine = RegistrationEngine::open(
            &path,
            no_approval(),
            Arc::clone(&directory) as _,
            Arc::clone(&players) as _,
            make_dispatcher(),
        )
        .unwrap();

        let mut ids = Vec::new();
        for name in ["ada", "bea", "zoe"] {
            let token = engine.issue_form_token().unwrap();
            ids.push(
                engine
                    .sign_up(&token, "friday", &identity(name), &form(name, 5))
                    .unwrap()
                    .registration_id,
            );
        }
        (ids.remove(0), ids.pop().unwrap())
    };

    let engine = RegistrationEngine::open(
        &path,
        no_approval(),
        Arc::clone(&directory) as _,
        Arc::clone(&players) as _,
        make_dispatcher(),
    )
    .unwrap();

    assert_eq!(engine.confirmed_count("friday"), 2);
    assert_eq!(engine.registration(&z).unwrap().status, RegistrationStatus::Waitlisted);

    // The rebuilt book arbitrates exactly like the original: cancelling a
    // confirmed seat promotes the waitlisted entry.
    engine.cancel(&a, CancelledBy::Admin, "dm").unwrap();
    assert_eq!(engine.registration(&z).unwrap().status, RegistrationStatus::Confirmed);
}

#[test]
fn concurrent_signups_never_oversubscribe() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 3, LevelTier::Any));
    let engine = Arc::new(fx.engine);

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let name = format!("player{i}");
                let token = engine.issue_form_token().unwrap();
                engine
                    .sign_up(&token, "friday", &identity(&name), &form(&name, 5))
                    .unwrap()
            })
        })
        .collect();

    let mut confirmed = 0;
    let mut waitlisted = 0;
    for handle in handles {
        match handle.join().unwrap().status {
            RegistrationStatus::Confirmed => confirmed += 1,
            RegistrationStatus::Waitlisted => waitlisted += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(confirmed, 3);
    assert_eq!(waitlisted, 7);
    assert_eq!(engine.confirmed_count("friday"), 3);
}

#[test]
fn racing_cancellations_still_backfill_the_freed_seat() {
    // One cancellation can promote a waitlisted entry just before a
    // second cancellation, aimed at that same entry, takes the session
    // lock. The second cancellation frees a seat it did not see when it
    // started, and the seat must still be backfilled from the waitlist.
    for _ in 0..50 {
        let fx = fixture(no_approval());
        fx.directory.upsert(session("friday", 1, LevelTier::Any));

        let a = sign_up(&fx, "friday", "ada", 5).unwrap();
        let b = sign_up(&fx, "friday", "bea", 5).unwrap();
        let c = sign_up(&fx, "friday", "cleo", 5).unwrap();
        assert_eq!(fx.engine.registration(&c).unwrap().status, RegistrationStatus::Waitlisted);

        let engine = Arc::new(fx.engine);
        let first = {
            let engine = Arc::clone(&engine);
            let a = a.clone();
            std::thread::spawn(move || engine.cancel(&a, CancelledBy::Admin, "dm").unwrap())
        };
        let second = {
            let engine = Arc::clone(&engine);
            let b = b.clone();
            std::thread::spawn(move || engine.cancel(&b, CancelledBy::Player, "bea").unwrap())
        };
        first.join().unwrap();
        second.join().unwrap();

        // Whichever order the cancellations land in, the last player
        // standing holds the single seat.
        assert_eq!(engine.registration(&a).unwrap().status, RegistrationStatus::Cancelled);
        assert_eq!(engine.registration(&b).unwrap().status, RegistrationStatus::Cancelled);
        assert_eq!(engine.registration(&c).unwrap().status, RegistrationStatus::Confirmed);
        assert_eq!(engine.confirmed_count("friday"), 1);
    }
}

#[test]
fn mixed_traffic_never_oversubscribes_or_strands_the_waitlist() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 2, LevelTier::Any));
    let engine = Arc::new(fx.engine);

    // Two confirmed and two waitlisted before the traffic starts.
    let seeded: Vec<String> = (0..4)
        .map(|i| {
            let name = format!("seed{i}");
            let token = engine.issue_form_token().unwrap();
            engine
                .sign_up(&token, "friday", &identity(&name), &form(&name, 5))
                .unwrap()
                .registration_id
        })
        .collect();

    let done = Arc::new(AtomicBool::new(false));
    let watcher = {
        let engine = Arc::clone(&engine);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                assert!(engine.confirmed_count("friday") <= 2);
                std::thread::yield_now();
            }
        })
    };

    let cancels: Vec<_> = seeded
        .iter()
        .take(2)
        .cloned()
        .map(|id| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.cancel(&id, CancelledBy::Admin, "dm").unwrap())
        })
        .collect();
    let arrivals: Vec<_> = (0..3)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let name = format!("late{i}");
                let token = engine.issue_form_token().unwrap();
                engine
                    .sign_up(&token, "friday", &identity(&name), &form(&name, 5))
                    .unwrap()
                    .registration_id
            })
        })
        .collect();

    let mut all = seeded.clone();
    for handle in arrivals {
        all.push(handle.join().unwrap());
    }
    for handle in cancels {
        handle.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    watcher.join().unwrap();

    // Seven sign-ups, two cancellations: five live entries for two
    // seats. No seat may sit empty while anyone is still waitlisted.
    let mut confirmed = 0;
    let mut waitlisted = 0;
    for id in &all {
        match engine.registration(id).unwrap().status {
            RegistrationStatus::Confirmed => confirmed += 1,
            RegistrationStatus::Waitlisted => waitlisted += 1,
            RegistrationStatus::Cancelled => {},
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(confirmed, 2);
    assert_eq!(waitlisted, 3);
    assert_eq!(engine.confirmed_count("friday"), 2);
}

/// A limiter backed by something other than the in-process store, standing
/// in for a shared-cache deployment. Always says no.
struct ClosedDoor;

impl AttemptLimiter for ClosedDoor {
    fn check(&self, _key: &str) -> Result<(), AdmissionError> {
        Err(AdmissionError::RateLimited)
    }
}

#[test]
fn admission_backends_are_swappable() {
    let fx = fixture(no_approval());
    fx.directory.upsert(session("friday", 4, LevelTier::Any));

    let engine = fx.engine.with_admission(
        Arc::new(TokenStore::new(TokenConfig::default())),
        Arc::new(ClosedDoor),
    );

    let token = engine.issue_form_token().unwrap();
    let err = engine
        .sign_up(&token, "friday", &identity("ada"), &form("ada", 5))
        .unwrap_err();
    assert!(matches!(err, EngineError::Admission(AdmissionError::RateLimited)));
}
