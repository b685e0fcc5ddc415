//! Core engine for recurring tabletop session sign-ups.
//!
//! `gamenight-core` takes a sign-up request from "the form was submitted"
//! to a final seat at the table: one-time token and rate-limit admission,
//! eligibility validation against the session's schedule and level tier,
//! capacity arbitration with a FIFO waitlist, DM approval, cancellation
//! with automatic promotion, and best-effort notifications.
//!
//! # Architecture
//!
//! The append-only audit trail ([`audit`]) is the source of truth. Every
//! lifecycle change is an event appended to it; the in-memory projection
//! ([`registration::RegistrationBook`]) is rebuilt by replay and answers
//! all queries. The coordinator ([`engine::RegistrationEngine`]) runs
//! capacity-affecting operations under a per-session lock ([`capacity`]),
//! so the confirmed count it reads is the count its decision lands on.
//!
//! Scheduling and identity stay outside: sessions come from a
//! [`directory::SessionDirectory`] and players from a
//! [`directory::PlayerRegistry`], both behind traits with in-memory
//! implementations for small deployments and tests.

pub mod admission;
pub mod audit;
pub mod capacity;
pub mod config;
pub mod directory;
pub mod eligibility;
pub mod engine;
pub mod notify;
pub mod registration;
pub mod tier;

pub use config::EngineConfig;
pub use engine::{ApiResponse, EngineError, RegistrationEngine, SignupOutcome};
pub use registration::{Registration, RegistrationStatus};
