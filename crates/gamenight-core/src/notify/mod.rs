//! Best-effort notification dispatch.
//!
//! Notifications are a side effect of committed state changes, never part
//! of them. The coordinator appends to the audit trail first, then hands
//! a [`Notification`] to the [`NotificationDispatcher`], which records it
//! and attempts delivery. A transport failure is logged and swallowed; it
//! never rolls back or fails the operation that triggered it.
//!
//! # Thread Safety
//!
//! The dispatcher holds its collaborators behind `Arc<dyn Trait>` and is
//! safe to share across threads.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

/// What happened and which template to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// The sign-up was received and is pending or confirmed.
    SignupReceived,
    /// A pending registration was approved.
    Approved,
    /// A pending registration was rejected.
    Rejected,
    /// A waitlisted registration now holds a seat.
    WaitlistPromoted,
    /// The registration was cancelled.
    Cancelled,
    /// Upcoming-session reminder for a confirmed registration.
    Reminder,
}

impl NotificationKind {
    /// Stable key identifying the message template.
    #[must_use]
    pub const fn template_key(self) -> &'static str {
        match self {
            Self::SignupReceived => "signup_received",
            Self::Approved => "signup_approved",
            Self::Rejected => "signup_rejected",
            Self::WaitlistPromoted => "waitlist_promoted",
            Self::Cancelled => "registration_cancelled",
            Self::Reminder => "session_reminder",
        }
    }
}

/// One message to one recipient about one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Which template this message uses.
    pub kind: NotificationKind,
    /// Recipient address, already normalized.
    pub recipient: String,
    /// Session the message is about.
    pub session_id: String,
    /// Registration the message is about.
    pub registration_id: String,
    /// Free-form detail line, e.g. a rejection reason.
    pub detail: Option<String>,
}

/// Delivery result reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport accepted the message.
    Sent,
    /// The transport is temporarily unavailable; the notice record is the
    /// fallback.
    Deferred,
    /// The transport rejected the message.
    Failed,
}

/// Delivery channel for rendered notifications.
pub trait EmailTransport: Send + Sync {
    /// Attempts to deliver one notification.
    fn send(&self, notification: &Notification) -> SendOutcome;
}

/// Durable record of every notification the engine decided to send,
/// regardless of delivery outcome.
pub trait NoticeStore: Send + Sync {
    /// Records a notification and the outcome of its delivery attempt.
    fn record(&self, notification: &Notification, outcome: SendOutcome);
}

/// Transport that collects messages in memory, with a configurable
/// outcome. Used in tests and as the default for engines without a real
/// mail channel.
#[derive(Debug)]
pub struct InMemoryTransport {
    outcome: SendOutcome,
    sent: Mutex<Vec<Notification>>,
}

impl InMemoryTransport {
    /// Creates a transport that reports every message as delivered.
    #[must_use]
    pub fn new() -> Self {
        Self::with_outcome(SendOutcome::Sent)
    }

    /// Creates a transport that reports the given outcome for every
    /// message.
    #[must_use]
    pub fn with_outcome(outcome: SendOutcome) -> Self {
        Self {
            outcome,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of every message handed to this transport.
    #[must_use]
    pub fn messages(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailTransport for InMemoryTransport {
    fn send(&self, notification: &Notification) -> SendOutcome {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        self.outcome
    }
}

/// Notice store that keeps records in memory.
#[derive(Debug, Default)]
pub struct InMemoryNoticeStore {
    records: Mutex<Vec<(Notification, SendOutcome)>>,
}

impl InMemoryNoticeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded notifications with their outcomes.
    #[must_use]
    pub fn records(&self) -> Vec<(Notification, SendOutcome)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NoticeStore for InMemoryNoticeStore {
    fn record(&self, notification: &Notification, outcome: SendOutcome) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((notification.clone(), outcome));
    }
}

/// Fans committed state changes out to the transport and notice store.
pub struct NotificationDispatcher {
    transport: Arc<dyn EmailTransport>,
    notices: Arc<dyn NoticeStore>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher over the given transport and store.
    #[must_use]
    pub fn new(transport: Arc<dyn EmailTransport>, notices: Arc<dyn NoticeStore>) -> Self {
        Self { transport, notices }
    }

    /// Records and attempts delivery of one notification.
    ///
    /// Infallible by contract: the state change behind this notification
    /// is already committed, so failures are logged and recorded but
    /// never surfaced to the caller.
    pub fn dispatch(&self, notification: &Notification) {
        let outcome = self.transport.send(notification);
        self.notices.record(notification, outcome);

        match outcome {
            SendOutcome::Sent => {
                debug!(
                    template = notification.kind.template_key(),
                    registration_id = %notification.registration_id,
                    "notification sent"
                );
            },
            SendOutcome::Deferred | SendOutcome::Failed => {
                warn!(
                    template = notification.kind.template_key(),
                    registration_id = %notification.registration_id,
                    ?outcome,
                    "notification delivery failed, notice record kept"
                );
            },
        }
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(kind: NotificationKind) -> Notification {
        Notification {
            kind,
            recipient: "mira@example.com".to_string(),
            session_id: "s-1".to_string(),
            registration_id: "r-1".to_string(),
            detail: None,
        }
    }

    #[test]
    fn test_dispatch_records_and_sends() {
        let transport = Arc::new(InMemoryTransport::new());
        let notices = Arc::new(InMemoryNoticeStore::new());
        let dispatcher =
            NotificationDispatcher::new(Arc::clone(&transport) as _, Arc::clone(&notices) as _);

        dispatcher.dispatch(&notification(NotificationKind::Approved));

        assert_eq!(transport.messages().len(), 1);
        let records = notices.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, SendOutcome::Sent);
    }

    #[test]
    fn test_failed_delivery_still_recorded() {
        let transport = Arc::new(InMemoryTransport::with_outcome(SendOutcome::Failed));
        let notices = Arc::new(InMemoryNoticeStore::new());
        let dispatcher =
            NotificationDispatcher::new(Arc::clone(&transport) as _, Arc::clone(&notices) as _);

        // Does not panic or return an error.
        dispatcher.dispatch(&notification(NotificationKind::WaitlistPromoted));

        let records = notices.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, SendOutcome::Failed);
    }

    #[test]
    fn test_template_keys_distinct() {
        let kinds = [
            NotificationKind::SignupReceived,
            NotificationKind::Approved,
            NotificationKind::Rejected,
            NotificationKind::WaitlistPromoted,
            NotificationKind::Cancelled,
            NotificationKind::Reminder,
        ];
        let keys: std::collections::HashSet<_> =
            kinds.iter().map(|k| k.template_key()).collect();
        assert_eq!(keys.len(), kinds.len());
    }
}
