//! # Runtime events emitted by the activation manager and handler sessions.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Activation events**: pool-level lifecycle (started, stopped, grace)
//! - **Session events**: per-session state (connecting, active, exhausted)
//! - **Delivery events**: per-message outcomes (committed, rolled back)
//! - **Subscriber events**: fan-out diagnostics (panic, overflow)
//!
//! The [`Event`] struct carries metadata such as timestamps, session name,
//! attempt counters, delays, and error text.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore the exact order when events are
//! delivered out of order (the `PoolTracker` relies on this).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `session` (subscriber name), `error`.
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `session` (subscriber name), `error` (reason).
    SubscriberOverflow,

    // === Activation events ===
    /// The pool reached its target size and the activation is live.
    ///
    /// Sets: `attempt` (session count).
    ActivationStarted,

    /// Deactivation was requested; sessions are being stopped.
    DeactivateRequested,

    /// Every session stopped within the configured grace period.
    ActivationStopped,

    /// Grace period exceeded; some sessions did not stop in time.
    GraceExceeded,

    // === Session events ===
    /// A session is attempting to (re)connect.
    ///
    /// Sets: `session`, `attempt` (connect try, 1-based).
    SessionConnecting,

    /// A session holds a healthy connection and consumer.
    ///
    /// Sets: `session`.
    SessionActive,

    /// A session observed a transport fault.
    ///
    /// Sets: `session`, `error` (transport cause).
    ConnectionLost,

    /// The next reconnect attempt was scheduled.
    ///
    /// Sets: `session`, `attempt` (failed tries so far), `delay_ms`, `error`.
    ReconnectScheduled,

    /// A session exhausted its reconnect budget and is terminally failed.
    ///
    /// Sets: `session`, `attempt` (tries consumed).
    SessionExhausted,

    /// A replacement session was spawned for an exhausted one.
    ///
    /// Sets: `session`.
    SessionReplaced,

    /// A session stopped (deactivation or terminal failure cleanup).
    ///
    /// Sets: `session`.
    SessionStopped,

    // === Delivery events ===
    /// A delivery's transaction committed; the message is acknowledged.
    ///
    /// Sets: `session`, `message_id`.
    DeliveryCommitted,

    /// A delivery's transaction rolled back; the broker will redeliver.
    ///
    /// Sets: `session`, `message_id`, `error` (cause).
    DeliveryRolledBack,

    /// The handler callback failed for a delivery (session stays active).
    ///
    /// Sets: `session`, `message_id`, `error`.
    HandlerFailed,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Session (or subscriber) name, if applicable.
    pub session: Option<Arc<str>>,
    /// Attempt count (connect tries, 1-based).
    pub attempt: Option<u32>,
    /// Delay before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Broker message id, for delivery events.
    pub message_id: Option<u64>,
    /// Human-readable error/reason text.
    pub error: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next
    /// sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            session: None,
            attempt: None,
            delay_ms: None,
            message_id: None,
            error: None,
        }
    }

    /// Attaches a session name.
    #[inline]
    pub fn with_session(mut self, session: impl Into<Arc<str>>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a broker message id.
    #[inline]
    pub fn with_message_id(mut self, id: u64) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Attaches a human-readable error/reason.
    #[inline]
    pub fn with_error(mut self, error: impl Into<Arc<str>>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_session(subscriber)
            .with_error(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_session(subscriber)
            .with_error(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::now(EventKind::SessionActive);
        let b = Event::now(EventKind::SessionActive);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::ReconnectScheduled)
            .with_session("orders-3")
            .with_attempt(2)
            .with_delay(Duration::from_millis(250))
            .with_error("connection refused");

        assert_eq!(ev.session.as_deref(), Some("orders-3"));
        assert_eq!(ev.attempt, Some(2));
        assert_eq!(ev.delay_ms, Some(250));
        assert_eq!(ev.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn delay_saturates_at_u32() {
        let ev = Event::now(EventKind::ReconnectScheduled)
            .with_delay(Duration::from_secs(u64::MAX / 1_000_000));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
