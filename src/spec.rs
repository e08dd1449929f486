//! # Activation specification.
//!
//! [`ActivationSpec`] is the configuration surface for one activation: which
//! destination to consume, how many sessions to run, and the timeout/retry
//! knobs each session obeys. The spec is validated once by
//! `ActivationManager::activate` and is immutable afterwards.
//!
//! ## Sentinel mapping
//! External configuration commonly uses `-1` sentinels; they map onto typed
//! enums here:
//! - reconnect attempts `-1` → [`RetryLimit::Infinite`]
//! - max delivery attempts `-1` → [`DeliveryLimit::Unlimited`]
//! - confirmation window `-1` → unlimited (`window()` returns `None`)
//!
//! `call_timeout = 0` is *not* a sentinel: it is a valid value meaning a
//! non-blocking receive poll.

use std::time::Duration;

use crate::error::ActivationError;
use crate::policies::{JitterPolicy, ReconnectPolicy, RetryLimit};

/// Kind of destination an activation consumes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationKind {
    /// Point-to-point: each message is delivered to exactly one session.
    Queue,
    /// Publish-subscribe: each subscription observes every message.
    Topic,
}

/// Bound on broker-side delivery attempts for one message.
///
/// After a rollback the broker redelivers until this limit is reached;
/// beyond it the message is parked on the broker (dead-lettered).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryLimit {
    /// At most this many delivery attempts per message.
    Limited(u32),
    /// Redeliver forever.
    Unlimited,
}

impl DeliveryLimit {
    /// True once `attempts` has reached the limit.
    pub fn reached(&self, attempts: u32) -> bool {
        match self {
            DeliveryLimit::Limited(max) => attempts >= *max,
            DeliveryLimit::Unlimited => false,
        }
    }
}

/// What the activation does when a session exhausts its reconnect budget.
///
/// The pool is never silently resized; this makes the recovery policy an
/// explicit configuration decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExhaustedAction {
    /// Leave the pool degraded; operators observe the deficit via
    /// [`PoolTracker`](crate::subscribers::PoolTracker) (default).
    #[default]
    Degrade,
    /// Spawn a replacement session with a fresh reconnect budget.
    Replace,
}

/// Specification for activating a pool of handler sessions.
///
/// Bundles the destination, pool size, and per-session retry/timeout knobs.
/// Construct with [`ActivationSpec::new`], adjust with the `with_*` setters,
/// then hand to `ActivationManager::activate`. Immutable once an activation
/// starts.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use inflow::{ActivationSpec, DestinationKind, RetryLimit};
///
/// let spec = ActivationSpec::new("orders", DestinationKind::Queue)
///     .with_session_count(10)
///     .with_reconnect_attempts(RetryLimit::Infinite)
///     .with_reconnect_interval(Duration::from_millis(250))
///     .with_call_timeout(Duration::from_millis(500));
///
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct ActivationSpec {
    /// Destination name on the broker.
    pub destination: String,
    /// Queue or topic.
    pub destination_kind: DestinationKind,
    /// Number of concurrent handler sessions (>= 1).
    pub session_count: usize,
    /// Reconnect budget: retries after a failed connect.
    pub reconnect_attempts: RetryLimit,
    /// Spacing between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Optional jitter applied to the reconnect spacing.
    pub reconnect_jitter: JitterPolicy,
    /// Maximum wait for a single receive; `0` = non-blocking poll.
    pub call_timeout: Duration,
    /// Window within which each delivery's transaction must complete;
    /// `0` = no timeout.
    pub transaction_timeout: Duration,
    /// Broker-side bound on delivery attempts per message.
    pub max_delivery_attempts: DeliveryLimit,
    /// Confirmation/prefetch window: in-flight delivery credit per consumer.
    /// `-1` = unlimited, otherwise must be positive.
    pub confirmation_window: i32,
    /// Policy for sessions that exhaust their reconnect budget.
    pub on_exhausted: ExhaustedAction,
}

impl ActivationSpec {
    /// Creates a spec with defaults:
    ///
    /// - `session_count = 1`
    /// - `reconnect_attempts = Infinite`, `reconnect_interval = 2s`, no jitter
    /// - `call_timeout = 1s`, `transaction_timeout = 0` (none)
    /// - `max_delivery_attempts = Limited(10)`, `confirmation_window = -1`
    /// - `on_exhausted = Degrade`
    pub fn new(destination: impl Into<String>, kind: DestinationKind) -> Self {
        Self {
            destination: destination.into(),
            destination_kind: kind,
            session_count: 1,
            reconnect_attempts: RetryLimit::Infinite,
            reconnect_interval: Duration::from_secs(2),
            reconnect_jitter: JitterPolicy::None,
            call_timeout: Duration::from_secs(1),
            transaction_timeout: Duration::ZERO,
            max_delivery_attempts: DeliveryLimit::Limited(10),
            confirmation_window: -1,
            on_exhausted: ExhaustedAction::default(),
        }
    }

    /// Sets the number of concurrent sessions.
    pub fn with_session_count(mut self, n: usize) -> Self {
        self.session_count = n;
        self
    }

    /// Sets the reconnect retry budget.
    pub fn with_reconnect_attempts(mut self, limit: RetryLimit) -> Self {
        self.reconnect_attempts = limit;
        self
    }

    /// Sets the spacing between reconnect attempts.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Sets the jitter applied to reconnect spacing.
    pub fn with_reconnect_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Sets the receive wait; `Duration::ZERO` makes receive a poll.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the per-delivery transaction window; `Duration::ZERO` disables it.
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Sets the broker-side delivery attempt bound.
    pub fn with_max_delivery_attempts(mut self, limit: DeliveryLimit) -> Self {
        self.max_delivery_attempts = limit;
        self
    }

    /// Sets the confirmation/prefetch window (`-1` = unlimited).
    pub fn with_confirmation_window(mut self, window: i32) -> Self {
        self.confirmation_window = window;
        self
    }

    /// Sets the exhausted-session policy.
    pub fn with_on_exhausted(mut self, action: ExhaustedAction) -> Self {
        self.on_exhausted = action;
        self
    }

    /// Validates the spec, naming the offending field on failure.
    pub fn validate(&self) -> Result<(), ActivationError> {
        if self.destination.is_empty() {
            return Err(ActivationError::Configuration {
                field: "destination",
                reason: "must not be empty".into(),
            });
        }
        if self.session_count == 0 {
            return Err(ActivationError::Configuration {
                field: "session_count",
                reason: "must be at least 1".into(),
            });
        }
        if self.confirmation_window == 0 || self.confirmation_window < -1 {
            return Err(ActivationError::Configuration {
                field: "confirmation_window",
                reason: "must be positive or -1 for unlimited".into(),
            });
        }
        if let DeliveryLimit::Limited(0) = self.max_delivery_attempts {
            return Err(ActivationError::Configuration {
                field: "max_delivery_attempts",
                reason: "a limit of 0 would never deliver; use Unlimited or a positive bound"
                    .into(),
            });
        }
        Ok(())
    }

    /// The per-transaction timeout as an `Option` (`0` = none).
    #[inline]
    pub fn tx_timeout(&self) -> Option<Duration> {
        if self.transaction_timeout == Duration::ZERO {
            None
        } else {
            Some(self.transaction_timeout)
        }
    }

    /// The confirmation window as an `Option` (`-1` = unlimited).
    #[inline]
    pub fn window(&self) -> Option<u32> {
        if self.confirmation_window < 0 {
            None
        } else {
            Some(self.confirmation_window as u32)
        }
    }

    /// The reconnect policy derived from this spec.
    #[inline]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            attempts: self.reconnect_attempts,
            interval: self.reconnect_interval,
            jitter: self.reconnect_jitter,
        }
    }
}
