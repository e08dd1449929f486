//! Error types used by the activation runtime, sessions, and transactions.
//!
//! The main enums are:
//!
//! - [`ActivationError`] — fatal errors raised by activation/deactivation.
//! - [`SessionError`] — per-delivery errors raised inside a handler session.
//! - [`TxError`] — transaction state-machine and two-phase-commit errors.
//! - [`BrokerError`] — errors surfaced by the broker collaborator.
//! - [`HandlerError`] — failures returned by user handler callbacks.
//! - [`HostError`] — component start/stop failures in the host container.
//!
//! Recoverable conditions ([`SessionError::ConnectionLost`],
//! [`SessionError::Handler`], [`SessionError::TxTimeout`]) are handled
//! locally by the session and its reconnect supervisor; they never abort an
//! activation. [`ActivationError`] variants are fatal and propagate to the
//! caller of `activate`/`deactivate`.

use std::time::Duration;
use thiserror::Error;

/// # Fatal errors raised by activation and deactivation.
///
/// These abort the whole activation and carry structured context
/// (offending field, destination, failing session count, last cause).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ActivationError {
    /// The activation spec failed validation; `field` names the offender.
    #[error("invalid activation spec: {field}: {reason}")]
    Configuration {
        /// Name of the offending spec field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The pool could not reach its target size within the reconnect budget.
    ///
    /// Activation is all-or-nothing: every already-created session has been
    /// torn down by the time this is returned.
    #[error(
        "activation of '{destination}' aborted: {failed_sessions} session(s) \
         could not connect: {last_error}"
    )]
    ResourceExhausted {
        /// Destination the activation targeted.
        destination: String,
        /// Number of sessions that never reached Active.
        failed_sessions: usize,
        /// Last underlying connect failure.
        last_error: String,
    },

    /// Deactivation grace period was exceeded; some sessions remained stuck.
    #[error("deactivate grace {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of sessions that did not stop in time.
        stuck: Vec<String>,
    },
}

impl ActivationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ActivationError::Configuration { .. } => "activation_configuration",
            ActivationError::ResourceExhausted { .. } => "activation_resource_exhausted",
            ActivationError::GraceExceeded { .. } => "activation_grace_exceeded",
        }
    }
}

/// # Errors raised inside one handler session.
///
/// Only [`SessionError::ConnectionLost`] routes a session to its reconnect
/// supervisor; a handler failure or transaction timeout rolls the delivery
/// back and leaves the session active.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SessionError {
    /// The transport failed; the broker redelivers anything uncommitted.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Transport-level cause.
        reason: String,
    },

    /// The handler callback returned an error for this delivery.
    #[error("handler failed: {error}")]
    Handler {
        /// The handler's error message.
        error: String,
    },

    /// Commit/rollback was not invoked within the transaction window.
    #[error("transaction timed out after {timeout:?}")]
    TxTimeout {
        /// The timeout window that was exceeded.
        timeout: Duration,
    },
}

impl SessionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionError::ConnectionLost { .. } => "session_connection_lost",
            SessionError::Handler { .. } => "session_handler_failed",
            SessionError::TxTimeout { .. } => "session_tx_timeout",
        }
    }

    /// True only for transport faults — the one condition that triggers
    /// reconnection. Handler failures never do.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, SessionError::ConnectionLost { .. })
    }
}

/// # Transaction state-machine and two-phase-commit errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TxError {
    /// `begin` was called while a transaction was already in flight
    /// for the same session.
    #[error("a transaction is already active for this session")]
    AlreadyActive,

    /// The operation requires an `Active` transaction.
    #[error("no active transaction")]
    NotActive,

    /// The transaction was marked rollback-only; it has been rolled back.
    #[error("transaction is rollback-only; rolled back")]
    RollbackOnly,

    /// The transaction window elapsed before commit; it has been rolled back.
    #[error("transaction timed out after {timeout:?}; rolled back")]
    Timeout {
        /// The configured transaction timeout.
        timeout: Duration,
    },

    /// A participant voted no during prepare; everything was rolled back.
    #[error("resource '{resource}' failed prepare: {reason}; rolled back")]
    PrepareFailed {
        /// Name of the failing participant.
        resource: String,
        /// The participant's reason.
        reason: String,
    },

    /// A participant failed *after* voting yes in prepare.
    ///
    /// The transaction is committed — the inbound acknowledgment and every
    /// other participant went through — but this participant's outcome is
    /// in doubt. Never triggers redelivery: a commit in doubt must not be
    /// replayed as if it rolled back.
    #[error("resource '{resource}' failed during commit phase: {reason}")]
    Heuristic {
        /// Name of the participant whose outcome is in doubt.
        resource: String,
        /// The participant's failure.
        reason: String,
    },

    /// The transaction already reached a terminal outcome.
    #[error("transaction already completed")]
    Completed,
}

impl TxError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TxError::AlreadyActive => "tx_already_active",
            TxError::NotActive => "tx_not_active",
            TxError::RollbackOnly => "tx_rollback_only",
            TxError::Timeout { .. } => "tx_timeout",
            TxError::PrepareFailed { .. } => "tx_prepare_failed",
            TxError::Heuristic { .. } => "tx_heuristic",
            TxError::Completed => "tx_completed",
        }
    }
}

/// # Errors surfaced by the broker collaborator.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The transport failed mid-operation.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Transport-level cause.
        reason: String,
    },

    /// The connection or consumer was closed.
    #[error("connection closed")]
    Closed,

    /// The destination does not exist on the broker.
    #[error("no such destination: {destination}")]
    NoSuchDestination {
        /// The missing destination name.
        destination: String,
    },
}

/// # Failure returned by a user handler callback.
///
/// Rolls the current delivery back; the broker redelivers per its policy.
/// The session itself stays active.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler could not process this delivery.
    #[error("{error}")]
    Fail {
        /// The handler's error message.
        error: String,
    },
}

impl HandlerError {
    /// Convenience constructor from any displayable error.
    pub fn fail(error: impl std::fmt::Display) -> Self {
        HandlerError::Fail {
            error: error.to_string(),
        }
    }
}

/// # Component start/stop failure in the host container.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HostError {
    /// A component failed to start or stop.
    #[error("component '{name}' failed: {reason}")]
    Component {
        /// Component name.
        name: String,
        /// Underlying cause.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_loss_routes_to_reconnect() {
        let lost = SessionError::ConnectionLost {
            reason: "broken pipe".into(),
        };
        assert!(lost.is_connection_loss());

        let handler = SessionError::Handler {
            error: "boom".into(),
        };
        assert!(!handler.is_connection_loss());
    }

    #[test]
    fn labels_are_stable() {
        let err = ActivationError::Configuration {
            field: "session_count",
            reason: "must be at least 1".into(),
        };
        assert_eq!(err.as_label(), "activation_configuration");

        let err = TxError::Timeout {
            timeout: Duration::from_secs(1),
        };
        assert_eq!(err.as_label(), "tx_timeout");
    }
}
