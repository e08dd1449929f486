//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] forwards events to `tracing` in a terse, greppable format.
//! Enabled via the `logging` feature; primarily useful for development,
//! demos, and operational spot checks. Implement a custom
//! [`Subscribe`](crate::subscribers::Subscribe) for structured metrics.

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Tracing-backed logging subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Creates a new writer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let session = e.session.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ActivationStarted => {
                tracing::info!(sessions = e.attempt, "activation started");
            }
            EventKind::DeactivateRequested => {
                tracing::info!("deactivate requested");
            }
            EventKind::ActivationStopped => {
                tracing::info!("activation stopped");
            }
            EventKind::GraceExceeded => {
                tracing::warn!("deactivate grace exceeded");
            }
            EventKind::SessionConnecting => {
                tracing::debug!(session, attempt = e.attempt, "connecting");
            }
            EventKind::SessionActive => {
                tracing::info!(session, "active");
            }
            EventKind::ConnectionLost => {
                tracing::warn!(session, error = e.error.as_deref(), "connection lost");
            }
            EventKind::ReconnectScheduled => {
                tracing::info!(
                    session,
                    attempt = e.attempt,
                    delay_ms = e.delay_ms,
                    error = e.error.as_deref(),
                    "reconnect scheduled"
                );
            }
            EventKind::SessionExhausted => {
                tracing::error!(
                    session,
                    tries = e.attempt,
                    error = e.error.as_deref(),
                    "reconnect budget exhausted"
                );
            }
            EventKind::SessionReplaced => {
                tracing::info!(session, "replacement session spawned");
            }
            EventKind::SessionStopped => {
                tracing::info!(session, "stopped");
            }
            EventKind::DeliveryCommitted => {
                tracing::debug!(session, message = e.message_id, "committed");
            }
            EventKind::DeliveryRolledBack => {
                tracing::debug!(
                    session,
                    message = e.message_id,
                    error = e.error.as_deref(),
                    "rolled back"
                );
            }
            EventKind::HandlerFailed => {
                tracing::warn!(
                    session,
                    message = e.message_id,
                    error = e.error.as_deref(),
                    "handler failed"
                );
            }
            EventKind::SubscriberPanicked | EventKind::SubscriberOverflow => {
                tracing::warn!(
                    subscriber = session,
                    error = e.error.as_deref(),
                    "subscriber fault"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
