//! # Reconnect supervisor for one handler session.
//!
//! [`Reconnector`] owns a session's path back to a healthy connection:
//! it attempts connection at the configured interval, consumes the retry
//! budget, and observes cancellation at every retry boundary. Exactly one
//! attempt is in flight per session at any time — the loop is sequential.
//!
//! The same supervisor drives the *initial* connection during activation,
//! so activation and recovery share one budget policy.
//!
//! ## Flow
//! ```text
//! connect(token)
//! loop {
//!   ├─► cancelled? → Canceled
//!   ├─► publish SessionConnecting{attempt}
//!   ├─► broker.connect() + create_consumer()
//!   │       ├─ Ok  → return (connection, consumer)
//!   │       └─ Err → budget spent? → Exhausted{tries, last_error}
//!   ├─► publish ReconnectScheduled{delay, attempt}
//!   └─► sleep(interval ± jitter)   (cancellable)
//! }
//! ```

use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Connection, Consumer, ConsumerOptions};
use crate::error::BrokerError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::ReconnectPolicy;
use crate::spec::ActivationSpec;

/// Why a connect loop gave up.
pub(crate) enum ConnectFailure {
    /// The runtime token was cancelled (deactivation).
    Canceled,
    /// The retry budget is spent; the session goes terminally failed.
    Exhausted {
        /// Total connection tries consumed.
        tries: u32,
        /// Last underlying connect error.
        last_error: String,
    },
}

/// Drives (re)connection for exactly one session.
pub(crate) struct Reconnector {
    session: Arc<str>,
    spec: Arc<ActivationSpec>,
    policy: ReconnectPolicy,
    broker: Arc<dyn Broker>,
    bus: Bus,
}

impl Reconnector {
    pub(crate) fn new(
        session: Arc<str>,
        spec: Arc<ActivationSpec>,
        broker: Arc<dyn Broker>,
        bus: Bus,
    ) -> Self {
        let policy = spec.reconnect_policy();
        Self {
            session,
            spec,
            policy,
            broker,
            bus,
        }
    }

    /// Runs the connect loop until success, cancellation, or exhaustion.
    ///
    /// Cancellation is observed before every try and during every
    /// inter-attempt sleep, never only at the start.
    pub(crate) async fn connect(
        &self,
        token: &CancellationToken,
    ) -> Result<(Arc<dyn Connection>, Arc<dyn Consumer>), ConnectFailure> {
        let mut attempt: u32 = 0;
        loop {
            if token.is_cancelled() {
                return Err(ConnectFailure::Canceled);
            }
            attempt += 1;
            self.bus.publish(
                Event::now(EventKind::SessionConnecting)
                    .with_session(self.session.clone())
                    .with_attempt(attempt),
            );

            let error = match self.try_connect().await {
                Ok(pair) => return Ok(pair),
                Err(err) => err,
            };

            // Try number `attempt` just failed; `attempt - 1` of those were
            // retries beyond the first try.
            if self.policy.retry_exhausted(attempt - 1) {
                return Err(ConnectFailure::Exhausted {
                    tries: attempt,
                    last_error: error.to_string(),
                });
            }

            let delay = self.policy.delay();
            self.bus.publish(
                Event::now(EventKind::ReconnectScheduled)
                    .with_session(self.session.clone())
                    .with_attempt(attempt)
                    .with_delay(delay)
                    .with_error(error.to_string()),
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = token.cancelled() => return Err(ConnectFailure::Canceled),
            }
        }
    }

    /// One connection try: transport, metadata tags, consumer.
    async fn try_connect(
        &self,
    ) -> Result<(Arc<dyn Connection>, Arc<dyn Consumer>), BrokerError> {
        let connection = self.broker.connect().await?;
        connection.set_metadata("pool", &self.spec.destination);
        connection.set_metadata("session", &self.session);

        let options = ConsumerOptions {
            window: self.spec.window(),
            max_delivery_attempts: self.spec.max_delivery_attempts,
        };
        match connection
            .create_consumer(&self.spec.destination, options)
            .await
        {
            Ok(consumer) => Ok((connection, consumer)),
            Err(err) => {
                connection.close().await;
                Err(err)
            }
        }
    }
}
