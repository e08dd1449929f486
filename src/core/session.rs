//! # Handler session: one connection-bound transactional worker.
//!
//! A [`HandlerSession`] owns one connection and one consumer and drives the
//! delivery cycle:
//!
//! ```text
//! Disconnected ──connect──► Active ──receive──► Delivering ──┬─► Active
//!      ▲                      │                              │
//!      │                      │ fault signal /               │ commit ok /
//!      │                      │ receive error                │ handler err
//!      └──Reconnector◄────────┴──────────────────────────────┘
//!            │
//!            └─ budget spent ──► Failed (terminal, SessionExhausted)
//! ```
//!
//! ## Rules
//! - Deliveries are **strictly sequential**: the next receive does not start
//!   until the previous transaction reached a terminal outcome.
//! - Exactly one transaction is in flight per session, enforced by the
//!   session's [`TxCoordinator`].
//! - A receive timeout with no message is not an error — the session loops.
//! - A handler error rolls the delivery back and the session **stays
//!   active**; only connection loss hands control to the reconnect
//!   supervisor.
//! - Commit happens only while the connection is still healthy; the inbound
//!   participant's prepare vote enforces this broker-side.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker::{Connection, Consumer, Message};
use crate::error::{HandlerError, SessionError, TxError};
use crate::events::{Bus, Event, EventKind};
use crate::handlers::HandlerRef;
use crate::spec::ActivationSpec;
use crate::tx::{InboundResource, TxCoordinator};

use super::reconnect::{ConnectFailure, Reconnector};

/// How a session's run loop ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SessionExit {
    /// Cancelled by deactivation.
    Stopped,
    /// Reconnect budget spent; terminally failed.
    Exhausted,
}

/// One connection-bound worker that receives and transactionally processes
/// messages.
pub(crate) struct HandlerSession {
    name: Arc<str>,
    spec: Arc<ActivationSpec>,
    handler: HandlerRef,
    coordinator: TxCoordinator,
    reconnector: Reconnector,
    bus: Bus,
    connection: Option<Arc<dyn Connection>>,
    consumer: Option<Arc<dyn Consumer>>,
    /// Whether `SessionActive` has been published for the current connection.
    announced: bool,
}

impl HandlerSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: Arc<str>,
        spec: Arc<ActivationSpec>,
        handler: HandlerRef,
        coordinator: TxCoordinator,
        reconnector: Reconnector,
        bus: Bus,
        connection: Option<Arc<dyn Connection>>,
        consumer: Option<Arc<dyn Consumer>>,
    ) -> Self {
        Self {
            name,
            spec,
            handler,
            coordinator,
            reconnector,
            bus,
            connection,
            consumer,
            announced: false,
        }
    }

    /// Runs the session until deactivation or reconnect exhaustion.
    pub(crate) async fn run(mut self, token: CancellationToken) -> SessionExit {
        let exit = loop {
            if token.is_cancelled() {
                break SessionExit::Stopped;
            }

            let (connection, consumer) = match (&self.connection, &self.consumer) {
                (Some(c), Some(s)) => (Arc::clone(c), Arc::clone(s)),
                _ => match self.reconnector.connect(&token).await {
                    Ok((connection, consumer)) => {
                        self.connection = Some(Arc::clone(&connection));
                        self.consumer = Some(Arc::clone(&consumer));
                        self.announced = false;
                        (connection, consumer)
                    }
                    Err(ConnectFailure::Canceled) => break SessionExit::Stopped,
                    Err(ConnectFailure::Exhausted { tries, last_error }) => {
                        self.bus.publish(
                            Event::now(EventKind::SessionExhausted)
                                .with_session(self.name.clone())
                                .with_attempt(tries)
                                .with_error(last_error),
                        );
                        break SessionExit::Exhausted;
                    }
                },
            };

            if !self.announced {
                self.announced = true;
                self.bus
                    .publish(Event::now(EventKind::SessionActive).with_session(self.name.clone()));
            }

            let fault = connection.fault_signal();
            tokio::select! {
                _ = token.cancelled() => break SessionExit::Stopped,
                _ = fault.cancelled() => {
                    self.connection_lost("transport fault").await;
                }
                received = consumer.receive(self.spec.call_timeout) => match received {
                    Ok(Some(message)) => {
                        // Handler failures and transaction timeouts are
                        // recoverable in place; only connection loss hands
                        // the session to its reconnect supervisor.
                        if let Err(err) = self.deliver(message, &connection, &consumer, &fault).await
                        {
                            if err.is_connection_loss() {
                                self.connection_lost(&err.to_string()).await;
                            }
                        }
                    }
                    Ok(None) => {
                        // call_timeout of zero is a poll; don't starve the
                        // runtime when the queue is empty.
                        if self.spec.call_timeout.is_zero() {
                            tokio::task::yield_now().await;
                        }
                    }
                    Err(err) => {
                        self.connection_lost(&err.to_string()).await;
                    }
                }
            }
        };

        self.finish(exit).await
    }

    /// One delivery: begin, enlist inbound, invoke handler, settle.
    ///
    /// The returned error classifies the outcome for the run loop;
    /// everything observable (rollback, events) has already happened.
    async fn deliver(
        &mut self,
        message: Message,
        connection: &Arc<dyn Connection>,
        consumer: &Arc<dyn Consumer>,
        fault: &CancellationToken,
    ) -> Result<(), SessionError> {
        let message_id = message.id;
        let tx = match self.coordinator.begin(self.spec.tx_timeout()) {
            Ok(tx) => tx,
            Err(err) => {
                // Session invariant broken; give the delivery back.
                self.publish_rolled_back(message_id, &err.to_string());
                let _ = consumer.reject(&message).await;
                return Ok(());
            }
        };

        if let Err(err) = tx.enlist(InboundResource::new(Arc::clone(consumer), message.clone())) {
            self.publish_rolled_back(message_id, &err.to_string());
            let _ = self.coordinator.rollback().await;
            let _ = consumer.reject(&message).await;
            return Ok(());
        }

        match self
            .handler
            .on_message(message.clone(), Arc::clone(&tx))
            .await
        {
            Ok(()) => {
                if fault.is_cancelled() {
                    // Connection died while the handler ran; committing now
                    // could acknowledge on a dead transport.
                    tx.set_rollback_only();
                    let _ = self.coordinator.rollback().await;
                    self.publish_rolled_back(message_id, "connection lost during delivery");
                    return Err(SessionError::ConnectionLost {
                        reason: "transport fault during delivery".into(),
                    });
                }
                match self.coordinator.commit().await {
                    Ok(()) => {
                        self.bus.publish(
                            Event::now(EventKind::DeliveryCommitted)
                                .with_session(self.name.clone())
                                .with_message_id(message_id),
                        );
                        Ok(())
                    }
                    Err(TxError::Heuristic { resource, reason }) => {
                        // Committed, but one participant's outcome is in
                        // doubt. Never replayed as a rollback.
                        self.bus.publish(
                            Event::now(EventKind::DeliveryCommitted)
                                .with_session(self.name.clone())
                                .with_message_id(message_id)
                                .with_error(format!("{resource} in doubt: {reason}")),
                        );
                        Ok(())
                    }
                    Err(TxError::Timeout { timeout }) => {
                        self.publish_rolled_back(message_id, "transaction timed out");
                        Err(SessionError::TxTimeout { timeout })
                    }
                    Err(err) => {
                        self.publish_rolled_back(message_id, &err.to_string());
                        if !connection.is_healthy() {
                            Err(SessionError::ConnectionLost {
                                reason: "transport fault at commit".into(),
                            })
                        } else {
                            Ok(())
                        }
                    }
                }
            }
            Err(HandlerError::Fail { error }) => {
                self.bus.publish(
                    Event::now(EventKind::HandlerFailed)
                        .with_session(self.name.clone())
                        .with_message_id(message_id)
                        .with_error(error.clone()),
                );
                tx.set_rollback_only();
                let _ = self.coordinator.rollback().await;
                self.publish_rolled_back(message_id, &error);
                // A handler failure alone never tears the session down; only
                // a transport fault observed alongside it does.
                if fault.is_cancelled() {
                    Err(SessionError::ConnectionLost {
                        reason: "transport fault during delivery".into(),
                    })
                } else {
                    Err(SessionError::Handler { error })
                }
            }
        }
    }

    async fn connection_lost(&mut self, reason: &str) {
        self.bus.publish(
            Event::now(EventKind::ConnectionLost)
                .with_session(self.name.clone())
                .with_error(reason.to_string()),
        );
        self.consumer = None;
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.announced = false;
    }

    async fn finish(mut self, exit: SessionExit) -> SessionExit {
        self.consumer = None;
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.bus
            .publish(Event::now(EventKind::SessionStopped).with_session(self.name.clone()));
        exit
    }

    fn publish_rolled_back(&self, message_id: u64, reason: &str) {
        self.bus.publish(
            Event::now(EventKind::DeliveryRolledBack)
                .with_session(self.name.clone())
                .with_message_id(message_id)
                .with_error(reason.to_string()),
        );
    }
}
