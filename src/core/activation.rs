//! # Activation manager: pool lifecycle for one activation spec.
//!
//! [`ActivationManager`] turns an [`ActivationSpec`] plus a handler into a
//! running pool of [`HandlerSession`]s and hands back an
//! [`ActivationHandle`] for deactivation and observation.
//!
//! ## Key responsibilities
//! - validate the spec and fail fast with the offending field
//! - create sessions **sequentially**, each with the full reconnect budget
//!   for its initial connection; tear everything down if any session cannot
//!   reach Active (all-or-nothing)
//! - fan out runtime events to subscribers (including the [`PoolTracker`])
//! - react to exhausted sessions per [`ExhaustedAction`]
//! - stop every session on deactivate, bounded by a grace period
//!
//! ## High-level architecture
//! ```text
//! activate(spec, handler):
//!   validate(spec)
//!   Bus ──► fan-out listener ──► SubscriberSet (PoolTracker, LogWriter, ...)
//!   for i in 0..session_count:
//!       Reconnector::connect()  (budgeted initial connect)
//!       spawn HandlerSession::run(child_token) ──► registry[name]
//!   spawn exhausted listener  (reap + optional replace)
//!   ActivationHandle { token, registry, tracker, grace }
//!
//! deactivate():
//!   idempotent (atomic swap)
//!   token.cancel() ─► interrupts receive/commit/reconnect waits
//!   join all sessions within grace ──► ActivationStopped | GraceExceeded
//! ```
//!
//! The registry lock guards **membership only** (add/remove); it is never
//! held across message processing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::error::ActivationError;
use crate::events::{Bus, Event, EventKind};
use crate::handlers::HandlerRef;
use crate::spec::{ActivationSpec, ExhaustedAction};
use crate::subscribers::{PoolTracker, Subscribe, SubscriberSet};
use crate::tx::{InProcessTm, TransactionManager, TxCoordinator};

use super::reconnect::{ConnectFailure, Reconnector};
use super::session::{HandlerSession, SessionExit};

/// A running session actor tracked by the registry.
struct SessionSlot {
    join: JoinHandle<SessionExit>,
}

type Registry = Arc<Mutex<HashMap<String, SessionSlot>>>;

/// Builder for an [`ActivationManager`].
pub struct ActivationManagerBuilder {
    broker: Arc<dyn Broker>,
    tm: Arc<dyn TransactionManager>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    grace: Duration,
    bus_capacity: usize,
}

impl ActivationManagerBuilder {
    /// Creates a builder over the given broker with defaults:
    /// in-process transaction manager, 30s deactivation grace,
    /// bus capacity 1024, no subscribers.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            tm: InProcessTm::shared(),
            subscribers: Vec::new(),
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }

    /// Selects the transaction-manager provider.
    pub fn with_transaction_manager(mut self, tm: Arc<dyn TransactionManager>) -> Self {
        self.tm = tm;
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (session lifecycle, delivery
    /// outcomes, reconnects) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Sets the deactivation grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Sets the event bus capacity.
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    /// Builds the manager.
    pub fn build(self) -> ActivationManager {
        ActivationManager {
            broker: self.broker,
            tm: self.tm,
            subscribers: self.subscribers,
            grace: self.grace,
            bus_capacity: self.bus_capacity,
        }
    }
}

/// Creates and tears down session pools against a broker.
pub struct ActivationManager {
    broker: Arc<dyn Broker>,
    tm: Arc<dyn TransactionManager>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    grace: Duration,
    bus_capacity: usize,
}

impl ActivationManager {
    /// Starts a builder over the given broker.
    pub fn builder(broker: Arc<dyn Broker>) -> ActivationManagerBuilder {
        ActivationManagerBuilder::new(broker)
    }

    /// Activates a pool of `spec.session_count` sessions running `handler`.
    ///
    /// Sessions are created sequentially; each gets the spec's full
    /// reconnect budget for its initial connection. If any session cannot
    /// reach Active, every already-created session is torn down and the
    /// whole activation fails with
    /// [`ActivationError::ResourceExhausted`] (all-or-nothing).
    pub async fn activate(
        &self,
        spec: ActivationSpec,
        handler: HandlerRef,
    ) -> Result<ActivationHandle, ActivationError> {
        spec.validate()?;
        let spec = Arc::new(spec);

        let bus = Bus::new(self.bus_capacity);
        let tracker = Arc::new(PoolTracker::new());
        let mut subscribers = self.subscribers.clone();
        subscribers.push(tracker.clone() as Arc<dyn Subscribe>);
        let subs = Arc::new(SubscriberSet::new(subscribers, bus.clone()));
        spawn_fanout(&bus, Arc::clone(&subs));

        let token = CancellationToken::new();
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));

        for index in 0..spec.session_count {
            let name: Arc<str> = format!("{}-{}", spec.destination, index).into();
            let reconnector = Reconnector::new(
                name.clone(),
                Arc::clone(&spec),
                Arc::clone(&self.broker),
                bus.clone(),
            );

            match reconnector.connect(&token).await {
                Ok((connection, consumer)) => {
                    let session = HandlerSession::new(
                        name.clone(),
                        Arc::clone(&spec),
                        handler.clone(),
                        TxCoordinator::new(Arc::clone(&self.tm)),
                        reconnector,
                        bus.clone(),
                        Some(connection),
                        Some(consumer),
                    );
                    let join = tokio::spawn(session.run(token.child_token()));
                    registry
                        .lock()
                        .expect("session registry poisoned")
                        .insert(name.to_string(), SessionSlot { join });
                }
                Err(failure) => {
                    let last_error = match failure {
                        ConnectFailure::Canceled => "activation cancelled".to_string(),
                        ConnectFailure::Exhausted { last_error, .. } => last_error,
                    };
                    token.cancel();
                    let slots: Vec<SessionSlot> = registry
                        .lock()
                        .expect("session registry poisoned")
                        .drain()
                        .map(|(_, slot)| slot)
                        .collect();
                    for slot in slots {
                        let _ = slot.join.await;
                    }
                    return Err(ActivationError::ResourceExhausted {
                        destination: spec.destination.clone(),
                        failed_sessions: spec.session_count - index,
                        last_error,
                    });
                }
            }
        }

        spawn_exhausted_listener(ExhaustedListener {
            bus: bus.clone(),
            token: token.clone(),
            registry: Arc::clone(&registry),
            spec: Arc::clone(&spec),
            handler,
            broker: Arc::clone(&self.broker),
            tm: Arc::clone(&self.tm),
        });

        bus.publish(
            Event::now(EventKind::ActivationStarted).with_attempt(spec.session_count as u32),
        );

        Ok(ActivationHandle {
            spec,
            bus,
            token,
            registry,
            tracker,
            grace: self.grace,
            deactivated: AtomicBool::new(false),
            _subs: subs,
        })
    }
}

/// Handle to a live activation.
///
/// Deactivation is idempotent; dropping the handle does **not** stop the
/// pool — call [`deactivate`](ActivationHandle::deactivate).
pub struct ActivationHandle {
    spec: Arc<ActivationSpec>,
    bus: Bus,
    token: CancellationToken,
    registry: Registry,
    tracker: Arc<PoolTracker>,
    grace: Duration,
    deactivated: AtomicBool,
    /// Keeps subscriber workers alive for the handle's lifetime.
    _subs: Arc<SubscriberSet>,
}

impl std::fmt::Debug for ActivationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationHandle")
            .field("destination", &self.spec.destination)
            .field("session_count", &self.spec.session_count)
            .field("grace", &self.grace)
            .field("deactivated", &self.deactivated.load(Ordering::Acquire))
            .field("live_sessions", &self.tracker.live_count())
            .finish()
    }
}

impl ActivationHandle {
    /// The destination this activation consumes.
    pub fn destination(&self) -> &str {
        &self.spec.destination
    }

    /// The configured pool size.
    pub fn session_count(&self) -> usize {
        self.spec.session_count
    }

    /// Number of sessions currently live (connected and consuming).
    ///
    /// Eventually consistent: fed by the event stream.
    pub fn live_sessions(&self) -> usize {
        self.tracker.live_count()
    }

    /// The pool tracker backing [`live_sessions`](ActivationHandle::live_sessions).
    pub fn tracker(&self) -> Arc<PoolTracker> {
        Arc::clone(&self.tracker)
    }

    /// Subscribes to this activation's event stream.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Stops every session and releases their connections.
    ///
    /// Interrupts blocked receives, commit waits, and reconnect sleeps;
    /// does not return until every session reached a terminal stopped
    /// state or the grace period elapsed. Calling it again (or on an
    /// already-deactivated handle) is a no-op.
    pub async fn deactivate(&self) -> Result<(), ActivationError> {
        if self.deactivated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.bus.publish(Event::now(EventKind::DeactivateRequested));
        self.token.cancel();

        let slots: Vec<SessionSlot> = self
            .registry
            .lock()
            .expect("session registry poisoned")
            .drain()
            .map(|(_, slot)| slot)
            .collect();

        let join_all = async {
            for slot in slots {
                let _ = slot.join.await;
            }
        };

        match timeout(self.grace, join_all).await {
            Ok(()) => {
                self.bus.publish(Event::now(EventKind::ActivationStopped));
                Ok(())
            }
            Err(_) => {
                self.bus.publish(Event::now(EventKind::GraceExceeded));
                Err(ActivationError::GraceExceeded {
                    grace: self.grace,
                    stuck: self.tracker.live_names(),
                })
            }
        }
    }
}

/// Subscribes to the bus and forwards events to the subscriber set.
///
/// Runs until the bus closes (all publishers dropped) so that shutdown
/// events still reach subscribers after deactivation.
fn spawn_fanout(bus: &Bus, subs: Arc<SubscriberSet>) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => subs.emit(&ev),
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    });
}

struct ExhaustedListener {
    bus: Bus,
    token: CancellationToken,
    registry: Registry,
    spec: Arc<ActivationSpec>,
    handler: HandlerRef,
    broker: Arc<dyn Broker>,
    tm: Arc<dyn TransactionManager>,
}

/// Reaps sessions that spent their reconnect budget and, under
/// [`ExhaustedAction::Replace`], spawns replacements with a fresh budget.
fn spawn_exhausted_listener(listener: ExhaustedListener) {
    let ExhaustedListener {
        bus,
        token,
        registry,
        spec,
        handler,
        broker,
        tm,
    } = listener;

    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(ev) if ev.kind == EventKind::SessionExhausted => {
                        let Some(name) = ev.session.clone() else { continue };

                        // Reap the finished actor.
                        let slot = registry
                            .lock()
                            .expect("session registry poisoned")
                            .remove(name.as_ref());
                        if let Some(slot) = slot {
                            let _ = slot.join.await;
                        }

                        if spec.on_exhausted == ExhaustedAction::Replace {
                            let reconnector = Reconnector::new(
                                name.clone(),
                                Arc::clone(&spec),
                                Arc::clone(&broker),
                                bus.clone(),
                            );
                            let session = HandlerSession::new(
                                name.clone(),
                                Arc::clone(&spec),
                                handler.clone(),
                                TxCoordinator::new(Arc::clone(&tm)),
                                reconnector,
                                bus.clone(),
                                None,
                                None,
                            );
                            let join = tokio::spawn(session.run(token.child_token()));
                            registry
                                .lock()
                                .expect("session registry poisoned")
                                .insert(name.to_string(), SessionSlot { join });
                            bus.publish(
                                Event::now(EventKind::SessionReplaced).with_session(name),
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    });
}
