//! # In-process broker with redelivery-on-rollback and fault injection.
//!
//! [`MemoryBroker`] implements the [`Broker`](crate::broker::Broker)
//! collaborator traits entirely in process. It exists for tests and demos:
//! it models exactly the slice of broker behavior the activation runtime
//! depends on, nothing more.
//!
//! ## Delivery settlement model
//! ```text
//! enqueue ──► ready ──receive──► in-flight (unprepared)
//!                                    │
//!                     prepare        │ reject / connection death
//!                        ▼           ▼
//!                in-flight (prepared) └──► redelivery after delay
//!                  │         │                (delivery_count + 1,
//!            acknowledge   reject              dead-letter past limit)
//!                  ▼         ▼
//!               settled   redelivery
//! ```
//!
//! ## Rules
//! - An **unprepared** in-flight delivery whose connection dies returns to
//!   the queue (redelivery). This is what guarantees no message is lost
//!   when a session is killed mid-delivery.
//! - A **prepared** delivery survives connection death and waits for its
//!   settlement; this is what guarantees no message is duplicated when a
//!   connection dies between prepare and acknowledge.
//! - `receive` honors the consumer's confirmation window: at most `window`
//!   unsettled deliveries per connection.
//!
//! ## Fault injection
//! [`MemoryBroker::fail_connection`] and
//! [`MemoryBroker::fail_random_matching`] kill live connections the way the
//! transport would: the health flag drops, the fault token fires, and
//! unprepared in-flight deliveries are rescheduled.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Notify;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Connection, Consumer, ConsumerOptions, Message, Producer};
use crate::error::BrokerError;
use crate::spec::DeliveryLimit;

/// One in-flight (received, unsettled) delivery.
struct InFlight {
    message: Message,
    conn_id: u64,
    prepared: bool,
    limit: DeliveryLimit,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Message>,
    in_flight: HashMap<u64, InFlight>,
    dead: Vec<Message>,
    notify: Arc<Notify>,
}

struct BrokerCore {
    queues: Mutex<HashMap<String, Queue>>,
    connections: Mutex<Vec<Weak<ConnState>>>,
    next_conn_id: AtomicU64,
    next_message_id: AtomicU64,
    redelivery_delay: Duration,
}

impl BrokerCore {
    fn with_queue<R>(&self, destination: &str, f: impl FnOnce(&mut Queue) -> R) -> R {
        let mut queues = self.queues.lock().expect("broker state poisoned");
        let queue = queues.entry(destination.to_string()).or_default();
        f(queue)
    }

    fn assign_id(&self, mut message: Message) -> Message {
        message.id = self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        message
    }

    fn enqueue(self: &Arc<Self>, destination: &str, message: Message) -> u64 {
        let message = self.assign_id(message);
        let id = message.id;
        self.with_queue(destination, |q| {
            q.ready.push_back(message);
            q.notify.notify_waiters();
        });
        id
    }

    /// Puts a delivered message back on its queue after the redelivery
    /// delay, or dead-letters it past the delivery limit.
    fn schedule_redelivery(self: &Arc<Self>, destination: &str, entry: InFlight) {
        let InFlight { message, limit, .. } = entry;
        if limit.reached(message.delivery_count) {
            self.with_queue(destination, |q| q.dead.push(message));
            return;
        }
        if self.redelivery_delay.is_zero() {
            self.with_queue(destination, |q| {
                q.ready.push_back(message);
                q.notify.notify_waiters();
            });
            return;
        }
        let core = Arc::clone(self);
        let destination = destination.to_string();
        let delay = self.redelivery_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            core.with_queue(&destination, |q| {
                q.ready.push_back(message);
                q.notify.notify_waiters();
            });
        });
    }

    /// Reschedules every unprepared delivery owned by `conn_id`.
    /// Prepared deliveries stay put and wait for settlement.
    fn strand_connection(self: &Arc<Self>, conn_id: u64) {
        let stranded: Vec<(String, InFlight)> = {
            let mut queues = self.queues.lock().expect("broker state poisoned");
            let mut out = Vec::new();
            for (dest, q) in queues.iter_mut() {
                let ids: Vec<u64> = q
                    .in_flight
                    .iter()
                    .filter(|(_, e)| e.conn_id == conn_id && !e.prepared)
                    .map(|(id, _)| *id)
                    .collect();
                for id in ids {
                    if let Some(entry) = q.in_flight.remove(&id) {
                        out.push((dest.clone(), entry));
                    }
                }
            }
            out
        };
        for (dest, entry) in stranded {
            self.schedule_redelivery(&dest, entry);
        }
    }
}

struct ConnState {
    id: u64,
    core: Arc<BrokerCore>,
    healthy: AtomicBool,
    closed: AtomicBool,
    fault: CancellationToken,
    metadata: Mutex<HashMap<String, String>>,
}

impl ConnState {
    fn usable(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        if !self.healthy.load(Ordering::Acquire) {
            return Err(BrokerError::ConnectionLost {
                reason: "transport fault".into(),
            });
        }
        Ok(())
    }

    fn metadata_matches(&self, key: &str, value: &str) -> bool {
        self.metadata
            .lock()
            .expect("connection metadata poisoned")
            .get(key)
            .is_some_and(|v| v == value)
    }

    fn fail(self: &Arc<Self>, reason: &str) {
        if !self.healthy.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(conn = self.id, reason, "connection failed");
        self.fault.cancel();
        self.core.strand_connection(self.id);
    }
}

/// In-process broker used by the test suite and demos.
///
/// Cloning is cheap; all clones share state.
#[derive(Clone)]
pub struct MemoryBroker {
    core: Arc<BrokerCore>,
}

impl MemoryBroker {
    /// Creates a broker with immediate redelivery.
    pub fn new() -> Self {
        Self::with_redelivery_delay(Duration::ZERO)
    }

    /// Creates a broker that waits `delay` before re-offering a delivery
    /// that rolled back or was stranded by a dead connection.
    pub fn with_redelivery_delay(delay: Duration) -> Self {
        Self {
            core: Arc::new(BrokerCore {
                queues: Mutex::new(HashMap::new()),
                connections: Mutex::new(Vec::new()),
                next_conn_id: AtomicU64::new(0),
                next_message_id: AtomicU64::new(0),
                redelivery_delay: delay,
            }),
        }
    }

    /// Enqueues a message, returning its broker-assigned id.
    pub fn enqueue(&self, destination: &str, message: Message) -> u64 {
        self.core.enqueue(destination, message)
    }

    /// Number of messages waiting in `destination`'s ready queue.
    pub fn queue_depth(&self, destination: &str) -> usize {
        self.core.with_queue(destination, |q| q.ready.len())
    }

    /// Number of unsettled in-flight deliveries on `destination`.
    pub fn in_flight(&self, destination: &str) -> usize {
        self.core.with_queue(destination, |q| q.in_flight.len())
    }

    /// Number of dead-lettered messages on `destination`.
    pub fn dead_letters(&self, destination: &str) -> usize {
        self.core.with_queue(destination, |q| q.dead.len())
    }

    /// Number of live (healthy, unclosed) connections.
    pub fn live_connections(&self) -> usize {
        self.live_conns().len()
    }

    /// Kills the connection with the given id, as a transport fault would.
    /// Returns false if no such live connection exists.
    pub fn fail_connection(&self, id: u64, reason: &str) -> bool {
        match self.live_conns().into_iter().find(|c| c.id == id) {
            Some(conn) => {
                conn.fail(reason);
                true
            }
            None => false,
        }
    }

    /// Kills one randomly chosen live connection whose metadata entry
    /// `key` equals `value`. Returns the killed connection's id.
    pub fn fail_random_matching(&self, key: &str, value: &str, reason: &str) -> Option<u64> {
        let candidates: Vec<Arc<ConnState>> = self
            .live_conns()
            .into_iter()
            .filter(|c| c.metadata_matches(key, value))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let pick = rand::rng().random_range(0..candidates.len());
        let conn = &candidates[pick];
        conn.fail(reason);
        Some(conn.id)
    }

    fn live_conns(&self) -> Vec<Arc<ConnState>> {
        let mut registry = self
            .core
            .connections
            .lock()
            .expect("broker connections poisoned");
        registry.retain(|weak| weak.upgrade().is_some());
        registry
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.healthy.load(Ordering::Acquire) && !c.closed.load(Ordering::Acquire))
            .collect()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Connection>, BrokerError> {
        let state = Arc::new(ConnState {
            id: self.core.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1,
            core: Arc::clone(&self.core),
            healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            fault: CancellationToken::new(),
            metadata: Mutex::new(HashMap::new()),
        });
        self.core
            .connections
            .lock()
            .expect("broker connections poisoned")
            .push(Arc::downgrade(&state));
        Ok(Arc::new(MemoryConnection { state }))
    }
}

/// A [`Connection`](crate::broker::Connection) handed out by [`MemoryBroker`].
pub struct MemoryConnection {
    state: Arc<ConnState>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn create_consumer(
        &self,
        destination: &str,
        options: ConsumerOptions,
    ) -> Result<Arc<dyn Consumer>, BrokerError> {
        self.state.usable()?;
        // Materialize the queue so depth probes see it.
        self.state.core.with_queue(destination, |_| ());
        Ok(Arc::new(MemoryConsumer {
            conn: Arc::clone(&self.state),
            destination: destination.to_string(),
            options,
        }))
    }

    async fn create_producer(
        &self,
        destination: &str,
    ) -> Result<Arc<dyn Producer>, BrokerError> {
        self.state.usable()?;
        Ok(Arc::new(MemoryProducer {
            conn: Arc::clone(&self.state),
            destination: destination.to_string(),
        }))
    }

    fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::Acquire) && !self.state.closed.load(Ordering::Acquire)
    }

    fn fault_signal(&self) -> CancellationToken {
        self.state.fault.clone()
    }

    fn set_metadata(&self, key: &str, value: &str) {
        self.state
            .metadata
            .lock()
            .expect("connection metadata poisoned")
            .insert(key.to_string(), value.to_string());
    }

    async fn close(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Graceful close still strands whatever was left unprepared.
        self.state.core.strand_connection(self.state.id);
    }
}

struct MemoryConsumer {
    conn: Arc<ConnState>,
    destination: String,
    options: ConsumerOptions,
}

impl MemoryConsumer {
    /// Pops the next ready message if the confirmation window allows it.
    fn try_take(&self) -> Option<Message> {
        self.conn.core.with_queue(&self.destination, |q| {
            if let Some(window) = self.options.window {
                let unsettled = q
                    .in_flight
                    .values()
                    .filter(|e| e.conn_id == self.conn.id)
                    .count();
                if unsettled >= window as usize {
                    return None;
                }
            }
            let mut message = q.ready.pop_front()?;
            message.delivery_count += 1;
            q.in_flight.insert(
                message.id,
                InFlight {
                    message: message.clone(),
                    conn_id: self.conn.id,
                    prepared: false,
                    limit: self.options.max_delivery_attempts,
                },
            );
            Some(message)
        })
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.conn.usable()?;

            let notify = self
                .conn
                .core
                .with_queue(&self.destination, |q| Arc::clone(&q.notify));
            let notified = notify.notified();
            tokio::pin!(notified);
            // Register interest before the queue check so an enqueue between
            // check and await cannot be missed.
            notified.as_mut().enable();

            if let Some(message) = self.try_take() {
                return Ok(Some(message));
            }
            if timeout.is_zero() || Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(deadline) => return Ok(None),
                _ = self.conn.fault.cancelled() => {
                    return Err(BrokerError::ConnectionLost {
                        reason: "transport fault".into(),
                    });
                }
            }
        }
    }

    async fn prepare(&self, message: &Message) -> Result<(), BrokerError> {
        self.conn.core.with_queue(&self.destination, |q| {
            // The prepared flag flips under the queue lock, the same lock the
            // stranding path takes, so the two can never interleave: either
            // this delivery is reserved, or it has already been rescheduled.
            if !self.conn.healthy.load(Ordering::Acquire)
                || self.conn.closed.load(Ordering::Acquire)
            {
                return Err(BrokerError::ConnectionLost {
                    reason: "transport fault".into(),
                });
            }
            match q.in_flight.get_mut(&message.id) {
                Some(entry) if entry.conn_id == self.conn.id => {
                    entry.prepared = true;
                    Ok(())
                }
                _ => Err(BrokerError::ConnectionLost {
                    reason: "delivery no longer owned by this connection".into(),
                }),
            }
        })
    }

    async fn acknowledge(&self, message: &Message) -> Result<(), BrokerError> {
        self.conn.core.with_queue(&self.destination, |q| {
            q.in_flight.remove(&message.id);
            q.notify.notify_waiters();
        });
        Ok(())
    }

    async fn reject(&self, message: &Message) -> Result<(), BrokerError> {
        let entry = self
            .conn
            .core
            .with_queue(&self.destination, |q| q.in_flight.remove(&message.id));
        if let Some(entry) = entry {
            self.conn.core.schedule_redelivery(&self.destination, entry);
        }
        self.conn
            .core
            .with_queue(&self.destination, |q| q.notify.notify_waiters());
        Ok(())
    }
}

struct MemoryProducer {
    conn: Arc<ConnState>,
    destination: String,
}

#[async_trait]
impl Producer for MemoryProducer {
    fn destination(&self) -> &str {
        &self.destination
    }

    fn is_healthy(&self) -> bool {
        self.conn.usable().is_ok()
    }

    async fn send(&self, message: Message) -> Result<(), BrokerError> {
        self.conn.usable()?;
        self.conn.core.enqueue(&self.destination, message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(tag: &str) -> Message {
        Message::new(tag.as_bytes().to_vec()).with_header("tag", tag)
    }

    async fn consumer_on(
        broker: &MemoryBroker,
        dest: &str,
    ) -> (Arc<dyn Connection>, Arc<dyn Consumer>) {
        let conn = broker.connect().await.expect("connect");
        let consumer = conn
            .create_consumer(dest, ConsumerOptions::default())
            .await
            .expect("consumer");
        (conn, consumer)
    }

    #[tokio::test]
    async fn receive_then_acknowledge_settles() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", msg("a"));
        let (_conn, consumer) = consumer_on(&broker, "q").await;

        let got = consumer
            .receive(Duration::from_millis(100))
            .await
            .expect("receive")
            .expect("message");
        assert_eq!(got.header("tag"), Some("a"));
        assert_eq!(got.delivery_count, 1);

        consumer.acknowledge(&got).await.expect("ack");
        assert_eq!(broker.queue_depth("q"), 0);
        assert_eq!(broker.in_flight("q"), 0);
    }

    #[tokio::test]
    async fn zero_timeout_is_a_poll() {
        let broker = MemoryBroker::new();
        let (_conn, consumer) = consumer_on(&broker, "q").await;
        let got = consumer.receive(Duration::ZERO).await.expect("receive");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn reject_redelivers_with_incremented_count() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", msg("a"));
        let (_conn, consumer) = consumer_on(&broker, "q").await;

        let first = consumer
            .receive(Duration::from_millis(100))
            .await
            .expect("receive")
            .expect("message");
        consumer.reject(&first).await.expect("reject");

        let second = consumer
            .receive(Duration::from_millis(100))
            .await
            .expect("receive")
            .expect("redelivery");
        assert_eq!(second.id, first.id);
        assert_eq!(second.delivery_count, 2);
    }

    #[tokio::test]
    async fn delivery_limit_dead_letters() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", msg("a"));
        let conn = broker.connect().await.expect("connect");
        let consumer = conn
            .create_consumer(
                "q",
                ConsumerOptions {
                    window: None,
                    max_delivery_attempts: DeliveryLimit::Limited(2),
                },
            )
            .await
            .expect("consumer");

        for _ in 0..2 {
            let got = consumer
                .receive(Duration::from_millis(100))
                .await
                .expect("receive")
                .expect("message");
            consumer.reject(&got).await.expect("reject");
        }
        assert_eq!(broker.dead_letters("q"), 1);
        assert_eq!(broker.queue_depth("q"), 0);
    }

    #[tokio::test]
    async fn fault_strands_unprepared_delivery_back_to_queue() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", msg("a"));
        let (conn, consumer) = consumer_on(&broker, "q").await;
        conn.set_metadata("pool", "q");

        let got = consumer
            .receive(Duration::from_millis(100))
            .await
            .expect("receive")
            .expect("message");
        assert_eq!(broker.in_flight("q"), 1);

        let killed = broker.fail_random_matching("pool", "q", "induced");
        assert!(killed.is_some());
        assert!(!conn.is_healthy());
        assert!(conn.fault_signal().is_cancelled());

        // The delivery went back to ready; its owner can no longer settle it.
        assert_eq!(broker.in_flight("q"), 0);
        assert_eq!(broker.queue_depth("q"), 1);
        assert!(consumer.prepare(&got).await.is_err());
    }

    #[tokio::test]
    async fn prepared_delivery_survives_fault_and_commits_once() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", msg("a"));
        let (conn, consumer) = consumer_on(&broker, "q").await;

        let got = consumer
            .receive(Duration::from_millis(100))
            .await
            .expect("receive")
            .expect("message");
        consumer.prepare(&got).await.expect("prepare");

        // First connection on this broker has id 1.
        assert!(broker.fail_connection(1, "induced"));
        assert!(!conn.is_healthy());

        // Not redelivered: the prepared reservation held.
        assert_eq!(broker.queue_depth("q"), 0);
        consumer.acknowledge(&got).await.expect("ack");
        assert_eq!(broker.in_flight("q"), 0);
    }

    #[tokio::test]
    async fn confirmation_window_caps_in_flight() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", msg("a"));
        broker.enqueue("q", msg("b"));
        let conn = broker.connect().await.expect("connect");
        let consumer = conn
            .create_consumer(
                "q",
                ConsumerOptions {
                    window: Some(1),
                    max_delivery_attempts: DeliveryLimit::Unlimited,
                },
            )
            .await
            .expect("consumer");

        let first = consumer
            .receive(Duration::from_millis(50))
            .await
            .expect("receive")
            .expect("message");
        // Window of 1 is spent until the first delivery settles.
        let blocked = consumer.receive(Duration::ZERO).await.expect("receive");
        assert!(blocked.is_none());

        consumer.acknowledge(&first).await.expect("ack");
        let second = consumer
            .receive(Duration::from_millis(50))
            .await
            .expect("receive");
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn receive_unblocks_on_late_enqueue() {
        let broker = MemoryBroker::new();
        let (_conn, consumer) = consumer_on(&broker, "q").await;

        let feeder = broker.clone();
        let push = tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            feeder.enqueue("q", msg("late"));
        });

        let got = consumer
            .receive(Duration::from_secs(2))
            .await
            .expect("receive");
        assert!(got.is_some());
        push.await.expect("feeder");
    }

    #[tokio::test]
    async fn redelivery_delay_is_honored() {
        let broker = MemoryBroker::with_redelivery_delay(Duration::from_millis(50));
        broker.enqueue("q", msg("a"));
        let (_conn, consumer) = consumer_on(&broker, "q").await;

        let got = consumer
            .receive(Duration::from_millis(100))
            .await
            .expect("receive")
            .expect("message");
        consumer.reject(&got).await.expect("reject");

        // Not back yet.
        assert!(consumer
            .receive(Duration::ZERO)
            .await
            .expect("poll")
            .is_none());
        let again = consumer
            .receive(Duration::from_secs(2))
            .await
            .expect("receive");
        assert!(again.is_some());
    }
}
