//! Broker collaborator interface.
//!
//! The activation runtime consumes the broker through these narrow traits;
//! it never owns queueing, persistence, or routing itself. The contract the
//! runtime depends on:
//!
//! - **Fault notification is a push signal**: [`Connection::fault_signal`]
//!   returns a token that is cancelled when the transport fails, so sessions
//!   can observe loss mid-receive and mid-delivery.
//! - **Redelivery-on-rollback**: a delivery that is rejected (rolled back)
//!   or stranded by a dead connection becomes eligible for redelivery, with
//!   its delivery count incremented, up to the consumer's delivery limit.
//! - **Two-phase delivery settlement**: [`Consumer::prepare`] reserves a
//!   delivery for commit. A *prepared* delivery survives connection loss and
//!   must be settled by `acknowledge` (commit) or `reject` (rollback) — this
//!   is what makes commit-then-acknowledge ordering safe: the broker never
//!   redelivers a message whose acknowledgment was promised.
//!
//! [`memory::MemoryBroker`] is the in-process reference implementation used
//! by the test suite and demos.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;
use crate::spec::DeliveryLimit;

/// A brokered message.
///
/// `id` is broker-assigned and stable across redeliveries; `headers` carry
/// application properties; `delivery_count` is maintained by the broker
/// (1 on first delivery).
#[derive(Clone, Debug)]
pub struct Message {
    /// Broker-assigned id, stable across redeliveries.
    pub id: u64,
    /// Message payload.
    pub body: Vec<u8>,
    /// Application properties.
    pub headers: HashMap<String, String>,
    /// Delivery attempt counter (1 on first delivery).
    pub delivery_count: u32,
}

impl Message {
    /// Creates a message with the given body; the broker assigns the id on
    /// enqueue.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: 0,
            body: body.into(),
            headers: HashMap::new(),
            delivery_count: 0,
        }
    }

    /// Sets an application header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Reads an application header.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Per-consumer options derived from the activation spec.
#[derive(Clone, Copy, Debug)]
pub struct ConsumerOptions {
    /// In-flight delivery credit for this consumer's connection;
    /// `None` = unlimited.
    pub window: Option<u32>,
    /// Bound on delivery attempts per message.
    pub max_delivery_attempts: DeliveryLimit,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            window: None,
            max_delivery_attempts: DeliveryLimit::Unlimited,
        }
    }
}

/// Entry point to a broker: hands out connections.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Opens a new transport connection.
    async fn connect(&self) -> Result<Arc<dyn Connection>, BrokerError>;
}

/// One transport connection, exclusively owned by its creator.
///
/// A connection is never shared between sessions; its health flag and fault
/// signal describe the transport, not individual consumers.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Creates a consumer on `destination`.
    async fn create_consumer(
        &self,
        destination: &str,
        options: ConsumerOptions,
    ) -> Result<Arc<dyn Consumer>, BrokerError>;

    /// Creates a producer targeting `destination`.
    async fn create_producer(&self, destination: &str)
        -> Result<Arc<dyn Producer>, BrokerError>;

    /// True while the transport is usable.
    fn is_healthy(&self) -> bool;

    /// A token cancelled when the transport fails.
    ///
    /// Each call returns a clone of the same token; cancellation is
    /// permanent for this connection (reconnect means a new connection).
    fn fault_signal(&self) -> CancellationToken;

    /// Attaches diagnostic metadata to the connection (visible to broker
    /// tooling; used e.g. to tag pool-owned connections).
    fn set_metadata(&self, key: &str, value: &str);

    /// Closes the connection gracefully. Unsettled, unprepared deliveries
    /// return to their queue.
    async fn close(&self);
}

/// A message consumer bound to one destination on one connection.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Receives the next message, waiting up to `timeout`.
    ///
    /// `Ok(None)` on timeout with no message — not an error. A `timeout`
    /// of zero is a non-blocking poll.
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, BrokerError>;

    /// Reserves `message`'s delivery for commit (prepare phase).
    ///
    /// Fails if the connection is no longer healthy. After a successful
    /// prepare the broker guarantees the delivery will not be redelivered
    /// until it is settled by [`acknowledge`](Consumer::acknowledge) or
    /// [`reject`](Consumer::reject), even if the connection dies.
    async fn prepare(&self, message: &Message) -> Result<(), BrokerError>;

    /// Settles `message` permanently (commit phase). Must succeed for a
    /// prepared delivery.
    async fn acknowledge(&self, message: &Message) -> Result<(), BrokerError>;

    /// Returns `message` for redelivery (rollback), incrementing its
    /// delivery count and honoring the redelivery delay and delivery limit.
    async fn reject(&self, message: &Message) -> Result<(), BrokerError>;
}

/// A message producer bound to one destination.
///
/// `send` publishes immediately. For sends that must commit or roll back
/// with a delivery, wrap the producer in a
/// [`TransactedProducer`](crate::tx::TransactedProducer) and enlist it.
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    /// The destination this producer targets.
    fn destination(&self) -> &str;

    /// True while the producer's connection is usable. Consulted by the
    /// prepare vote of a [`TransactedProducer`](crate::tx::TransactedProducer).
    fn is_healthy(&self) -> bool;

    /// Publishes `message` immediately (outside any transaction).
    async fn send(&self, message: Message) -> Result<(), BrokerError>;
}
