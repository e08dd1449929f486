//! # Broker-backed transaction participants.
//!
//! - [`InboundResource`] settles a received message: prepare reserves the
//!   delivery broker-side, commit acknowledges, rollback rejects for
//!   redelivery. The session enlists one per delivery, before the handler
//!   runs — this is what keeps acknowledge strictly after commit.
//! - [`TransactedProducer`] stages outbound sends so they publish only when
//!   the delivery's transaction commits. Handlers enlist one and send
//!   through it; a rollback leaves no downstream trace.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::broker::{Consumer, Message, Producer};
use crate::error::BrokerError;
use crate::tx::transaction::{ResourceOutcome, TxResource};

/// Settlement of one inbound delivery, as a two-phase participant.
pub struct InboundResource {
    consumer: Arc<dyn Consumer>,
    message: Message,
}

impl InboundResource {
    /// Wraps `message`'s settlement on `consumer`.
    pub fn new(consumer: Arc<dyn Consumer>, message: Message) -> Arc<Self> {
        Arc::new(Self { consumer, message })
    }
}

#[async_trait]
impl TxResource for InboundResource {
    fn name(&self) -> &str {
        "inbound"
    }

    async fn prepare(&self) -> ResourceOutcome {
        self.consumer.prepare(&self.message).await?;
        Ok(())
    }

    async fn commit(&self) -> ResourceOutcome {
        self.consumer.acknowledge(&self.message).await?;
        Ok(())
    }

    async fn rollback(&self) -> ResourceOutcome {
        self.consumer.reject(&self.message).await?;
        Ok(())
    }
}

/// Transaction-scoped staging over a [`Producer`].
///
/// Create one per delivery, enlist it, then [`send`](TransactedProducer::send)
/// through it: messages are buffered locally and published in the commit
/// phase. Rollback discards the buffer.
///
/// ## Example (inside a handler)
/// ```rust,ignore
/// let outbound = TransactedProducer::new(producer.clone());
/// tx.enlist(outbound.clone())?;
/// outbound.send(Message::new("forwarded")).await?;
/// ```
pub struct TransactedProducer {
    producer: Arc<dyn Producer>,
    name: String,
    staged: Mutex<Vec<Message>>,
}

impl TransactedProducer {
    /// Creates a fresh staging buffer over `producer`.
    pub fn new(producer: Arc<dyn Producer>) -> Arc<Self> {
        let name = format!("outbound:{}", producer.destination());
        Arc::new(Self {
            producer,
            name,
            staged: Mutex::new(Vec::new()),
        })
    }

    /// Stages a message for publication at commit.
    pub async fn send(&self, message: Message) -> Result<(), BrokerError> {
        self.staged
            .lock()
            .expect("staged sends poisoned")
            .push(message);
        Ok(())
    }

    /// Number of messages currently staged.
    pub fn staged_len(&self) -> usize {
        self.staged.lock().expect("staged sends poisoned").len()
    }

    fn drain(&self) -> Vec<Message> {
        std::mem::take(&mut *self.staged.lock().expect("staged sends poisoned"))
    }
}

#[async_trait]
impl TxResource for TransactedProducer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self) -> ResourceOutcome {
        // Vote no while the producer's transport is down: publishing the
        // staged batch at commit could not be promised.
        if self.staged_len() > 0 && !self.producer.is_healthy() {
            return Err(Box::new(BrokerError::ConnectionLost {
                reason: "producer connection unavailable at prepare".into(),
            }));
        }
        Ok(())
    }

    async fn commit(&self) -> ResourceOutcome {
        for message in self.drain() {
            self.producer.send(message).await?;
        }
        Ok(())
    }

    async fn rollback(&self) -> ResourceOutcome {
        self.drain();
        Ok(())
    }
}
