//! # Demo: drain
//!
//! Runs a small pool against the in-memory broker, forwards every message
//! to a downstream queue inside the delivery transaction, and drains it.
//!
//! ## Flow
//! ```text
//! feeder ──► inQueue ──► 4 sessions ──tx──► outQueue ──► verifier
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example drain --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use inflow::{
    ActivationManager, ActivationSpec, Broker, Connection, Consumer, ConsumerOptions,
    DestinationKind, HandlerError, HandlerFn, LogWriter, MemoryBroker, Message, Subscribe,
    TransactedProducer, Transaction,
};

const MESSAGES: u64 = 50;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let broker = Arc::new(MemoryBroker::new());

    // Forwarding producer on its own connection.
    let producer = broker
        .connect()
        .await?
        .create_producer("outQueue")
        .await?;

    let handler = HandlerFn::arc(move |message: Message, tx: Arc<Transaction>| {
        let producer = producer.clone();
        async move {
            let outbound = TransactedProducer::new(producer);
            tx.enlist(outbound.clone()).map_err(HandlerError::fail)?;
            outbound
                .send(Message::new(message.body.clone()))
                .await
                .map_err(HandlerError::fail)?;
            Ok(())
        }
    });

    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let manager = ActivationManager::builder(broker.clone())
        .with_subscribers(subscribers)
        .build();

    let spec = ActivationSpec::new("inQueue", DestinationKind::Queue)
        .with_session_count(4)
        .with_call_timeout(Duration::from_millis(200));

    let handle = manager.activate(spec, handler).await?;

    for i in 0..MESSAGES {
        broker.enqueue("inQueue", Message::new(format!("payload {i}")));
    }

    // Drain the downstream queue.
    let verifier = broker
        .connect()
        .await?
        .create_consumer("outQueue", ConsumerOptions::default())
        .await?;
    for n in 0..MESSAGES {
        let message = verifier
            .receive(Duration::from_secs(5))
            .await?
            .expect("drained message");
        verifier.acknowledge(&message).await?;
        if n % 10 == 0 {
            println!("drained {n}/{MESSAGES}");
        }
    }
    println!("drained {MESSAGES}/{MESSAGES}");

    handle.deactivate().await?;
    Ok(())
}
