//! # Demo: reconnect
//!
//! Kills pool connections while messages flow and watches the reconnect
//! supervisors repair the sessions. The live count drops on each induced
//! fault and converges back to the configured pool size.
//!
//! ## Run
//! ```bash
//! cargo run --example reconnect --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use inflow::{
    ActivationManager, ActivationSpec, DestinationKind, HandlerError, HandlerFn, LogWriter,
    MemoryBroker, Message, RetryLimit, Subscribe, Transaction,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let broker = Arc::new(MemoryBroker::new());

    let handler = HandlerFn::arc(|_message: Message, _tx: Arc<Transaction>| async move {
        Ok::<_, HandlerError>(())
    });

    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let manager = ActivationManager::builder(broker.clone())
        .with_subscribers(subscribers)
        .build();

    let spec = ActivationSpec::new("orders", DestinationKind::Queue)
        .with_session_count(3)
        .with_reconnect_attempts(RetryLimit::Infinite)
        .with_reconnect_interval(Duration::from_millis(250))
        .with_call_timeout(Duration::from_millis(100));

    let handle = manager.activate(spec, handler).await?;

    for round in 1..=3 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let killed = broker.fail_random_matching("pool", "orders", "demo fault");
        println!(
            "round {round}: killed connection {killed:?}, live sessions = {}",
            handle.live_sessions()
        );
        broker.enqueue("orders", Message::new(format!("round {round}")));
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("converged: live sessions = {}", handle.live_sessions());

    handle.deactivate().await?;
    Ok(())
}
