//! # inflow
//!
//! **Inflow** is a library for running pools of concurrent, transactional
//! message-handling sessions against a message broker — surviving abrupt
//! connection loss without losing or duplicating a single message.
//!
//! It activates a fixed-size pool of consumer sessions on a destination,
//! wraps each delivery in a distributed transaction, detects mid-delivery
//! connection failure, and leans on broker-side redelivery so every message
//! is ultimately processed exactly once.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌────────────────┐       ┌────────────────┐
//!     │ ActivationSpec │       │   HandlerRef   │ (user callback)
//!     └───────┬────────┘       └───────┬────────┘
//!             ▼                        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ActivationManager (activate / deactivate)                        │
//! │  - Bus (broadcast events)                                         │
//! │  - PoolTracker (live-session state with sequence numbers)         │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! │  - Registry (session membership under a short-held lock)          │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │HandlerSession│   │HandlerSession│   │HandlerSession│  (one task each)
//! │ receive ─►tx │   │ receive ─►tx │   │ receive ─►tx │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │ connection fault │                  │
//!        ▼                  ▼                  ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Reconnector  │   │ Reconnector  │   │ Reconnector  │  (per session)
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! ### Delivery cycle
//! ```text
//! loop {
//!   ├─► receive(call_timeout)            (None → loop again)
//!   ├─► TxCoordinator::begin()           (one tx per session)
//!   ├─► enlist(InboundResource)          (ack joins the tx)
//!   ├─► handler.on_message(msg, tx)      (may enlist more resources)
//!   │       │
//!   │       ├─ Ok + connection healthy ──► commit (prepare → commit)
//!   │       ├─ Ok + fault observed ──────► rollback, reconnect
//!   │       └─ Err ──────────────────────► rollback, stay active
//!   │
//!   └─ exit conditions:
//!        - runtime token cancelled (deactivate)
//!        - reconnect budget exhausted ─► SessionExhausted (terminal)
//! }
//! ```
//!
//! ## Guarantees
//! | Concern           | Behavior                                                             |
//! |-------------------|----------------------------------------------------------------------|
//! | **No loss**       | Uncommitted deliveries return to the broker for redelivery.          |
//! | **No duplication**| Acknowledge happens only in the commit phase; prepared deliveries are never redelivered. |
//! | **Atomicity**     | Inbound ack and outbound sends enlisted in the same tx rise or fall together. |
//! | **Isolation**     | Sessions fail and recover independently; no cross-session state.     |
//! | **Convergence**   | Live session count returns to `session_count` after transient faults.|
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use inflow::{
//!     ActivationManager, ActivationSpec, DestinationKind, HandlerError, HandlerFn,
//!     MemoryBroker, Message, Transaction,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Arc::new(MemoryBroker::new());
//!     broker.enqueue("orders", Message::new("hello"));
//!
//!     let manager = ActivationManager::builder(broker.clone()).build();
//!
//!     let spec = ActivationSpec::new("orders", DestinationKind::Queue)
//!         .with_session_count(2)
//!         .with_call_timeout(Duration::from_millis(100));
//!
//!     let handler = HandlerFn::arc(|message: Message, _tx: Arc<Transaction>| async move {
//!         println!("processing {} bytes", message.body.len());
//!         Ok::<_, HandlerError>(())
//!     });
//!
//!     let handle = manager.activate(spec, handler).await?;
//!     tokio::time::sleep(Duration::from_millis(300)).await;
//!     handle.deactivate().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.

mod broker;
mod core;
mod error;
mod events;
mod handlers;
mod host;
mod policies;
mod spec;
mod subscribers;
mod tx;

// ---- Public re-exports ----

pub use broker::memory::MemoryBroker;
pub use broker::{Broker, Connection, Consumer, ConsumerOptions, Message, Producer};
pub use self::core::{ActivationHandle, ActivationManager, ActivationManagerBuilder};
pub use error::{
    ActivationError, BrokerError, HandlerError, HostError, SessionError, TxError,
};
pub use events::{Bus, Event, EventKind};
pub use handlers::{Handler, HandlerFn, HandlerRef};
pub use host::{Component, Host, ServiceRegistry};
pub use policies::{JitterPolicy, ReconnectPolicy, RetryLimit};
pub use spec::{ActivationSpec, DeliveryLimit, DestinationKind, ExhaustedAction};
pub use subscribers::{PoolTracker, Subscribe, SubscriberSet};
pub use tx::{
    InProcessTm, InboundResource, ResourceOutcome, TransactedProducer, Transaction,
    TransactionManager, TxCoordinator, TxResource, TxState,
};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
