//! Per-delivery distributed transactions.
//!
//! Every delivery runs inside one [`Transaction`]: the inbound
//! acknowledgment is enlisted first, the handler may enlist further
//! participants (e.g. a [`TransactedProducer`] for forwarding sends), and
//! everything commits or rolls back as one atomic unit via two-phase
//! commit.
//!
//! ## Contents
//! - [`Transaction`], [`TxState`] the per-delivery state machine
//! - [`TxResource`] the two-phase-commit participant contract
//! - [`TxCoordinator`] per-session guard: one transaction in flight
//! - [`TransactionManager`], [`InProcessTm`] the pluggable provider
//! - [`InboundResource`], [`TransactedProducer`] broker-backed participants
//!
//! ## Wiring
//! ```text
//! HandlerSession ──► TxCoordinator::begin() ──► TransactionManager::begin()
//!        │                                          │ (spawns timeout watchdog)
//!        │ enlist(InboundResource)                  ▼
//!        │ handler(msg, tx) ──enlist──► Transaction { resources, state }
//!        │                                          │
//!        └─► TxCoordinator::commit() ──► prepare all ──► commit all
//!                          └─ any veto ──► rollback all
//! ```

mod coordinator;
mod manager;
mod resources;
mod transaction;

pub use coordinator::TxCoordinator;
pub use manager::{InProcessTm, TransactionManager};
pub use resources::{InboundResource, TransactedProducer};
pub use transaction::{ResourceOutcome, Transaction, TxResource, TxState};
