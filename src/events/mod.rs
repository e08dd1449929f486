//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the activation manager,
//! handler sessions, and reconnect supervisors.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `ActivationManager`, `HandlerSession`, `Reconnector`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the activation's fan-out listener (feeds the
//!   `SubscriberSet`, including the `PoolTracker`) and the exhausted-session
//!   listener.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
