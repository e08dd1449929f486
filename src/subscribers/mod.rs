//! Event subscribers for the activation runtime.
//!
//! This module provides the [`Subscribe`] trait and built-in
//! implementations for handling runtime events broadcast through the
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Sessions ── publish(Event) ──► Bus ──► fan-out listener ──► SubscriberSet
//!                                                 ┌─────────┬──────┴──────┐
//!                                                 ▼         ▼             ▼
//!                                            PoolTracker  LogWriter   custom...
//! ```
//!
//! ## Subscriber types
//! - **Passive subscribers** - observe and react to events (logging,
//!   metrics, alerts)
//! - **Stateful subscribers** - maintain state derived from events
//!   ([`PoolTracker`])

mod pool;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod log;

pub use pool::PoolTracker;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
