//! Handler abstractions.
//!
//! This module provides the handler-callback types:
//! - [`Handler`] - trait for transactional message handlers
//! - [`HandlerFn`] - closure-backed handler implementation
//! - [`HandlerRef`] - shared reference to a handler (`Arc<dyn Handler>`)

mod handler;
mod handler_fn;

pub use handler::{Handler, HandlerRef};
pub use handler_fn::HandlerFn;
