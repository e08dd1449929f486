//! # Closure-backed handler (`HandlerFn`)
//!
//! [`HandlerFn`] wraps a closure `F: Fn(Message, Arc<Transaction>) -> Fut`,
//! producing a fresh future per delivery. This avoids shared mutable state;
//! if handlers need shared state, move an `Arc<...>` into the closure
//! explicitly.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::Message;
use crate::error::HandlerError;
use crate::handlers::handler::Handler;
use crate::tx::Transaction;

/// Closure-backed handler implementation.
///
/// Wraps a closure that *creates* a new future per delivery.
///
/// ## Example
/// ```rust
/// use std::sync::Arc;
/// use inflow::{HandlerError, HandlerFn, HandlerRef, Message, Transaction};
///
/// let h: HandlerRef = HandlerFn::arc(|message: Message, _tx: Arc<Transaction>| async move {
///     println!("message {}", message.id);
///     Ok::<_, HandlerError>(())
/// });
/// ```
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Creates a new closure-backed handler.
    ///
    /// Prefer [`HandlerFn::arc`] when you immediately need a [`HandlerRef`](crate::HandlerRef).
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Message, Arc<Transaction>) -> Fut + Send + Sync + 'static, // Fn, not FnMut
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn on_message(
        &self,
        message: Message,
        tx: Arc<Transaction>,
    ) -> Result<(), HandlerError> {
        (self.f)(message, tx).await
    }
}
