//! # Handler trait: the user-supplied delivery callback.
//!
//! A [`Handler`] is invoked once per received message, synchronously within
//! the delivery's transaction scope. The handler may enlist further
//! participants in the transaction (e.g. a
//! [`TransactedProducer`](crate::tx::TransactedProducer) for forwarding
//! sends); everything enlisted commits or rolls back as one atomic unit.
//!
//! Returning an error rolls the delivery back and leaves the message to the
//! broker's redelivery policy. It does **not** tear down the session.

use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::Message;
use crate::error::HandlerError;
use crate::tx::Transaction;

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;

/// # Transactional message callback.
///
/// One shared instance serves every session in the pool; invocations from
/// different sessions run concurrently, each inside its own transaction.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use inflow::{Handler, HandlerError, Message, Transaction};
///
/// struct Audit;
///
/// #[async_trait]
/// impl Handler for Audit {
///     async fn on_message(
///         &self,
///         message: Message,
///         _tx: Arc<Transaction>,
///     ) -> Result<(), HandlerError> {
///         println!("got {} bytes", message.body.len());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Processes one message inside the active transaction.
    ///
    /// `tx` is the delivery's transaction; the inbound acknowledgment is
    /// already enlisted. Additional work (forwarding sends, state updates)
    /// joins the same atomic unit via [`Transaction::enlist`].
    async fn on_message(
        &self,
        message: Message,
        tx: Arc<Transaction>,
    ) -> Result<(), HandlerError>;
}
