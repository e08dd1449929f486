//! # Per-session transaction guard.
//!
//! [`TxCoordinator`] enforces the one-transaction-per-session rule: a
//! session never has two deliveries' transactions in flight, and `begin`
//! while one is active is a caller bug surfaced as
//! [`TxError::AlreadyActive`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TxError;
use crate::tx::manager::TransactionManager;
use crate::tx::transaction::Transaction;

/// Guards one session's transaction lifecycle.
///
/// Owns at most one live [`Transaction`] at a time; `commit`/`rollback`
/// consume it, so the next delivery starts clean.
pub struct TxCoordinator {
    tm: Arc<dyn TransactionManager>,
    current: Mutex<Option<Arc<Transaction>>>,
}

impl TxCoordinator {
    /// Creates a coordinator backed by the given manager.
    pub fn new(tm: Arc<dyn TransactionManager>) -> Self {
        Self {
            tm,
            current: Mutex::new(None),
        }
    }

    /// Begins a transaction for the next delivery.
    ///
    /// Fails with [`TxError::AlreadyActive`] if the previous delivery's
    /// transaction has not completed.
    pub fn begin(&self, timeout: Option<Duration>) -> Result<Arc<Transaction>, TxError> {
        let mut current = self.current.lock().expect("coordinator poisoned");
        if let Some(tx) = current.as_ref() {
            if !tx.is_completed() {
                return Err(TxError::AlreadyActive);
            }
        }
        let tx = self.tm.begin(timeout);
        *current = Some(Arc::clone(&tx));
        Ok(tx)
    }

    /// The transaction currently associated with this session, if any.
    pub fn current(&self) -> Option<Arc<Transaction>> {
        self.current.lock().expect("coordinator poisoned").clone()
    }

    /// Commits the current transaction, releasing the session's slot.
    pub async fn commit(&self) -> Result<(), TxError> {
        let tx = self.take()?;
        tx.commit().await
    }

    /// Rolls the current transaction back, releasing the session's slot.
    pub async fn rollback(&self) -> Result<(), TxError> {
        let tx = self.take()?;
        tx.rollback().await
    }

    fn take(&self) -> Result<Arc<Transaction>, TxError> {
        self.current
            .lock()
            .expect("coordinator poisoned")
            .take()
            .ok_or(TxError::NotActive)
    }
}
