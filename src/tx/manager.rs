//! # Transaction-manager provider.
//!
//! [`TransactionManager`] is the collaborator that creates transactions and
//! arms their timeout watchdogs. It is ordinary configuration: pass an
//! implementation to
//! `ActivationManagerBuilder::with_transaction_manager`, or let the builder
//! default to the embedded [`InProcessTm`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::sleep;

use crate::tx::transaction::Transaction;

/// Creates per-delivery transactions.
///
/// Implementations must arm the transaction timeout: if commit or rollback
/// has not been invoked within `timeout`, the transaction is marked
/// rollback-only so a late commit fails deterministically instead of
/// hanging. The manager is shared across every session of an activation and
/// must provide its own internal concurrency control; it never holds
/// cross-transaction state on behalf of callers.
pub trait TransactionManager: Send + Sync + 'static {
    /// Begins a new transaction; `timeout` of `None` disables the watchdog.
    ///
    /// Must be called from within an async runtime (the watchdog is a
    /// spawned timer).
    fn begin(&self, timeout: Option<Duration>) -> Arc<Transaction>;
}

/// Embedded in-process transaction manager.
///
/// Drives two-phase commit over the participants enlisted in each
/// [`Transaction`]; suitable wherever all participants live in this
/// process. The default provider.
pub struct InProcessTm {
    next_id: AtomicU64,
}

impl InProcessTm {
    /// Creates a new manager.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
        }
    }

    /// Creates a new manager behind a shared handle.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InProcessTm {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager for InProcessTm {
    fn begin(&self, timeout: Option<Duration>) -> Arc<Transaction> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let tx = Transaction::new(id, timeout);

        if let Some(window) = timeout.filter(|w| !w.is_zero()) {
            let armed = Arc::clone(&tx);
            let disarm = tx.watchdog();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sleep(window) => armed.mark_timed_out(),
                    _ = disarm.cancelled() => {}
                }
            });
        }
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TxError;
    use crate::tx::transaction::TxState;

    #[tokio::test]
    async fn ids_are_unique() {
        let tm = InProcessTm::new();
        let a = tm.begin(None);
        let b = tm.begin(None);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn watchdog_marks_rollback_only() {
        let tm = InProcessTm::new();
        let tx = tm.begin(Some(Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(tx.state(), TxState::RollbackOnly);
        assert!(matches!(
            tx.commit().await,
            Err(TxError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn watchdog_is_disarmed_by_completion() {
        let tm = InProcessTm::new();
        let tx = tm.begin(Some(Duration::from_millis(20)));
        tx.commit().await.expect("commit");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(tx.state(), TxState::Committed);
    }
}
