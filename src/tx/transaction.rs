//! # Per-delivery transaction state machine.
//!
//! A [`Transaction`] is created for one delivery attempt and never reused.
//! Participants join via [`Transaction::enlist`] while the transaction is
//! `Active`; once commit begins the enlisted set is frozen.
//!
//! ## States
//! ```text
//! Active ──set_rollback_only/timeout──► RollbackOnly ──commit/rollback──► RolledBack
//!   │
//!   └─commit──► Committing ──all prepared──► Committed
//!                   └─ any veto ────────────► RolledBack
//! ```
//!
//! ## Rules
//! - Enlist only while `Active`; never after commit begins.
//! - Commit is prepare-then-commit; any prepare veto rolls everything back.
//!   Partial commit is forbidden.
//! - A `RollbackOnly` transaction fails commit deterministically (and is
//!   rolled back as a side effect) instead of hanging.
//! - Rollback of an already rolled-back transaction is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TxError;

/// Outcome of one participant operation.
pub type ResourceOutcome = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A two-phase-commit participant.
///
/// The contract follows the usual presumed-abort protocol: a participant
/// that returns `Ok` from [`prepare`](TxResource::prepare) has promised it
/// can complete [`commit`](TxResource::commit); a failure after that point
/// is a heuristic outcome, reported but never replayed.
#[async_trait]
pub trait TxResource: Send + Sync + 'static {
    /// Participant name for error context.
    fn name(&self) -> &str;

    /// Phase one: vote. `Ok` promises the commit will succeed.
    async fn prepare(&self) -> ResourceOutcome;

    /// Phase two: make the work durable.
    async fn commit(&self) -> ResourceOutcome;

    /// Undo all observable effects of this attempt.
    async fn rollback(&self) -> ResourceOutcome;
}

/// Transaction lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    /// Accepting enlistments and work.
    Active,
    /// Commit is forbidden; the only way out is rollback.
    RollbackOnly,
    /// Prepare/commit is running; the enlisted set is frozen.
    Committing,
    /// Terminal: all participants committed.
    Committed,
    /// Terminal: all effects undone.
    RolledBack,
}

/// One delivery's distributed transaction.
///
/// Scoped to exactly one delivery attempt; created by a
/// [`TransactionManager`](crate::tx::TransactionManager) and driven by the
/// session's [`TxCoordinator`](crate::tx::TxCoordinator). Handlers interact
/// with it only to [`enlist`](Transaction::enlist) further participants or
/// to [`set_rollback_only`](Transaction::set_rollback_only).
pub struct Transaction {
    id: u64,
    timeout: Option<Duration>,
    state: Mutex<TxState>,
    resources: Mutex<Vec<Arc<dyn TxResource>>>,
    timed_out: AtomicBool,
    watchdog: CancellationToken,
}

impl Transaction {
    pub(crate) fn new(id: u64, timeout: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            id,
            timeout,
            state: Mutex::new(TxState::Active),
            resources: Mutex::new(Vec::new()),
            timed_out: AtomicBool::new(false),
            watchdog: CancellationToken::new(),
        })
    }

    /// The transaction id (unique per manager).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        *self.state.lock().expect("tx state poisoned")
    }

    /// True once the transaction reached `Committed` or `RolledBack`.
    pub fn is_completed(&self) -> bool {
        matches!(self.state(), TxState::Committed | TxState::RolledBack)
    }

    /// Token the timeout watchdog waits on; cancelled at completion.
    pub(crate) fn watchdog(&self) -> CancellationToken {
        self.watchdog.clone()
    }

    /// Adds a participant. Allowed only while `Active`.
    pub fn enlist(&self, resource: Arc<dyn TxResource>) -> Result<(), TxError> {
        match self.state() {
            TxState::Active => {
                self.resources
                    .lock()
                    .expect("tx resources poisoned")
                    .push(resource);
                Ok(())
            }
            TxState::RollbackOnly => Err(TxError::RollbackOnly),
            TxState::Committing => Err(TxError::NotActive),
            TxState::Committed | TxState::RolledBack => Err(TxError::Completed),
        }
    }

    /// Ends a participant's work phase.
    ///
    /// The resource remains a commit participant; this only validates that
    /// the transaction is still accepting work.
    pub fn delist(&self, _resource: &Arc<dyn TxResource>) -> Result<(), TxError> {
        match self.state() {
            TxState::Active | TxState::RollbackOnly => Ok(()),
            TxState::Committing => Err(TxError::NotActive),
            TxState::Committed | TxState::RolledBack => Err(TxError::Completed),
        }
    }

    /// Forbids commit. A later commit attempt fails deterministically and
    /// rolls the transaction back. No effect once commit has begun.
    pub fn set_rollback_only(&self) {
        let mut state = self.state.lock().expect("tx state poisoned");
        if *state == TxState::Active {
            *state = TxState::RollbackOnly;
        }
    }

    /// Watchdog path: like [`set_rollback_only`](Transaction::set_rollback_only)
    /// but records that the cause was the transaction window elapsing.
    pub(crate) fn mark_timed_out(&self) {
        let mut state = self.state.lock().expect("tx state poisoned");
        if *state == TxState::Active {
            *state = TxState::RollbackOnly;
            self.timed_out.store(true, Ordering::Release);
        }
    }

    /// Performs prepare-then-commit across all enlisted participants.
    ///
    /// - Any prepare veto rolls the whole transaction back and returns
    ///   [`TxError::PrepareFailed`].
    /// - In `RollbackOnly` the transaction is rolled back and commit fails
    ///   with [`TxError::RollbackOnly`] (or [`TxError::Timeout`] when the
    ///   watchdog caused it).
    /// - A participant failure after a successful prepare round is reported
    ///   as [`TxError::Heuristic`]; the transaction still counts as
    ///   committed and must not be replayed.
    pub async fn commit(&self) -> Result<(), TxError> {
        let rollback_only = {
            let mut state = self.state.lock().expect("tx state poisoned");
            match *state {
                TxState::Active => {
                    *state = TxState::Committing;
                    false
                }
                TxState::RollbackOnly => true,
                TxState::Committing => return Err(TxError::NotActive),
                TxState::Committed | TxState::RolledBack => return Err(TxError::Completed),
            }
        };
        if rollback_only {
            self.finish_rollback().await;
            return Err(self.rollback_only_error());
        }

        let resources = self.snapshot();
        for resource in &resources {
            if let Err(veto) = resource.prepare().await {
                let failed = resource.name().to_string();
                self.finish_rollback().await;
                return Err(TxError::PrepareFailed {
                    resource: failed,
                    reason: veto.to_string(),
                });
            }
        }

        let mut in_doubt: Option<TxError> = None;
        for resource in &resources {
            if let Err(err) = resource.commit().await {
                tracing::warn!(
                    tx = self.id,
                    resource = resource.name(),
                    error = %err,
                    "participant failed after prepare; outcome in doubt"
                );
                in_doubt.get_or_insert(TxError::Heuristic {
                    resource: resource.name().to_string(),
                    reason: err.to_string(),
                });
            }
        }

        *self.state.lock().expect("tx state poisoned") = TxState::Committed;
        self.watchdog.cancel();
        match in_doubt {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Undoes the effects of all enlisted participants for this attempt.
    ///
    /// Idempotent on an already rolled-back transaction; fails on a
    /// committed one.
    pub async fn rollback(&self) -> Result<(), TxError> {
        {
            let mut state = self.state.lock().expect("tx state poisoned");
            match *state {
                TxState::Active | TxState::RollbackOnly => *state = TxState::RolledBack,
                TxState::RolledBack => return Ok(()),
                TxState::Committing => return Err(TxError::NotActive),
                TxState::Committed => return Err(TxError::Completed),
            }
        }
        self.undo_all().await;
        self.watchdog.cancel();
        Ok(())
    }

    fn rollback_only_error(&self) -> TxError {
        if self.timed_out.load(Ordering::Acquire) {
            TxError::Timeout {
                timeout: self.timeout.unwrap_or(Duration::ZERO),
            }
        } else {
            TxError::RollbackOnly
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn TxResource>> {
        self.resources.lock().expect("tx resources poisoned").clone()
    }

    /// Rollback path used by a failed commit: state is already decided.
    async fn finish_rollback(&self) {
        *self.state.lock().expect("tx state poisoned") = TxState::RolledBack;
        self.undo_all().await;
        self.watchdog.cancel();
    }

    /// Participants are undone in reverse enlist order.
    async fn undo_all(&self) {
        for resource in self.snapshot().iter().rev() {
            if let Err(err) = resource.rollback().await {
                tracing::warn!(
                    tx = self.id,
                    resource = resource.name(),
                    error = %err,
                    "participant rollback failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Scripted participant recording the calls it receives.
    struct Probe {
        name: &'static str,
        veto_prepare: bool,
        prepares: AtomicU32,
        commits: AtomicU32,
        rollbacks: AtomicU32,
    }

    impl Probe {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                veto_prepare: false,
                prepares: AtomicU32::new(0),
                commits: AtomicU32::new(0),
                rollbacks: AtomicU32::new(0),
            })
        }

        fn vetoing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                veto_prepare: true,
                prepares: AtomicU32::new(0),
                commits: AtomicU32::new(0),
                rollbacks: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TxResource for Probe {
        fn name(&self) -> &str {
            self.name
        }

        async fn prepare(&self) -> ResourceOutcome {
            self.prepares.fetch_add(1, Ordering::Relaxed);
            if self.veto_prepare {
                Err("induced veto".into())
            } else {
                Ok(())
            }
        }

        async fn commit(&self) -> ResourceOutcome {
            self.commits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn rollback(&self) -> ResourceOutcome {
            self.rollbacks.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn commit_runs_prepare_then_commit() {
        let tx = Transaction::new(1, None);
        let a = Probe::new("a");
        let b = Probe::new("b");
        tx.enlist(a.clone()).expect("enlist a");
        tx.enlist(b.clone()).expect("enlist b");

        tx.commit().await.expect("commit");
        assert_eq!(tx.state(), TxState::Committed);
        assert_eq!(a.prepares.load(Ordering::Relaxed), 1);
        assert_eq!(a.commits.load(Ordering::Relaxed), 1);
        assert_eq!(b.commits.load(Ordering::Relaxed), 1);
        assert_eq!(a.rollbacks.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn prepare_veto_rolls_everything_back() {
        let tx = Transaction::new(1, None);
        let good = Probe::new("good");
        let bad = Probe::vetoing("bad");
        tx.enlist(good.clone()).expect("enlist good");
        tx.enlist(bad.clone()).expect("enlist bad");

        let err = tx.commit().await.expect_err("commit must fail");
        assert!(matches!(err, TxError::PrepareFailed { ref resource, .. } if resource == "bad"));
        assert_eq!(tx.state(), TxState::RolledBack);
        // No participant committed; all were rolled back.
        assert_eq!(good.commits.load(Ordering::Relaxed), 0);
        assert_eq!(bad.commits.load(Ordering::Relaxed), 0);
        assert_eq!(good.rollbacks.load(Ordering::Relaxed), 1);
        assert_eq!(bad.rollbacks.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn delist_keeps_resource_a_commit_participant() {
        let tx = Transaction::new(1, None);
        let probe = Probe::new("p");
        tx.enlist(probe.clone()).expect("enlist");

        let participant: Arc<dyn TxResource> = probe.clone();
        tx.delist(&participant).expect("delist");

        tx.commit().await.expect("commit");
        assert_eq!(probe.commits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn enlist_is_rejected_after_completion() {
        let tx = Transaction::new(1, None);
        tx.commit().await.expect("empty commit");
        let late = Probe::new("late");
        assert!(matches!(tx.enlist(late), Err(TxError::Completed)));
    }

    #[tokio::test]
    async fn rollback_only_makes_commit_fail_then_roll_back() {
        let tx = Transaction::new(1, None);
        let probe = Probe::new("p");
        tx.enlist(probe.clone()).expect("enlist");
        tx.set_rollback_only();

        let err = tx.commit().await.expect_err("commit must fail");
        assert!(matches!(err, TxError::RollbackOnly));
        assert_eq!(tx.state(), TxState::RolledBack);
        assert_eq!(probe.commits.load(Ordering::Relaxed), 0);
        assert_eq!(probe.rollbacks.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn timed_out_commit_reports_timeout() {
        let tx = Transaction::new(1, Some(Duration::from_millis(5)));
        tx.mark_timed_out();
        let err = tx.commit().await.expect_err("commit must fail");
        assert!(matches!(err, TxError::Timeout { .. }));
    }

    #[tokio::test]
    async fn rollback_is_idempotent_but_commit_is_final() {
        let tx = Transaction::new(1, None);
        tx.rollback().await.expect("first rollback");
        tx.rollback().await.expect("second rollback is a no-op");

        let tx = Transaction::new(2, None);
        tx.commit().await.expect("commit");
        assert!(matches!(
            tx.rollback().await,
            Err(TxError::Completed)
        ));
    }

    #[tokio::test]
    async fn rollback_undoes_in_reverse_order() {
        use std::sync::Mutex as StdMutex;

        struct Ordered {
            name: &'static str,
            log: Arc<StdMutex<Vec<&'static str>>>,
        }

        #[async_trait]
        impl TxResource for Ordered {
            fn name(&self) -> &str {
                self.name
            }
            async fn prepare(&self) -> ResourceOutcome {
                Ok(())
            }
            async fn commit(&self) -> ResourceOutcome {
                Ok(())
            }
            async fn rollback(&self) -> ResourceOutcome {
                self.log.lock().unwrap().push(self.name);
                Ok(())
            }
        }

        let log = Arc::new(StdMutex::new(Vec::new()));
        let tx = Transaction::new(1, None);
        tx.enlist(Arc::new(Ordered {
            name: "first",
            log: log.clone(),
        }))
        .expect("enlist");
        tx.enlist(Arc::new(Ordered {
            name: "second",
            log: log.clone(),
        }))
        .expect("enlist");

        tx.rollback().await.expect("rollback");
        assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
    }
}
