//! # Pool tracker with sequence-based ordering.
//!
//! Maintains authoritative state of which sessions are currently live,
//! using event sequence numbers to handle out-of-order delivery.
//!
//! A session is **live** while it holds a healthy connection and consumer
//! (`SessionActive`); it stops being live on `ConnectionLost`,
//! `SessionExhausted`, or `SessionStopped`. This is the signal the pool's
//! convergence invariant is observed through: after a transient fault the
//! live count returns to the configured session count.
//!
//! ## Rules
//! - Only the four session-state kinds above change liveness.
//! - Events with `seq <= last_seq` for a session are **rejected** (stale).
//! - Read operations are **eventually consistent** (fed by the async
//!   fan-out).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Per-session state for ordering validation.
#[derive(Debug, Clone)]
struct SessionState {
    /// Last seen sequence number for this session.
    last_seq: u64,
    /// Current status (true = live, false = down or stopped).
    live: bool,
}

/// Thread-safe tracker of live sessions.
///
/// One instance is installed automatically into every activation's
/// subscriber set; reach it via `ActivationHandle::tracker()`.
pub struct PoolTracker {
    state: RwLock<HashMap<String, SessionState>>,
}

impl PoolTracker {
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Number of sessions currently live.
    pub fn live_count(&self) -> usize {
        self.state
            .read()
            .expect("pool tracker poisoned")
            .values()
            .filter(|s| s.live)
            .count()
    }

    /// True if the named session is currently live.
    pub fn is_live(&self, session: &str) -> bool {
        self.state
            .read()
            .expect("pool tracker poisoned")
            .get(session)
            .is_some_and(|s| s.live)
    }

    /// Names of the sessions currently live (sorted).
    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .read()
            .expect("pool tracker poisoned")
            .iter()
            .filter(|(_, s)| s.live)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Applies one event if it is newer than the last seen for its session.
    fn update(&self, event: &Event) {
        let live = match event.kind {
            EventKind::SessionActive => true,
            EventKind::ConnectionLost
            | EventKind::SessionExhausted
            | EventKind::SessionStopped => false,
            _ => return,
        };
        let Some(session) = event.session.as_deref() else {
            return;
        };

        let mut state = self.state.write().expect("pool tracker poisoned");
        match state.get_mut(session) {
            Some(entry) => {
                if event.seq <= entry.last_seq {
                    return; // stale
                }
                entry.last_seq = event.seq;
                entry.live = live;
            }
            None => {
                state.insert(
                    session.to_string(),
                    SessionState {
                        last_seq: event.seq,
                        live,
                    },
                );
            }
        }
    }
}

impl Default for PoolTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscribe for PoolTracker {
    async fn on_event(&self, event: &Event) {
        self.update(event);
    }

    fn name(&self) -> &'static str {
        "pool-tracker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: EventKind, session: &str) -> Event {
        Event::now(kind).with_session(session.to_string())
    }

    #[tokio::test]
    async fn tracks_live_transitions() {
        let tracker = PoolTracker::new();
        tracker.on_event(&ev(EventKind::SessionActive, "q-0")).await;
        tracker.on_event(&ev(EventKind::SessionActive, "q-1")).await;
        assert_eq!(tracker.live_count(), 2);

        tracker.on_event(&ev(EventKind::ConnectionLost, "q-0")).await;
        assert_eq!(tracker.live_count(), 1);
        assert!(!tracker.is_live("q-0"));
        assert!(tracker.is_live("q-1"));

        tracker.on_event(&ev(EventKind::SessionActive, "q-0")).await;
        assert_eq!(tracker.live_count(), 2);
    }

    #[tokio::test]
    async fn stale_events_are_rejected() {
        let tracker = PoolTracker::new();
        let active = ev(EventKind::SessionActive, "q-0");
        let lost = ev(EventKind::ConnectionLost, "q-0");
        // Apply out of order: the later event first.
        tracker.on_event(&lost).await;
        tracker.on_event(&active).await;
        assert!(!tracker.is_live("q-0"), "stale SessionActive must not win");
    }

    #[tokio::test]
    async fn non_session_events_are_ignored() {
        let tracker = PoolTracker::new();
        tracker
            .on_event(&Event::now(EventKind::ActivationStarted))
            .await;
        tracker
            .on_event(&ev(EventKind::DeliveryCommitted, "q-0"))
            .await;
        assert_eq!(tracker.live_count(), 0);
    }

    #[tokio::test]
    async fn live_names_are_sorted() {
        let tracker = PoolTracker::new();
        tracker.on_event(&ev(EventKind::SessionActive, "q-2")).await;
        tracker.on_event(&ev(EventKind::SessionActive, "q-0")).await;
        assert_eq!(tracker.live_names(), vec!["q-0", "q-2"]);
    }
}
