//! Cyclic lifecycle state machine shared by dispatchers, groups and the manager.
//!
//! ```text
//! Idle ──► Starting ──► Running ──► Stopping ──► Idle
//! ```
//!
//! Every transition request is checked against this table. An out-of-order
//! request is rejected with [`ChunkwireError::InvalidTransition`] and leaves
//! the state unchanged. The current state is published through a
//! `tokio::sync::watch` channel so callers can await a particular state
//! (for example `Idle` after a drain).

use std::fmt;

use tokio::sync::watch;

use crate::error::{ChunkwireError, Result};

/// One of the four lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Not running; may be started.
    Idle,
    /// Start requested, not yet accepting work.
    Starting,
    /// Accepting work.
    Running,
    /// Stop requested, draining in-flight work.
    Stopping,
}

impl LifecycleState {
    /// The only state this one may legally move to.
    #[inline]
    pub fn successor(self) -> Self {
        match self {
            Self::Idle => Self::Starting,
            Self::Starting => Self::Running,
            Self::Running => Self::Stopping,
            Self::Stopping => Self::Idle,
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, awaitable lifecycle with a fixed transition table.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    /// Create a lifecycle in the `Idle` state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Idle);
        Self { tx }
    }

    /// Current state.
    #[inline]
    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move to `next` if it is the successor of the current state.
    ///
    /// The check and the update happen atomically, so two racing callers
    /// can never both succeed with the same transition.
    pub fn transition(&self, next: LifecycleState) -> Result<()> {
        let mut from = LifecycleState::Idle;
        let moved = self.tx.send_if_modified(|state| {
            from = *state;
            if state.successor() == next {
                *state = next;
                true
            } else {
                false
            }
        });

        if moved {
            Ok(())
        } else {
            Err(ChunkwireError::InvalidTransition { from, to: next })
        }
    }

    /// Wait until the state equals `target`.
    pub async fn wait_for(&self, target: LifecycleState) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use LifecycleState::*;

    #[test]
    fn test_starts_idle() {
        assert_eq!(Lifecycle::new().current(), Idle);
    }

    #[test]
    fn test_full_cycle_succeeds() {
        let lifecycle = Lifecycle::new();
        for next in [Starting, Running, Stopping, Idle, Starting] {
            lifecycle.transition(next).unwrap();
            assert_eq!(lifecycle.current(), next);
        }
    }

    #[test]
    fn test_out_of_order_is_rejected_and_noop() {
        let lifecycle = Lifecycle::new();

        for bad in [Idle, Running, Stopping] {
            let err = lifecycle.transition(bad).unwrap_err();
            assert!(matches!(
                err,
                ChunkwireError::InvalidTransition { from: Idle, to } if to == bad
            ));
            assert_eq!(lifecycle.current(), Idle);
        }

        lifecycle.transition(Starting).unwrap();
        assert!(lifecycle.transition(Stopping).is_err());
        assert!(lifecycle.transition(Idle).is_err());
        assert_eq!(lifecycle.current(), Starting);
    }

    #[test]
    fn test_successor_table() {
        assert_eq!(Idle.successor(), Starting);
        assert_eq!(Starting.successor(), Running);
        assert_eq!(Running.successor(), Stopping);
        assert_eq!(Stopping.successor(), Idle);
    }

    #[test]
    fn test_display() {
        assert_eq!(Running.to_string(), "running");
        assert_eq!(Stopping.as_str(), "stopping");
    }

    #[tokio::test]
    async fn test_wait_for_state() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.transition(Starting).unwrap();
        lifecycle.transition(Running).unwrap();

        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.wait_for(Idle).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        lifecycle.transition(Stopping).unwrap();
        lifecycle.transition(Idle).unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
