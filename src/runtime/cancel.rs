//! One-shot cancellation tokens.
//!
//! A token is scoped to exactly one run phase of its node. Firing it
//! unblocks every operation awaiting it; tokens are never re-armed, and a
//! fresh token is installed on every transition out of the running state.

use std::sync::Arc;
use tokio::sync::watch;

/// A clonable, fire-once cancellation signal.
///
/// All clones observe the same state. `fire` is idempotent; once fired,
/// `cancelled` resolves immediately for every current and future waiter.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Creates a new, unfired token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Fires the token, waking every waiter.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true if the token has been fired.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token has been fired.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives inside self, so wait_for can only fail after
        // every clone of the token is gone.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
