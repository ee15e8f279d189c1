//! Capacity-1 integer mailboxes with rendezvous semantics.
//!
//! A mailbox holds at most one value. `put` suspends while the slot is
//! occupied, so a sender observes backpressure until the receiver has
//! consumed the previous value; `take` suspends while the slot is empty.
//! Both waits abort when the supplied cancellation token fires.

use crate::runtime::cancel::CancelToken;
use std::sync::{Arc, Mutex};
use tisnet_derive::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{Receiver, Sender, channel};

/// Error returned when a blocking mailbox operation is aborted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    /// The wait was interrupted by the owning node's cancellation token
    /// or the mailbox was torn down mid-wait.
    #[error("wait cancelled")]
    Cancelled,
}

/// A bounded slot of capacity 1 carrying one integer.
///
/// One writer (a remote `Send` handler) and one reader (the step loop)
/// is the intended sharing pattern. `reset` replaces the underlying
/// channel so no stale value survives a node reset.
pub struct Mailbox {
    slot: Mutex<Slot>,
}

struct Slot {
    tx: Sender<i32>,
    rx: Arc<AsyncMutex<Receiver<i32>>>,
}

impl Slot {
    fn new() -> Self {
        let (tx, rx) = channel(1);
        Self {
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
        }
    }
}

impl Mailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::new()),
        }
    }

    /// Deposits a value, waiting until the slot is free.
    ///
    /// Aborts with `WaitError::Cancelled` when `token` fires or when the
    /// mailbox is reset while the put is pending.
    pub async fn put(&self, value: i32, token: &CancelToken) -> Result<(), WaitError> {
        let tx = self.lock_slot().tx.clone();
        tokio::select! {
            res = tx.send(value) => res.map_err(|_| WaitError::Cancelled),
            _ = token.cancelled() => Err(WaitError::Cancelled),
        }
    }

    /// Removes and returns the stored value, waiting until one is present.
    ///
    /// Aborts with `WaitError::Cancelled` when `token` fires.
    pub async fn take(&self, token: &CancelToken) -> Result<i32, WaitError> {
        let rx = self.lock_slot().rx.clone();
        let recv = async move {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        tokio::select! {
            value = recv => value.ok_or(WaitError::Cancelled),
            _ = token.cancelled() => Err(WaitError::Cancelled),
        }
    }

    /// Replaces the slot with a fresh, empty one.
    ///
    /// Pending puts against the old slot fail once their phase token fires
    /// or the old receiver is dropped; the stored value, if any, is lost.
    pub fn reset(&self) {
        *self.lock_slot() = Slot::new();
    }

    /// Returns true if no value is currently stored.
    pub fn is_empty(&self) -> bool {
        self.lock_slot().tx.capacity() == 1
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().expect("mailbox lock poisoned")
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
