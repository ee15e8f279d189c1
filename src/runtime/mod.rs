//! Shared concurrency primitives for node runtimes.
//!
//! Provides the one-shot cancellation token scoped to a node's run phase
//! and the capacity-1 rendezvous mailbox used for inter-node register
//! transfers and the master's I/O channels.

pub mod cancel;
pub mod mailbox;

pub use cancel::CancelToken;
pub use mailbox::{Mailbox, WaitError};
