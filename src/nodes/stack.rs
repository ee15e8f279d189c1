//! Stack node: an unbounded LIFO of integers with blocking pop.

use crate::network::rpc::{Reply, Request};
use crate::network::server::{self, NodeService};
use crate::nodes::errors::NodeError;
use crate::runtime::CancelToken;
use crate::types::wrapper_types::BoxFuture;
use crate::utils::log::Logger;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// A node holding a LIFO sequence of integers.
///
/// Push is non-blocking and unbounded; Pop blocks until a value is
/// available or the node's cancellation token fires. Run and Pause only
/// manage the token; stored values survive both. Reset clears the
/// sequence.
pub struct StackNode {
    values: Mutex<Vec<i32>>,
    /// Pinged non-blockingly on every push; pop waiters re-check the
    /// stack after each wake.
    wake: Notify,
    token: Mutex<CancelToken>,
    log: Logger,
}

impl StackNode {
    /// Creates a stopped stack node identified by `address`.
    pub fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(Vec::new()),
            wake: Notify::new(),
            token: Mutex::new(CancelToken::new()),
            log: Logger::new(address),
        })
    }

    /// Starts serving RPCs on `listener`.
    pub fn start(self: &Arc<Self>, listener: TcpListener) {
        let service: Arc<dyn NodeService> = self.clone();
        tokio::spawn(server::serve(listener, service, self.log.clone()));
    }

    /// Installs a fresh token for the next run phase.
    pub fn run(&self) {
        *self.lock_token() = CancelToken::new();
        self.log.info("node was run");
    }

    /// Fires the current token, aborting blocked pops, and installs a
    /// fresh one. Stored values are preserved.
    pub fn pause(&self) {
        self.replace_token();
        self.log.info("node was paused");
    }

    /// Pause plus clearing the stored sequence.
    pub fn reset(&self) {
        self.replace_token();
        self.lock_values().clear();
        self.log.info("node was reset");
    }

    /// Pushes a value; O(1), never blocks.
    pub fn push(&self, value: i32) {
        self.lock_values().push(value);
        self.wake.notify_one();
        self.log.info("value was pushed");
    }

    /// Pops the most recently pushed value, waiting until one is
    /// available or the current token fires.
    pub async fn pop(&self) -> Result<i32, NodeError> {
        let token = self.current_token();
        loop {
            if let Some(value) = self.lock_values().pop() {
                self.log.info("value was popped");
                return Ok(value);
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = token.cancelled() => return Err(NodeError::Cancelled),
            }
        }
    }

    fn current_token(&self) -> CancelToken {
        self.lock_token().clone()
    }

    fn replace_token(&self) {
        let mut token = self.lock_token();
        token.fire();
        *token = CancelToken::new();
    }

    fn lock_values(&self) -> MutexGuard<'_, Vec<i32>> {
        self.values.lock().expect("stack lock poisoned")
    }

    fn lock_token(&self) -> MutexGuard<'_, CancelToken> {
        self.token.lock().expect("token lock poisoned")
    }
}

impl NodeService for StackNode {
    fn handle(self: Arc<Self>, request: Request) -> BoxFuture<'static, Reply> {
        Box::pin(async move {
            match request {
                Request::Run => {
                    self.run();
                    Reply::Ok
                }
                Request::Pause => {
                    self.pause();
                    Reply::Ok
                }
                Request::Reset => {
                    self.reset();
                    Reply::Ok
                }
                Request::Push { value } => {
                    self.push(value);
                    Reply::Ok
                }
                Request::Pop => match self.pop().await {
                    Ok(value) => Reply::Value { value },
                    Err(e) => Reply::Err {
                        message: e.to_string(),
                    },
                },
                _ => Reply::Err {
                    message: "operation not supported by a stack node".to_string(),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn push_pop_is_lifo() {
        let node = StackNode::new("s");
        node.push(1);
        node.push(2);
        node.push(3);

        assert_eq!(node.pop().await.unwrap(), 3);
        assert_eq!(node.pop().await.unwrap(), 2);
        assert_eq!(node.pop().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pop_blocks_until_push() {
        let node = StackNode::new("s");

        let popper = {
            let node = node.clone();
            tokio::spawn(async move { node.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!popper.is_finished());

        node.push(11);
        let value = timeout(Duration::from_secs(1), popper)
            .await
            .expect("blocked pop did not resume")
            .unwrap()
            .unwrap();
        assert_eq!(value, 11);
    }

    #[tokio::test]
    async fn pause_aborts_blocked_pop() {
        let node = StackNode::new("s");

        let popper = {
            let node = node.clone();
            tokio::spawn(async move { node.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        node.pause();

        let result = timeout(Duration::from_secs(1), popper)
            .await
            .expect("cancelled pop did not resume")
            .unwrap();
        assert!(matches!(result, Err(NodeError::Cancelled)));
    }

    #[tokio::test]
    async fn pause_preserves_values_reset_clears_them() {
        let node = StackNode::new("s");
        node.push(5);
        node.pause();
        node.run();
        assert_eq!(node.pop().await.unwrap(), 5);

        node.push(6);
        node.reset();
        node.run();
        let result = timeout(Duration::from_millis(50), node.pop()).await;
        assert!(result.is_err(), "reset must clear stored values");
    }

    #[tokio::test]
    async fn pop_after_pause_and_run_works_again() {
        let node = StackNode::new("s");
        node.pause();
        node.run();

        node.push(9);
        assert_eq!(node.pop().await.unwrap(), 9);
    }
}
