use crate::network::rpc::RpcError;
use crate::runtime::mailbox::WaitError;
use crate::tis::errors::AsmError;
use tisnet_derive::Error;

/// Errors surfaced by node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A blocking operation was aborted by the owning node's cancellation
    /// token. Normal control flow; never surfaced to the operator.
    #[error("operation cancelled")]
    Cancelled,
    /// A `Send` RPC named a register outside R0..R3.
    #[error("register {0} is not a valid mailbox")]
    InvalidRegister(u8),
    /// A `load` named an address missing from the directory.
    #[error("node {0} not valid on this network")]
    UnknownNode(String),
    /// `compute` was issued while the master is stopped.
    #[error("network is not running")]
    NotRunning,
    /// Assembly source failed to parse.
    #[error("{0}")]
    Asm(AsmError),
    /// A call to a peer node failed.
    #[error("{0}")]
    Rpc(RpcError),
}

impl From<AsmError> for NodeError {
    fn from(e: AsmError) -> Self {
        NodeError::Asm(e)
    }
}

impl From<WaitError> for NodeError {
    fn from(_: WaitError) -> Self {
        NodeError::Cancelled
    }
}

impl From<RpcError> for NodeError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Cancelled => NodeError::Cancelled,
            other => NodeError::Rpc(other),
        }
    }
}
