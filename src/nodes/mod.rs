//! The three node roles composing a network: program nodes interpreting
//! assembly, stack nodes holding LIFO values, and the master control
//! plane brokering external I/O.

pub mod errors;
pub mod master;
pub mod program;
pub mod stack;

#[cfg(test)]
mod tests;

pub use errors::NodeError;
pub use master::MasterNode;
pub use program::ProgramNode;
pub use stack::StackNode;

use crate::network::rpc::Reply;
use std::collections::HashMap;

/// Role of a node in the network directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Program,
    Stack,
}

impl NodeRole {
    /// Parses a role name as it appears in configuration.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "program" => Some(NodeRole::Program),
            "stack" => Some(NodeRole::Stack),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Program => write!(f, "program"),
            NodeRole::Stack => write!(f, "stack"),
        }
    }
}

/// The master's mapping from node address to role; immutable after
/// construction.
pub type Directory = HashMap<String, NodeRole>;

/// Maps an operation result onto the wire reply.
pub(crate) fn reply_from(result: Result<(), NodeError>) -> Reply {
    match result {
        Ok(()) => Reply::Ok,
        Err(e) => Reply::Err {
            message: e.to_string(),
        },
    }
}
