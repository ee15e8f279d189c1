//! Inter-node RPC: wire schema, framing, per-call client and the
//! node-side server loop.

pub mod client;
pub mod frame;
pub mod rpc;
pub mod server;

pub use rpc::{Reply, Request, RpcError};
pub use server::NodeService;
