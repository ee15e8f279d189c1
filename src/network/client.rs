//! Per-call RPC client.
//!
//! Opens a fresh connection for every call. The call rate of a node is
//! bounded by its step rate, so connection reuse buys little; a per-call
//! open keeps blocking calls (Pop, GetInput, rendezvous Send) from
//! serializing unrelated traffic on a shared stream.

use crate::network::frame;
use crate::network::rpc::{Reply, Request, RpcError};
use crate::runtime::CancelToken;
use crate::types::encoding::{Decode, Encode};
use tokio::net::TcpStream;

/// Issues one request to the peer at `addr` and awaits its reply.
///
/// The whole exchange races against `token`: when it fires the
/// connection is dropped and the call fails with `RpcError::Cancelled`.
/// A `Reply::Err` from the peer surfaces as `RpcError::Remote`.
pub async fn call(addr: &str, request: &Request, token: &CancelToken) -> Result<Reply, RpcError> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|_| RpcError::Connect(addr.to_string()))?;

        frame::write_frame(&mut stream, &request.to_bytes())
            .await
            .map_err(|_| RpcError::Io(addr.to_string()))?;

        let payload = frame::read_frame(&mut stream)
            .await
            .map_err(|_| RpcError::Io(addr.to_string()))?;

        Reply::from_bytes(&payload).map_err(|_| RpcError::BadFrame(addr.to_string()))
    };

    let reply = tokio::select! {
        reply = exchange => reply?,
        _ = token.cancelled() => return Err(RpcError::Cancelled),
    };

    match reply {
        Reply::Err { message } => Err(RpcError::Remote(message)),
        reply => Ok(reply),
    }
}

/// Issues a request whose success carries no payload.
pub async fn call_ok(addr: &str, request: &Request, token: &CancelToken) -> Result<(), RpcError> {
    match call(addr, request, token).await? {
        Reply::Ok => Ok(()),
        _ => Err(RpcError::UnexpectedReply(addr.to_string())),
    }
}

/// Issues a request whose success carries a value (`Pop`, `GetInput`).
pub async fn call_value(
    addr: &str,
    request: &Request,
    token: &CancelToken,
) -> Result<i32, RpcError> {
    match call(addr, request, token).await? {
        Reply::Value { value } => Ok(value),
        _ => Err(RpcError::UnexpectedReply(addr.to_string())),
    }
}
