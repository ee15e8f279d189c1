//! Node-side RPC server loop.
//!
//! One task per inbound connection, one request per connection,
//! mirroring the per-call client. Blocking operations (Pop, GetInput,
//! rendezvous Send) simply hold their connection open until the reply
//! is ready or the caller hangs up.

use crate::network::frame;
use crate::network::rpc::{Reply, Request};
use crate::types::encoding::{Decode, Encode};
use crate::types::wrapper_types::BoxFuture;
use crate::utils::log::Logger;
use std::sync::Arc;
use tokio::io;
use tokio::net::{TcpListener, TcpStream};

/// Async service handling decoded requests for one node.
///
/// Implemented by every node role; operations outside the role's
/// contract answer `Reply::Err`.
pub trait NodeService: Send + Sync + 'static {
    /// Handles one request and produces its reply.
    fn handle(self: Arc<Self>, request: Request) -> BoxFuture<'static, Reply>;
}

/// Accepts connections on `listener` and dispatches each request to
/// `service`. Runs until the listener fails fatally; individual
/// connection errors are logged and do not stop the loop.
pub async fn serve(listener: TcpListener, service: Arc<dyn NodeService>, log: Logger) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                log.warn(&format!("accept failed: {e}"));
                continue;
            }
        };

        let service = service.clone();
        let log = log.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, service).await {
                // Peers cancelling mid-call drop the connection; that is
                // routine, so connection errors stay at warn level.
                log.warn(&format!("connection error: {e}"));
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, service: Arc<dyn NodeService>) -> io::Result<()> {
    let payload = frame::read_frame(&mut stream).await?;

    let reply = match Request::from_bytes(&payload) {
        Ok(request) => service.handle(request).await,
        Err(_) => Reply::Err {
            message: "malformed request".to_string(),
        },
    };

    frame::write_frame(&mut stream, &reply.to_bytes()).await
}
