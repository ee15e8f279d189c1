//! Master node: external operator surface and I/O gateway.
//!
//! The master knows the full node directory, fans lifecycle commands out
//! to every node in parallel, and brokers external input/output through
//! a pair of capacity-1 mailboxes. The operator surface is HTTP; the
//! network-side mouth and ear (`GetInput`/`SendOutput`) are regular node
//! RPCs served to program nodes.

use crate::network::client;
use crate::network::rpc::{Reply, Request};
use crate::network::server::{self, NodeService};
use crate::nodes::Directory;
use crate::nodes::errors::NodeError;
use crate::runtime::{CancelToken, Mailbox};
use crate::types::wrapper_types::BoxFuture;
use crate::utils::log::Logger;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;

/// The control plane and I/O gateway of a network.
pub struct MasterNode {
    directory: Directory,
    /// External values awaiting an `IN` somewhere in the network.
    input: Mailbox,
    /// Values produced by an `OUT`, awaiting the pending compute.
    output: Mailbox,
    running: AtomicBool,
    token: Mutex<CancelToken>,
    log: Logger,
}

/// Body of a `POST /load` request.
#[derive(Debug, Deserialize)]
struct LoadForm {
    program: String,
    #[serde(rename = "targetURI")]
    target_uri: String,
}

/// Body of a `POST /compute` request.
#[derive(Debug, Deserialize)]
struct ComputeForm {
    value: i32,
}

/// Reply to a successful compute.
#[derive(Debug, Serialize)]
struct ComputeResponse {
    value: i32,
}

impl MasterNode {
    /// Creates a stopped master over an immutable directory.
    pub fn new(directory: Directory) -> Arc<Self> {
        Arc::new(Self {
            directory,
            input: Mailbox::new(),
            output: Mailbox::new(),
            running: AtomicBool::new(false),
            token: Mutex::new(CancelToken::new()),
            log: Logger::new("master"),
        })
    }

    /// Starts serving `GetInput`/`SendOutput` RPCs on `listener`.
    pub fn start(self: &Arc<Self>, listener: TcpListener) {
        let service: Arc<dyn NodeService> = self.clone();
        tokio::spawn(server::serve(listener, service, self.log.clone()));
    }

    /// The operator HTTP surface.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/run", post(run_handler))
            .route("/pause", post(pause_handler))
            .route("/reset", post(reset_handler))
            .route("/load", post(load_handler))
            .route("/compute", post(compute_handler))
            .with_state(self.clone())
    }

    /// Serves the operator surface until the listener fails.
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        let router = self.router();
        axum::serve(listener, router).await
    }

    /// Marks the master running and broadcasts Run to every node.
    pub async fn run_network(&self) -> Result<(), NodeError> {
        if !self.running.swap(true, Ordering::SeqCst) {
            *self.lock_token() = CancelToken::new();
            self.log.info("network was run");
        }
        self.broadcast(Request::Run).await
    }

    /// Broadcasts Pause, then stops the master's own phase.
    pub async fn pause_network(&self) -> Result<(), NodeError> {
        self.broadcast(Request::Pause).await?;
        if self.is_running() {
            self.stop();
            self.log.info("network was paused");
        }
        Ok(())
    }

    /// Broadcasts Reset, stops the master and re-creates its I/O
    /// mailboxes.
    pub async fn reset_network(&self) -> Result<(), NodeError> {
        self.broadcast(Request::Reset).await?;
        if self.is_running() {
            self.stop();
        }
        self.reset_io();
        self.log.info("network was reset");
        Ok(())
    }

    /// Loads a program onto `target` after driving the whole network to
    /// a clean slate: broadcast Reset, stop the master, clear its I/O
    /// mailboxes, then issue the per-target Load.
    pub async fn load_program(&self, source: &str, target: &str) -> Result<(), NodeError> {
        if !self.directory.contains_key(target) {
            return Err(NodeError::UnknownNode(target.to_string()));
        }

        self.broadcast(Request::Reset).await?;
        if self.is_running() {
            self.stop();
        }
        self.reset_io();

        let token = self.current_token();
        client::call_ok(
            target,
            &Request::Load {
                program: source.to_string(),
            },
            &token,
        )
        .await?;

        self.log.info("successfully loaded program");
        Ok(())
    }

    /// Feeds one value into the network and awaits the value it emits.
    ///
    /// Valid only while running. The capacity-1 I/O mailboxes throttle
    /// the operator to one in-flight computation at a time.
    pub async fn compute(&self, value: i32) -> Result<i32, NodeError> {
        if !self.is_running() {
            return Err(NodeError::NotRunning);
        }

        let token = self.current_token();
        self.input.put(value, &token).await?;
        let output = self.output.take(&token).await?;
        self.log.info("value outputted");
        Ok(output)
    }

    /// Hands the next external input to a program node's `IN`; blocks
    /// until one is available or the master's token fires.
    pub async fn get_input(&self) -> Result<i32, NodeError> {
        let token = self.current_token();
        let value = self.input.take(&token).await?;
        self.log.info("sent input value");
        Ok(value)
    }

    /// Accepts an output value from a program node's `OUT`; blocks while
    /// the previous output has not been collected.
    pub async fn send_output(&self, value: i32) -> Result<(), NodeError> {
        let token = self.current_token();
        self.output.put(value, &token).await?;
        self.log.info("received output value");
        Ok(())
    }

    /// Forwards `request` to every node in the directory in parallel.
    ///
    /// Succeeds only when all per-node calls succeed; the first failure
    /// is surfaced and the remaining outcomes are discarded. Order is
    /// unspecified.
    async fn broadcast(&self, request: Request) -> Result<(), NodeError> {
        let token = self.current_token();
        let calls = self.directory.keys().map(|addr| {
            let request = request.clone();
            let token = token.clone();
            let addr = addr.clone();
            async move {
                client::call_ok(&addr, &request, &token)
                    .await
                    .map_err(|e| (addr, e))
            }
        });

        for result in join_all(calls).await {
            if let Err((addr, e)) = result {
                self.log.warn(&format!("broadcast to {addr} failed: {e}"));
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the master's run phase: fires the current token (aborting
    /// pending computes and node-side I/O waits) and installs a fresh
    /// one.
    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut token = self.lock_token();
        token.fire();
        *token = CancelToken::new();
    }

    fn reset_io(&self) {
        self.input.reset();
        self.output.reset();
    }

    fn current_token(&self) -> CancelToken {
        self.lock_token().clone()
    }

    fn lock_token(&self) -> MutexGuard<'_, CancelToken> {
        self.token.lock().expect("token lock poisoned")
    }
}

impl NodeService for MasterNode {
    fn handle(self: Arc<Self>, request: Request) -> BoxFuture<'static, Reply> {
        Box::pin(async move {
            match request {
                Request::GetInput => match self.get_input().await {
                    Ok(value) => Reply::Value { value },
                    Err(e) => Reply::Err {
                        message: e.to_string(),
                    },
                },
                Request::SendOutput { value } => match self.send_output(value).await {
                    Ok(()) => Reply::Ok,
                    Err(e) => Reply::Err {
                        message: e.to_string(),
                    },
                },
                _ => Reply::Err {
                    message: "operation not supported by the master node".to_string(),
                },
            }
        })
    }
}

async fn run_handler(State(master): State<Arc<MasterNode>>) -> Response {
    match master.run_network().await {
        Ok(()) => (StatusCode::OK, "Success").into_response(),
        Err(e) => {
            master.log.warn(&format!("error running network: {e}"));
            (
                StatusCode::BAD_REQUEST,
                format!("error running network: {e}"),
            )
                .into_response()
        }
    }
}

async fn pause_handler(State(master): State<Arc<MasterNode>>) -> Response {
    match master.pause_network().await {
        Ok(()) => (StatusCode::OK, "Success").into_response(),
        Err(e) => {
            master.log.warn(&format!("error pausing network: {e}"));
            (
                StatusCode::BAD_REQUEST,
                format!("error pausing network: {e}"),
            )
                .into_response()
        }
    }
}

async fn reset_handler(State(master): State<Arc<MasterNode>>) -> Response {
    match master.reset_network().await {
        Ok(()) => (StatusCode::OK, "Success").into_response(),
        Err(e) => {
            master.log.warn(&format!("error resetting network: {e}"));
            (
                StatusCode::BAD_REQUEST,
                format!("error resetting network: {e}"),
            )
                .into_response()
        }
    }
}

async fn load_handler(
    State(master): State<Arc<MasterNode>>,
    Form(form): Form<LoadForm>,
) -> Response {
    match master.load_program(&form.program, &form.target_uri).await {
        Ok(()) => (StatusCode::OK, "Success").into_response(),
        Err(e) => {
            let message = format!("error loading program on node {}: {e}", form.target_uri);
            master.log.warn(&message);
            (StatusCode::BAD_REQUEST, message).into_response()
        }
    }
}

async fn compute_handler(
    State(master): State<Arc<MasterNode>>,
    Form(form): Form<ComputeForm>,
) -> Response {
    match master.compute(form.value).await {
        Ok(value) => (StatusCode::OK, Json(ComputeResponse { value })).into_response(),
        Err(e) => {
            master.log.warn(&format!("compute failed: {e}"));
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}
