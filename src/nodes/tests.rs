//! Operator-visible end-to-end scenarios over real sockets.
//!
//! Each test wires an in-process network on ephemeral 127.0.0.1 ports
//! and drives it the way an operator would: load, run, compute, pause.

use crate::network::client;
use crate::network::rpc::Request;
use crate::runtime::CancelToken;
use crate::test_utils::utils::{TestNet, spawn_network};
use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode, header};
use http_body_util::BodyExt;
use std::time::Duration;
use tokio::time::timeout;
use tower::ServiceExt;

async fn compute(net: &TestNet, value: i32) -> i32 {
    timeout(Duration::from_secs(5), net.master.compute(value))
        .await
        .expect("compute timed out")
        .expect("compute failed")
}

#[tokio::test]
async fn identity_program_roundtrips_values() {
    let net = spawn_network(1, 0).await;
    let p = net.program_addr(0);

    net.master
        .load_program("START: IN ACC\nOUT ACC\nJMP START", p)
        .await
        .unwrap();
    net.master.run_network().await.unwrap();

    assert_eq!(compute(&net, 42).await, 42);
    assert_eq!(compute(&net, -7).await, -7);

    net.master.pause_network().await.unwrap();
}

#[tokio::test]
async fn sign_classifier_routes_across_two_nodes() {
    let net = spawn_network(2, 0).await;
    let p1 = net.program_addr(0).to_string();
    let p2 = net.program_addr(1).to_string();

    // P1 routes positives to P2's R1 and negatives to R3.
    let route = format!(
        "START: IN ACC\n\
         JGZ POS\n\
         JLZ NEG\n\
         JMP START\n\
         POS: MOV ACC, {p2}:R1\n\
         JMP START\n\
         NEG: MOV ACC, {p2}:R3\n\
         JMP START"
    );
    // P2 forwards whatever arrives, first from R1, then from R3.
    let forward = "START: MOV R1, ACC\nOUT ACC\nMOV R3, ACC\nOUT ACC\nJMP START";

    net.master.load_program(&route, &p1).await.unwrap();
    net.master.load_program(forward, &p2).await.unwrap();
    net.master.run_network().await.unwrap();

    assert_eq!(compute(&net, 5).await, 5);
    assert_eq!(compute(&net, -3).await, -3);
}

#[tokio::test]
async fn stack_echo_pops_in_lifo_order() {
    let net = spawn_network(1, 1).await;
    let p = net.program_addr(0).to_string();
    let s = net.stack_addr(0).to_string();

    // Three inputs are pushed (and echoed so each compute completes),
    // then three more computes drain the stack in LIFO order.
    let program = format!(
        "START: IN ACC\nPUSH ACC, {s}\nOUT ACC\n\
         IN ACC\nPUSH ACC, {s}\nOUT ACC\n\
         IN ACC\nPUSH ACC, {s}\nOUT ACC\n\
         IN NIL\nPOP {s}, ACC\nOUT ACC\n\
         IN NIL\nPOP {s}, ACC\nOUT ACC\n\
         IN NIL\nPOP {s}, ACC\nOUT ACC\n\
         JMP START"
    );

    net.master.load_program(&program, &p).await.unwrap();
    net.master.run_network().await.unwrap();

    assert_eq!(compute(&net, 1).await, 1);
    assert_eq!(compute(&net, 2).await, 2);
    assert_eq!(compute(&net, 3).await, 3);

    assert_eq!(compute(&net, 0).await, 3);
    assert_eq!(compute(&net, 0).await, 2);
    assert_eq!(compute(&net, 0).await, 1);
}

#[tokio::test]
async fn reset_clears_filled_register() {
    let net = spawn_network(1, 0).await;
    let p = net.program_addr(0).to_string();
    let token = CancelToken::new();

    net.master
        .load_program("START: MOV R0, ACC\nOUT ACC\nJMP START", &p)
        .await
        .unwrap();

    // Fill R0 the way a peer would, then confirm the value flows out.
    client::call_ok(
        &p,
        &Request::Send {
            register: 0,
            value: 42,
        },
        &token,
    )
    .await
    .unwrap();
    net.master.run_network().await.unwrap();
    assert_eq!(compute(&net, 0).await, 42);

    // Fill R0 again while paused, then reset: no stale value survives,
    // so the node blocks on R0 and the compute times out.
    net.master.pause_network().await.unwrap();
    client::call_ok(
        &p,
        &Request::Send {
            register: 0,
            value: 43,
        },
        &token,
    )
    .await
    .unwrap();
    net.master.reset_network().await.unwrap();
    net.master.run_network().await.unwrap();

    let result = timeout(Duration::from_millis(500), net.master.compute(0)).await;
    assert!(result.is_err(), "stale register value survived reset");
}

#[tokio::test]
async fn unknown_load_target_has_no_side_effects() {
    let net = spawn_network(0, 1).await;
    let s = net.stack_addr(0).to_string();
    let token = CancelToken::new();

    client::call_ok(&s, &Request::Push { value: 5 }, &token)
        .await
        .unwrap();

    let response = post_form(
        &net,
        "/load",
        &[("program", "NOP"), ("targetURI", "ghost")],
    )
    .await;
    assert_eq!(response.0, StatusCode::BAD_REQUEST);
    assert!(
        response.1.contains("node ghost not valid on this network"),
        "unexpected diagnostic: {}",
        response.1
    );

    // The rejection happened before any broadcast: the stack kept its
    // value.
    let value = client::call_value(&s, &Request::Pop, &token).await.unwrap();
    assert_eq!(value, 5);
}

#[tokio::test]
async fn undeclared_label_fails_load_with_400() {
    let net = spawn_network(1, 0).await;
    let p = net.program_addr(0).to_string();

    let response = post_form(
        &net,
        "/load",
        &[("program", "JMP NOWHERE"), ("targetURI", p.as_str())],
    )
    .await;
    assert_eq!(response.0, StatusCode::BAD_REQUEST);
    assert!(
        response.1.contains("label 'NOWHERE' was not declared"),
        "unexpected diagnostic: {}",
        response.1
    );
}

#[tokio::test]
async fn duplicate_label_fails_load_with_400() {
    let net = spawn_network(1, 0).await;
    let p = net.program_addr(0).to_string();

    let response = post_form(
        &net,
        "/load",
        &[("program", "X: NOP\nX: NOP"), ("targetURI", p.as_str())],
    )
    .await;
    assert_eq!(response.0, StatusCode::BAD_REQUEST);
    assert!(
        response.1.contains("cannot repeat label 'X'"),
        "unexpected diagnostic: {}",
        response.1
    );
}

#[tokio::test]
async fn compute_rejected_over_http_while_stopped() {
    let net = spawn_network(0, 0).await;

    let response = post_form(&net, "/compute", &[("value", "1")]).await;
    assert_eq!(response.0, StatusCode::BAD_REQUEST);
    assert!(response.1.contains("network is not running"));
}

#[tokio::test]
async fn operator_surface_over_http() {
    let net = spawn_network(1, 0).await;
    let p = net.program_addr(0).to_string();

    let response = post_form(
        &net,
        "/load",
        &[
            ("program", "START: IN ACC\nOUT ACC\nJMP START"),
            ("targetURI", p.as_str()),
        ],
    )
    .await;
    assert_eq!(response, (StatusCode::OK, "Success".to_string()));

    let response = post_form(&net, "/run", &[]).await;
    assert_eq!(response, (StatusCode::OK, "Success".to_string()));

    let response = post_form(&net, "/compute", &[("value", "42")]).await;
    assert_eq!(response.0, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&response.1).expect("non-JSON reply");
    assert_eq!(body, serde_json::json!({ "value": 42 }));

    let response = post_form(&net, "/pause", &[]).await;
    assert_eq!(response, (StatusCode::OK, "Success".to_string()));

    // Lifecycle commands are idempotent: pausing twice still succeeds.
    let response = post_form(&net, "/pause", &[]).await;
    assert_eq!(response, (StatusCode::OK, "Success".to_string()));

    let response = post_form(&net, "/reset", &[]).await;
    assert_eq!(response, (StatusCode::OK, "Success".to_string()));
}

/// Posts a form to the operator router and returns (status, body).
async fn post_form(net: &TestNet, path: &str, fields: &[(&str, &str)]) -> (StatusCode, String) {
    let body = serde_urlencoded::to_string(fields).expect("form encoding failed");
    let request = HttpRequest::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .expect("request build failed");

    let response = net
        .master
        .router()
        .oneshot(request)
        .await
        .expect("router call failed");

    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body read failed")
        .to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}
