// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! In-process HTTP tests for the gateway wire contract.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use opsgate_core::domain::catalog::ToolCatalog;
use opsgate_core::domain::record::ErrorCode;
use opsgate_core::infrastructure::audit::InMemoryAuditSink;
use opsgate_core::infrastructure::signing::{unix_now, RequestSigner};

use opsgate_gateway::dispatch::Dispatcher;
use opsgate_gateway::handlers::{demo_registry, HandlerRegistry, StaticHandler};
use opsgate_gateway::routes::{
    app, AppState, HEADER_SIGNATURE, HEADER_SIGNATURE_VERSION, HEADER_TIMESTAMP,
};

const SECRET: &[u8] = b"http-test-secret";

const CATALOG_YAML: &str = r#"
- tool_name: customer.lookup
  description: Look up a customer record by id
  risk_level: low
  allowed_roles: [support, admin]
  parameters_schema:
    type: object
    required: [customer_id]
    properties:
      customer_id: { type: string }
    additionalProperties: false
- tool_name: billing.refund
  description: Issue a refund
  risk_level: high
  allowed_roles: [admin]
  requires_confirmation: true
"#;

fn registry() -> HandlerRegistry {
    let mut registry = demo_registry();
    registry.register("customer.lookup", StaticHandler::new(json!({ "name": "Demo" })));
    registry
}

fn test_app(mutating_enabled: bool, max_body_bytes: usize) -> axum::Router {
    test_app_with_audit(mutating_enabled, max_body_bytes, InMemoryAuditSink::new())
}

fn test_app_with_audit(
    mutating_enabled: bool,
    max_body_bytes: usize,
    audit: Arc<InMemoryAuditSink>,
) -> axum::Router {
    let catalog = ToolCatalog::from_yaml(CATALOG_YAML).unwrap();
    let dispatcher = Dispatcher::new(
        catalog,
        RequestSigner::new(SECRET),
        registry(),
        audit,
        mutating_enabled,
    );
    app(Arc::new(AppState {
        dispatcher,
        max_body_bytes,
        body_read_timeout: Duration::from_secs(5),
    }))
}

fn signed_request(tool: &str, body: &Value) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let path = format!("/tools/{}", tool);
    let ts = unix_now();
    let signature = RequestSigner::new(SECRET).sign(ts, "POST", &path, &bytes);
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header(HEADER_TIMESTAMP, ts.to_string())
        .header(HEADER_SIGNATURE, signature)
        .header(HEADER_SIGNATURE_VERSION, "v1")
        .body(Body::from(bytes))
        .unwrap()
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    (status, body)
}

#[tokio::test]
async fn successful_call_returns_result_envelope() {
    let body = json!({
        "arguments": { "customer_id": "C-42" },
        "request_context": { "role": "support" }
    });
    let (status, envelope) = send(test_app(false, 64 * 1024), signed_request("customer.lookup", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["ok"], json!(true));
    assert_eq!(envelope["result"]["name"], json!("Demo"));
}

#[tokio::test]
async fn tampered_body_yields_401_generic_error() {
    let body = json!({
        "arguments": { "customer_id": "C-42" },
        "request_context": { "role": "support" }
    });
    let mut request = signed_request("customer.lookup", &body);
    *request.body_mut() = Body::from(r#"{"arguments":{"customer_id":"C-43"},"request_context":{"role":"support"}}"#);
    let (status, envelope) = send(test_app(false, 64 * 1024), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(envelope["error"], json!("invalid_request_signature"));
    // No sub-reason leaks.
    assert!(envelope.get("details").is_none());
}

#[tokio::test]
async fn expired_timestamp_rejected() {
    let body = json!({
        "arguments": { "customer_id": "C-42" },
        "request_context": { "role": "support" }
    });
    let bytes = serde_json::to_vec(&body).unwrap();
    let ts = unix_now() - 600;
    let signature = RequestSigner::new(SECRET).sign(ts, "POST", "/tools/customer.lookup", &bytes);
    let request = Request::builder()
        .method("POST")
        .uri("/tools/customer.lookup")
        .header(HEADER_TIMESTAMP, ts.to_string())
        .header(HEADER_SIGNATURE, signature)
        .body(Body::from(bytes))
        .unwrap();
    let (status, envelope) = send(test_app(false, 64 * 1024), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(envelope["error"], json!("invalid_request_signature"));
}

#[tokio::test]
async fn unknown_tool_is_404() {
    let body = json!({ "request_context": { "role": "support" } });
    let (status, envelope) = send(test_app(false, 64 * 1024), signed_request("no.such.tool", &body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(envelope["error"], json!("tool_not_found"));
}

#[tokio::test]
async fn missing_role_is_400() {
    let body = json!({ "arguments": { "customer_id": "C-1" } });
    let (status, envelope) = send(test_app(false, 64 * 1024), signed_request("customer.lookup", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["error"], json!("missing_role"));
}

#[tokio::test]
async fn disallowed_role_is_403() {
    let body = json!({
        "arguments": { "order_id": "O-1", "amount": 10.0 },
        "request_context": { "role": "support", "confirmed": true }
    });
    let (status, envelope) = send(test_app(true, 64 * 1024), signed_request("billing.refund", &body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(envelope["error"], json!("tool_not_allowed_for_role"));
}

#[tokio::test]
async fn high_risk_blocked_without_mutating_flag() {
    let body = json!({
        "arguments": { "order_id": "O-1", "amount": 10.0 },
        "request_context": { "role": "admin", "confirmed": true }
    });
    let (status, envelope) = send(test_app(false, 64 * 1024), signed_request("billing.refund", &body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(envelope["error"], json!("tool_not_allowed_for_role"));
}

#[tokio::test]
async fn unconfirmed_risky_call_is_409() {
    let body = json!({
        "arguments": { "order_id": "O-1", "amount": 10.0 },
        "request_context": { "role": "admin", "confirmed": false }
    });
    let (status, envelope) = send(test_app(true, 64 * 1024), signed_request("billing.refund", &body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(envelope["error"], json!("confirmation_required"));
}

#[tokio::test]
async fn invalid_arguments_carry_the_error_list() {
    let body = json!({
        "arguments": { "extra": 1 },
        "request_context": { "role": "support" }
    });
    let (status, envelope) = send(test_app(false, 64 * 1024), signed_request("customer.lookup", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["error"], json!("invalid_arguments"));
    assert_eq!(
        envelope["details"],
        json!(["customer_id is required", "extra is not allowed"])
    );
}

#[tokio::test]
async fn malformed_json_body_is_400() {
    let bytes = b"{not json".to_vec();
    let ts = unix_now();
    let signature = RequestSigner::new(SECRET).sign(ts, "POST", "/tools/customer.lookup", &bytes);
    let request = Request::builder()
        .method("POST")
        .uri("/tools/customer.lookup")
        .header(HEADER_TIMESTAMP, ts.to_string())
        .header(HEADER_SIGNATURE, signature)
        .body(Body::from(bytes))
        .unwrap();
    let (status, envelope) = send(test_app(false, 64 * 1024), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["error"], json!("invalid_json_body"));
}

#[tokio::test]
async fn oversized_body_is_413() {
    let body = json!({
        "arguments": { "customer_id": "x".repeat(4096) },
        "request_context": { "role": "support" }
    });
    let (status, envelope) = send(test_app(false, 256), signed_request("customer.lookup", &body)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(envelope["error"], json!("request_body_too_large"));
}

#[tokio::test]
async fn oversized_body_still_emits_one_execution_record() {
    let audit = InMemoryAuditSink::new();
    let body = json!({
        "arguments": { "customer_id": "x".repeat(4096) },
        "request_context": { "role": "support" }
    });
    let (status, _) = send(
        test_app_with_audit(false, 256, audit.clone()),
        signed_request("customer.lookup", &body),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].ok);
    assert_eq!(records[0].tool_name, "customer.lookup");
    assert_eq!(records[0].error_code, Some(ErrorCode::RequestBodyTooLarge));
    // The body never parsed, so no role was available.
    assert!(records[0].role.is_none());
}

#[tokio::test]
async fn unknown_route_is_route_not_found() {
    let request = Request::builder()
        .method("GET")
        .uri("/nope")
        .body(Body::empty())
        .unwrap();
    let (status, envelope) = send(test_app(false, 64 * 1024), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(envelope["error"], json!("route_not_found"));
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let request = Request::builder()
        .method("GET")
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    let (status, envelope) = send(test_app(false, 64 * 1024), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["ok"], json!(true));
}
