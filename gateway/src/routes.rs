// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP wiring for the gateway.
//!
//! Wire contract: signed POST with `x-opsgate-timestamp`,
//! `x-opsgate-signature`, optional `x-opsgate-signature-version` headers and
//! a JSON body `{arguments, request_context}`; JSON response
//! `{ok, result | error, details?}`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::to_bytes;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tracing::warn;

use opsgate_core::domain::record::ErrorCode;

use crate::dispatch::{Dispatcher, InboundCall};
use crate::error::GatewayError;

pub const HEADER_TIMESTAMP: &str = "x-opsgate-timestamp";
pub const HEADER_SIGNATURE: &str = "x-opsgate-signature";
pub const HEADER_SIGNATURE_VERSION: &str = "x-opsgate-signature-version";

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub max_body_bytes: usize,
    pub body_read_timeout: Duration,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/tools/{name}", post(call_tool))
        .fallback(route_not_found)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn route_not_found() -> Response {
    error_response(&GatewayError::new(ErrorCode::RouteNotFound))
}

async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let timestamp = header_value(request.headers(), HEADER_TIMESTAMP);
    let signature = header_value(request.headers(), HEADER_SIGNATURE);
    let signature_version = header_value(request.headers(), HEADER_SIGNATURE_VERSION);

    // Drain the body under a byte cap and a read timeout. Both rejections
    // are terminal transitions and get an execution record like every
    // other outcome.
    let body = tokio::time::timeout(
        state.body_read_timeout,
        to_bytes(request.into_body(), state.max_body_bytes),
    )
    .await;
    let body = match body {
        Ok(Ok(bytes)) => bytes.to_vec(),
        Ok(Err(_)) => {
            state.dispatcher.record_rejected(
                &name,
                started,
                ErrorCode::RequestBodyTooLarge,
                "body exceeded the byte cap",
            );
            return error_response(&GatewayError::new(ErrorCode::RequestBodyTooLarge));
        }
        Err(_) => {
            warn!(tool = %name, "timed out reading request body");
            state.dispatcher.record_rejected(
                &name,
                started,
                ErrorCode::InternalError,
                "timed out reading request body",
            );
            return error_response(&GatewayError::new(ErrorCode::InternalError));
        }
    };

    let call = InboundCall {
        tool_name: name,
        method,
        path,
        timestamp,
        signature,
        signature_version,
        body,
    };
    match state.dispatcher.dispatch(call).await {
        Ok(result) => Json(json!({ "ok": true, "result": result })).into_response(),
        Err(err) => error_response(&err),
    }
}

fn header_value(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn error_response(err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({ "ok": false, "error": err.code });
    if let Some(details) = &err.details {
        body["details"] = json!(details);
    }
    (status, Json(body)).into_response()
}
