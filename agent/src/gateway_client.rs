// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Signed HTTP transport to the gateway.
//!
//! Every call is a `POST /tools/{name}` with the canonical-payload HMAC in
//! `x-opsgate-*` headers and a `{arguments, request_context}` body. The
//! transport decodes the gateway envelope and hands errors back as the
//! wire code plus any caller-visible details.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use opsgate_core::infrastructure::signing::{unix_now, RequestSigner, SIGNATURE_VERSION};

pub const HEADER_TIMESTAMP: &str = "x-opsgate-timestamp";
pub const HEADER_SIGNATURE: &str = "x-opsgate-signature";
pub const HEADER_SIGNATURE_VERSION: &str = "x-opsgate-signature-version";

/// Caller identity and flags forwarded inside the request body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallContext {
    pub team_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub role: Option<String>,
    pub confirmed: bool,
    pub session_id: Option<String>,
}

/// Gateway-reported failure, as delivered on the wire.
#[derive(Debug, Clone, thiserror::Error)]
#[error("gateway error: {code}")]
pub struct TransportError {
    pub code: String,
    pub details: Option<Vec<String>>,
}

impl TransportError {
    fn local(code: &str, detail: String) -> Self {
        Self {
            code: code.to_string(),
            details: Some(vec![detail]),
        }
    }
}

#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call(
        &self,
        tool_name: &str,
        arguments: &Value,
        ctx: &CallContext,
    ) -> Result<Value, TransportError>;
}

pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    signer: RequestSigner,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, signing_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer: RequestSigner::new(signing_secret),
        }
    }
}

#[async_trait]
impl ToolTransport for GatewayClient {
    async fn call(
        &self,
        tool_name: &str,
        arguments: &Value,
        ctx: &CallContext,
    ) -> Result<Value, TransportError> {
        let path = format!("/tools/{}", tool_name);
        let body = serde_json::to_vec(&json!({
            "arguments": arguments,
            "request_context": ctx,
        }))
        .map_err(|e| TransportError::local("encode_error", e.to_string()))?;

        let timestamp = unix_now();
        let signature = self.signer.sign(timestamp, "POST", &path, &body);
        debug!(tool = %tool_name, %timestamp, "calling gateway");

        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("content-type", "application/json")
            .header(HEADER_TIMESTAMP, timestamp.to_string())
            .header(HEADER_SIGNATURE, signature)
            .header(HEADER_SIGNATURE_VERSION, SIGNATURE_VERSION)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::local("transport_error", e.to_string()))?;

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| TransportError::local("malformed_response", e.to_string()))?;

        if envelope["ok"].as_bool().unwrap_or(false) {
            Ok(envelope["result"].clone())
        } else {
            Err(TransportError {
                code: envelope["error"]
                    .as_str()
                    .unwrap_or("malformed_response")
                    .to_string(),
                details: envelope["details"].as_array().map(|items| {
                    items
                        .iter()
                        .filter_map(|d| d.as_str().map(|s| s.to_string()))
                        .collect()
                }),
            })
        }
    }
}
