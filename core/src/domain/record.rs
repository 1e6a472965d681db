// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Execution records and the wire error-code enumeration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Every error code the gateway can put on the wire. The serialized form is
/// the wire contract; HTTP status mapping lives next to it so the two can
/// never drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ConfirmationRequired,
    ToolNotAllowedForRole,
    InvalidArguments,
    ToolNotFound,
    MissingRole,
    InvalidRequestSignature,
    RequestBodyTooLarge,
    InvalidJsonBody,
    InternalError,
    RouteNotFound,
    Unauthorized,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfirmationRequired => "confirmation_required",
            ErrorCode::ToolNotAllowedForRole => "tool_not_allowed_for_role",
            ErrorCode::InvalidArguments => "invalid_arguments",
            ErrorCode::ToolNotFound => "tool_not_found",
            ErrorCode::MissingRole => "missing_role",
            ErrorCode::InvalidRequestSignature => "invalid_request_signature",
            ErrorCode::RequestBodyTooLarge => "request_body_too_large",
            ErrorCode::InvalidJsonBody => "invalid_json_body",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::RouteNotFound => "route_not_found",
            ErrorCode::Unauthorized => "unauthorized",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ConfirmationRequired => 409,
            ErrorCode::ToolNotAllowedForRole => 403,
            ErrorCode::InvalidArguments | ErrorCode::MissingRole | ErrorCode::InvalidJsonBody => {
                400
            }
            ErrorCode::ToolNotFound | ErrorCode::RouteNotFound => 404,
            ErrorCode::InvalidRequestSignature | ErrorCode::Unauthorized => 401,
            ErrorCode::RequestBodyTooLarge => 413,
            ErrorCode::InternalError => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured record per terminal request transition, delivered to the
/// audit sink. Arguments never appear raw; only their key fingerprint does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub duration_ms: u64,
    pub ok: bool,
    pub args_fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Full failure detail. Stays inside the audit trail; callers only ever
    /// see the generic error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Fingerprint of an arguments object: SHA-256 over the sorted top-level
/// keys, hex, truncated to 16 chars. Values never leave the process.
pub fn fingerprint_args(args: &Value) -> String {
    let mut keys: Vec<&str> = args
        .as_object()
        .map(|m| m.keys().map(String::as_str).collect())
        .unwrap_or_default();
    keys.sort_unstable();
    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
