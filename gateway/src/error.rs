// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

use opsgate_core::domain::record::ErrorCode;

/// A terminal request failure. `details` is caller-visible (only ever used
/// for schema violations, which describe the caller's own input);
/// `internal` goes to the audit trail and the log, never to the caller.
#[derive(Debug)]
pub struct GatewayError {
    pub code: ErrorCode,
    pub details: Option<Vec<String>>,
    pub internal: Option<String>,
}

impl GatewayError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            details: None,
            internal: None,
        }
    }

    pub fn with_internal(code: ErrorCode, internal: impl Into<String>) -> Self {
        Self {
            code,
            details: None,
            internal: Some(internal.into()),
        }
    }

    pub fn invalid_arguments(errors: Vec<String>) -> Self {
        Self {
            code: ErrorCode::InvalidArguments,
            details: Some(errors),
            internal: None,
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code.as_str())
    }
}

impl std::error::Error for GatewayError {}
