// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Signed-request protocol.
//!
//! Canonical payload: `"{timestamp}\n{METHOD}\n{path}\n{body}"`, signed with
//! HMAC-SHA256 under the shared secret and hex-encoded. Verification bounds
//! the signature age and compares in constant time. Every failure collapses
//! to a single generic outcome toward the caller; the sub-reason is only
//! logged, so the endpoint cannot be used as an oracle.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_VERSION: &str = "v1";
pub const DEFAULT_MAX_AGE_SECS: i64 = 300;
const SIGNATURE_HEX_LEN: usize = 64;

/// Internal verification failure. Never serialized to the caller; the
/// gateway reduces all variants to `invalid_request_signature`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing or not {SIGNATURE_HEX_LEN} hex chars")]
    MalformedSignature,
    #[error("unsupported signature version: {0}")]
    UnsupportedVersion(String),
    #[error("timestamp is not an integer: {0}")]
    MalformedTimestamp(String),
    #[error("timestamp outside the allowed window (skew {0}s)")]
    Expired(i64),
    #[error("signature mismatch")]
    Mismatch,
}

/// Signs and verifies canonical request payloads under a shared secret.
pub struct RequestSigner {
    secret: Vec<u8>,
    max_age_secs: i64,
}

impl RequestSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }

    pub fn with_max_age(mut self, max_age_secs: i64) -> Self {
        self.max_age_secs = max_age_secs;
        self
    }

    pub fn canonical_payload(timestamp: i64, method: &str, path: &str, body: &[u8]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(body.len() + path.len() + 32);
        payload.extend_from_slice(timestamp.to_string().as_bytes());
        payload.push(b'\n');
        payload.extend_from_slice(method.to_uppercase().as_bytes());
        payload.push(b'\n');
        payload.extend_from_slice(path.as_bytes());
        payload.push(b'\n');
        payload.extend_from_slice(body);
        payload
    }

    /// Compute the hex signature for a request.
    pub fn sign(&self, timestamp: i64, method: &str, path: &str, body: &[u8]) -> String {
        let payload = Self::canonical_payload(timestamp, method, path, body);
        // new_from_slice only fails on a zero-length block, which HMAC
        // accepts for any key; unreachable for SHA-256.
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(&payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a signed request. `version` is the optional version header;
    /// when present it must equal `"v1"`.
    pub fn verify(
        &self,
        timestamp_header: &str,
        signature_hex: &str,
        version: Option<&str>,
        method: &str,
        path: &str,
        body: &[u8],
        now_secs: i64,
    ) -> Result<(), SignatureError> {
        if signature_hex.len() != SIGNATURE_HEX_LEN
            || !signature_hex.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(SignatureError::MalformedSignature);
        }
        if let Some(v) = version {
            if v != SIGNATURE_VERSION {
                return Err(SignatureError::UnsupportedVersion(v.to_string()));
            }
        }
        let timestamp: i64 = timestamp_header
            .trim()
            .parse()
            .map_err(|_| SignatureError::MalformedTimestamp(timestamp_header.to_string()))?;
        let skew = (now_secs - timestamp).abs();
        if skew > self.max_age_secs {
            return Err(SignatureError::Expired(skew));
        }
        let expected = self.sign(timestamp, method, path, body);
        // Length already checked; ct_eq covers the content without leaking
        // the position of the first differing byte.
        if expected.as_bytes().ct_eq(signature_hex.as_bytes()).into() {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
