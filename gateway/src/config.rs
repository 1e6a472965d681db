// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Gateway configuration, from flags or environment.
#[derive(Debug, Parser)]
#[command(name = "opsgated", about = "Opsgate tool gateway")]
pub struct GatewayConfig {
    #[arg(long, env = "OPSGATE_BIND", default_value = "127.0.0.1:8787")]
    pub bind: SocketAddr,

    /// Shared secret for request signing. Required.
    #[arg(long, env = "OPSGATE_SIGNING_SECRET", hide_env_values = true)]
    pub signing_secret: String,

    #[arg(long, env = "OPSGATE_CATALOG", default_value = "config/tools.yaml")]
    pub catalog_path: PathBuf,

    /// Global gate for high-risk (mutating) tools.
    #[arg(long, env = "OPSGATE_MUTATING_ENABLED", default_value_t = false)]
    pub mutating_enabled: bool,

    #[arg(long, env = "OPSGATE_MAX_BODY_BYTES", default_value_t = 64 * 1024)]
    pub max_body_bytes: usize,

    #[arg(long, env = "OPSGATE_MAX_SIGNATURE_AGE_SECS", default_value_t = 300)]
    pub max_signature_age_secs: i64,

    #[arg(long, env = "OPSGATE_BODY_READ_TIMEOUT_SECS", default_value_t = 10)]
    pub body_read_timeout_secs: u64,
}
