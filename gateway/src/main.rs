// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use opsgate_core::domain::catalog::ToolCatalog;
use opsgate_core::infrastructure::audit::TracingAuditSink;
use opsgate_core::infrastructure::signing::RequestSigner;

use opsgate_gateway::config::GatewayConfig;
use opsgate_gateway::dispatch::Dispatcher;
use opsgate_gateway::handlers::demo_registry;
use opsgate_gateway::routes::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = GatewayConfig::parse();
    let catalog = ToolCatalog::load(&config.catalog_path)
        .with_context(|| format!("loading catalog from {}", config.catalog_path.display()))?;
    info!(tools = catalog.len(), mutating_enabled = config.mutating_enabled, "catalog loaded");

    let registry = demo_registry();
    registry.verify_covers(&catalog)?;

    let signer =
        RequestSigner::new(config.signing_secret.into_bytes()).with_max_age(config.max_signature_age_secs);
    let dispatcher = Dispatcher::new(
        catalog,
        signer,
        registry,
        Arc::new(TracingAuditSink),
        config.mutating_enabled,
    );
    let state = Arc::new(AppState {
        dispatcher,
        max_body_bytes: config.max_body_bytes,
        body_read_timeout: Duration::from_secs(config.body_read_timeout_secs),
    });

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(bind = %config.bind, "opsgate gateway listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
