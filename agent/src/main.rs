// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use dialoguer::Confirm;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use opsgate_agent::chat::ChatSurface;
use opsgate_agent::confirm::{ConfirmationBroker, DEFAULT_CONFIRMATION_TIMEOUT};
use opsgate_agent::gateway_client::GatewayClient;
use opsgate_agent::orchestrator::{IncomingRequest, Orchestrator, OrchestratorConfig};
use opsgate_agent::planner::OpenAiPlanner;
use opsgate_core::domain::catalog::ToolCatalog;
use opsgate_core::infrastructure::memory::InMemoryMemoryStore;
use opsgate_core::infrastructure::role_cache::{RoleCache, StaticRoleResolver};

/// Agent configuration, from flags or environment.
#[derive(Debug, Parser)]
#[command(name = "opsgate-agent", about = "Opsgate planner-driven agent")]
struct AgentConfig {
    /// The operator request to handle.
    request: String,

    #[arg(long, env = "OPSGATE_GATEWAY_URL", default_value = "http://127.0.0.1:8787")]
    gateway_url: String,

    /// Shared secret for request signing. Must match the gateway's.
    #[arg(long, env = "OPSGATE_SIGNING_SECRET", hide_env_values = true)]
    signing_secret: String,

    #[arg(long, env = "OPSGATE_CATALOG", default_value = "config/tools.yaml")]
    catalog_path: PathBuf,

    #[arg(long, env = "OPSGATE_PLANNER_URL", default_value = "https://api.openai.com/v1/chat/completions")]
    planner_url: String,

    #[arg(long, env = "OPSGATE_PLANNER_API_KEY", hide_env_values = true)]
    planner_api_key: String,

    #[arg(long, env = "OPSGATE_PLANNER_MODEL", default_value = "gpt-4o-mini")]
    planner_model: String,

    /// Role to assign the local operator in place of a directory lookup.
    #[arg(long, env = "OPSGATE_ROLE")]
    role: Option<String>,

    #[arg(long, env = "OPSGATE_TEAM_ID", default_value = "local")]
    team_id: String,

    #[arg(long, env = "OPSGATE_CHANNEL_ID", default_value = "console")]
    channel_id: String,

    #[arg(long, env = "OPSGATE_USER_ID", default_value = "operator")]
    user_id: String,

    #[arg(long, env = "OPSGATE_MAX_TOOL_CALLS", default_value_t = 8)]
    max_tool_calls: u32,

    #[arg(long, env = "OPSGATE_CONFIRMATION_MARKER", default_value = "confirm")]
    confirmation_marker: String,

    /// Disable the interactive confirmation prompt; unconfirmed risky
    /// calls are then rejected outright.
    #[arg(long, env = "OPSGATE_NON_INTERACTIVE", default_value_t = false)]
    non_interactive: bool,
}

/// Console surface: text goes to stdout, confirmations become a blocking
/// yes/no prompt resolved back through the broker.
struct ConsoleSurface {
    broker: Arc<ConfirmationBroker>,
}

#[async_trait]
impl ChatSurface for ConsoleSurface {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        println!("{}", text);
        Ok(())
    }

    async fn prompt_choice(&self, id: Uuid, summary: &str) -> anyhow::Result<()> {
        let broker = self.broker.clone();
        let prompt = format!("Run {}?", summary);
        tokio::task::spawn_blocking(move || {
            let approved = Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .unwrap_or(false);
            tokio::runtime::Handle::current().block_on(broker.resolve(id, approved));
        });
        Ok(())
    }

    async fn set_status(&self, label: &str) {
        eprintln!("[{}]", label);
    }
}

const SYSTEM_PROMPT: &str = "You are an operations assistant. Use the available \
tools to fulfil the operator's request, then summarize what you did. Never \
invent tool results.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AgentConfig::parse();
    let catalog = ToolCatalog::load(&config.catalog_path)
        .with_context(|| format!("loading catalog from {}", config.catalog_path.display()))?;
    info!(tools = catalog.len(), gateway = %config.gateway_url, "agent starting");

    let planner = Arc::new(OpenAiPlanner::new(
        config.planner_url.clone(),
        config.planner_api_key.clone(),
        config.planner_model.clone(),
        SYSTEM_PROMPT.to_string(),
        &catalog,
    ));
    let transport = Arc::new(GatewayClient::new(
        config.gateway_url.clone(),
        config.signing_secret.clone().into_bytes(),
    ));
    let broker = Arc::new(ConfirmationBroker::new(DEFAULT_CONFIRMATION_TIMEOUT));
    let chat = Arc::new(ConsoleSurface { broker: broker.clone() });
    let resolver = StaticRoleResolver::new(
        config.role.iter().map(|role| (config.user_id.clone(), role.clone())),
    );
    let roles = Arc::new(RoleCache::new(Arc::new(resolver), Duration::from_secs(300)));

    let orchestrator = Orchestrator::new(
        planner,
        transport,
        catalog,
        chat.clone(),
        broker,
        Arc::new(InMemoryMemoryStore::new()),
        roles,
        OrchestratorConfig {
            max_tool_calls_per_request: config.max_tool_calls,
            confirmation_marker: config.confirmation_marker.clone(),
            interactive: !config.non_interactive,
            rate_window: Duration::from_secs(60),
            ..Default::default()
        },
    );

    let request = IncomingRequest {
        text: config.request.clone(),
        team_id: config.team_id.clone(),
        channel_id: config.channel_id.clone(),
        user_id: config.user_id.clone(),
        session_id: Some(Uuid::new_v4().to_string()),
    };
    let outcome = orchestrator.handle_request(&request).await?;
    chat.send(&outcome.reply).await?;
    info!(
        turns = outcome.planner_turns,
        tokens = outcome.planner_tokens,
        calls = outcome.executed.len(),
        duration_ms = outcome.duration_ms,
        "done"
    );
    Ok(())
}
