// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Tool handler registry.
//!
//! The set of handlers is closed at startup: every catalog entry must map
//! to a registered handler, and unknown names are rejected at the boundary
//! instead of failing deep in the call chain. Handlers are external
//! collaborators (SQL queries, third-party APIs); the demo handlers here
//! return canned shapes so the boundary can be exercised end to end.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use opsgate_core::domain::catalog::ToolCatalog;

/// Caller context forwarded to a handler alongside the validated arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Uniform tool execution contract. Handler failures are caught by the
/// dispatcher and reduced to a generic error toward the caller.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, args: &Value, ctx: &RequestContext) -> anyhow::Result<Value>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool_name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(tool_name.into(), handler);
    }

    pub fn get(&self, tool_name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(tool_name)
    }

    /// Startup check: every catalog tool must have a handler.
    pub fn verify_covers(&self, catalog: &ToolCatalog) -> anyhow::Result<()> {
        for tool in catalog.iter() {
            if !self.handlers.contains_key(&tool.tool_name) {
                anyhow::bail!("no handler registered for catalog tool '{}'", tool.tool_name);
            }
        }
        Ok(())
    }
}

/// Demo handler returning a fixed result shape. Stands in for the real
/// parameterized lookups, which live in downstream deployments.
pub struct StaticHandler {
    result: Value,
}

impl StaticHandler {
    pub fn new(result: Value) -> Arc<Self> {
        Arc::new(Self { result })
    }
}

#[async_trait]
impl ToolHandler for StaticHandler {
    async fn execute(&self, _args: &Value, _ctx: &RequestContext) -> anyhow::Result<Value> {
        Ok(self.result.clone())
    }
}

/// Built-in demo registry matching `config/tools.yaml`.
pub fn demo_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(
        "customer.lookup",
        StaticHandler::new(json!({
            "customer_id": "demo",
            "name": "Demo Customer",
            "status": "active"
        })),
    );
    registry.register(
        "orders.search",
        StaticHandler::new(json!({ "orders": [], "total": 0 })),
    );
    registry.register(
        "billing.refund",
        StaticHandler::new(json!({ "refund_id": "demo", "state": "queued" })),
    );
    registry
}
