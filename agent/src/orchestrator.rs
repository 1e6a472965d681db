// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Bounded multi-round orchestration loop.
//!
//! Converses with the planner for at most [`MAX_ROUNDS`] turns per request.
//! Proposed tool calls are budgeted (globally and per tool), gated through
//! risk-tiered confirmation, executed concurrently through the gateway
//! transport, redacted, and attached back into the conversation in proposal
//! order. When the global budget runs out, the planner always gets exactly
//! one final tools-disabled turn to summarize.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use opsgate_core::domain::catalog::{RiskLevel, ToolCatalog, ToolDefinition};
use opsgate_core::domain::identity::IdentityContext;
use opsgate_core::domain::policy::has_confirmation_marker;
use opsgate_core::domain::record::fingerprint_args;
use opsgate_core::infrastructure::memory::{
    MemoryStore, Scope, ScopeType, MAX_CONTENT_CHARS,
};
use opsgate_core::infrastructure::rate_limit::FixedWindowLimiter;
use opsgate_core::infrastructure::role_cache::RoleCache;

use crate::chat::ChatSurface;
use crate::confirm::ConfirmationBroker;
use crate::gateway_client::{CallContext, ToolTransport};
use crate::planner::{ChatMessage, Planner, ProposedCall};

/// Hard cap on planner round-trips per request, the forced final turn
/// included.
pub const MAX_ROUNDS: u32 = 5;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Global tool-call budget per request. Also the per-tool default when
    /// a catalog entry sets no `max_calls_per_request`.
    pub max_tool_calls_per_request: u32,
    /// Whole-word marker in the request text that satisfies confirmation
    /// without an interactive round-trip.
    pub confirmation_marker: String,
    /// Whether an interactive confirmation channel is attached. Without
    /// one, unconfirmed risky calls are rejected outright.
    pub interactive: bool,
    pub user_rate_max: u32,
    pub channel_rate_max: u32,
    pub rate_window: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_calls_per_request: 8,
            confirmation_marker: "confirm".to_string(),
            interactive: false,
            user_rate_max: 10,
            channel_rate_max: 30,
            rate_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub text: String,
    pub team_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub session_id: Option<String>,
}

/// Audit view of one transported call.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedCall {
    pub tool_name: String,
    pub args_fingerprint: String,
    pub duration_ms: u64,
    pub ok: bool,
}

#[derive(Debug)]
pub struct RequestOutcome {
    pub reply: String,
    pub executed: Vec<ExecutedCall>,
    pub planner_turns: u32,
    pub planner_tokens: u32,
    pub duration_ms: u64,
}

/// Disposition of one proposed call after budgeting.
enum Planned {
    Execute(ProposedCall),
    /// Per-tool budget spent: gets an error result without a transport
    /// round-trip and without consuming the global budget.
    OverToolBudget(ProposedCall),
}

impl Planned {
    fn call(&self) -> &ProposedCall {
        match self {
            Planned::Execute(c) | Planned::OverToolBudget(c) => c,
        }
    }
}

struct CallResult {
    call_id: String,
    tool_name: String,
    content: String,
    executed: Option<ExecutedCall>,
}

pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    transport: Arc<dyn ToolTransport>,
    catalog: ToolCatalog,
    chat: Arc<dyn ChatSurface>,
    broker: Arc<ConfirmationBroker>,
    memory: Arc<dyn MemoryStore>,
    roles: Arc<RoleCache>,
    user_limiter: FixedWindowLimiter,
    channel_limiter: FixedWindowLimiter,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: Arc<dyn Planner>,
        transport: Arc<dyn ToolTransport>,
        catalog: ToolCatalog,
        chat: Arc<dyn ChatSurface>,
        broker: Arc<ConfirmationBroker>,
        memory: Arc<dyn MemoryStore>,
        roles: Arc<RoleCache>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            planner,
            transport,
            catalog,
            chat,
            broker,
            memory,
            roles,
            user_limiter: FixedWindowLimiter::new(config.user_rate_max, config.rate_window),
            channel_limiter: FixedWindowLimiter::new(config.channel_rate_max, config.rate_window),
            config,
        }
    }

    /// Drive one operator request to completion.
    pub async fn handle_request(&self, req: &IncomingRequest) -> anyhow::Result<RequestOutcome> {
        let started = Instant::now();

        // Both limiters must pass; the first to deny names the reason.
        if !self.user_limiter.consume(&req.user_id).allowed {
            return Ok(denied(started, "You are sending requests too quickly. Try again in a minute."));
        }
        if !self.channel_limiter.consume(&req.channel_id).allowed {
            return Ok(denied(started, "This channel has hit its request limit. Try again in a minute."));
        }

        let marker_confirmed =
            has_confirmation_marker(&req.text, &self.config.confirmation_marker);

        // Resolved once per request; the cache absorbs the directory
        // round-trip on subsequent events. A missing role still goes
        // through, so the gateway can report `missing_role` uniformly.
        let identity = IdentityContext::new(&req.team_id, &req.channel_id, &req.user_id);
        let role = match self.roles.role_for(&identity).await {
            Ok(role) => role,
            Err(e) => {
                warn!(error = %e, user = %req.user_id, "role resolution failed");
                None
            }
        };
        let ctx = CallContext {
            team_id: req.team_id.clone(),
            channel_id: req.channel_id.clone(),
            user_id: req.user_id.clone(),
            role,
            confirmed: false,
            session_id: req.session_id.clone(),
        };

        let mut history = vec![ChatMessage::User(self.opening_message(req).await)];
        let mut per_tool_counts: HashMap<String, u32> = HashMap::new();
        let mut global_remaining = self.config.max_tool_calls_per_request;
        let mut executed: Vec<ExecutedCall> = Vec::new();
        let mut planner_tokens = 0u32;
        let mut planner_turns = 0u32;
        let mut reply = String::new();

        for round in 1..=MAX_ROUNDS {
            // The last round and the budget-exhausted case run tools-disabled
            // so the planner can still summarize.
            let tools_enabled = round < MAX_ROUNDS && global_remaining > 0;
            self.chat.set_status("thinking").await;
            let turn = self
                .planner
                .complete(&history, tools_enabled)
                .await
                .context("planner turn failed")?;
            planner_turns += 1;
            planner_tokens += turn.tokens_used;

            if !tools_enabled || turn.calls.is_empty() {
                reply = turn.text;
                break;
            }

            let planned = self.budget_round(&turn.calls, &mut per_tool_counts, &mut global_remaining);
            history.push(ChatMessage::Assistant {
                text: turn.text,
                calls: planned.iter().map(|p| p.call().clone()).collect(),
            });

            self.chat.set_status("running tools").await;
            // Borrow once so each fan-out block captures the reference,
            // not the context itself.
            let ctx = &ctx;
            let results = join_all(planned.iter().map(|p| async move {
                match p {
                    Planned::OverToolBudget(call) => CallResult {
                        call_id: call.call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        content: json!({
                            "error": format!("call budget for '{}' is exhausted", call.tool_name)
                        })
                        .to_string(),
                        executed: None,
                    },
                    Planned::Execute(call) => self.execute_call(call, ctx, marker_confirmed).await,
                }
            }))
            .await;

            // join_all preserves input order, so attachment follows the
            // proposal order regardless of completion order.
            for result in results {
                if let Some(record) = &result.executed {
                    executed.push(record.clone());
                }
                history.push(ChatMessage::ToolResult {
                    call_id: result.call_id,
                    tool_name: result.tool_name,
                    content: result.content,
                });
            }
        }

        self.record_session_note(req, &executed).await;

        let outcome = RequestOutcome {
            reply,
            executed,
            planner_turns,
            planner_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            user = %req.user_id,
            turns = outcome.planner_turns,
            tokens = outcome.planner_tokens,
            calls = outcome.executed.len(),
            duration_ms = outcome.duration_ms,
            "request completed"
        );
        Ok(outcome)
    }

    /// First conversation entry: current channel notes (when any exist)
    /// followed by the operator's request.
    async fn opening_message(&self, req: &IncomingRequest) -> String {
        let scope = Scope::new(ScopeType::Channel, &req.channel_id);
        match self.memory.get(&scope).await {
            Ok(snapshot) if snapshot.version > 0 => {
                format!("{}\n\nRequest:\n{}", snapshot.content, req.text)
            }
            Ok(_) => req.text.clone(),
            Err(e) => {
                warn!(error = %e, "failed to load channel notes");
                req.text.clone()
            }
        }
    }

    /// Apply the per-tool counters and the global budget to a round's
    /// proposals, in proposal order. Calls past the global budget are
    /// dropped entirely; over-per-tool-budget calls survive as error
    /// results.
    fn budget_round(
        &self,
        calls: &[ProposedCall],
        per_tool_counts: &mut HashMap<String, u32>,
        global_remaining: &mut u32,
    ) -> Vec<Planned> {
        let mut planned = Vec::with_capacity(calls.len());
        for call in calls {
            let limit = self
                .catalog
                .get(&call.tool_name)
                .and_then(|t| t.max_calls_per_request)
                .unwrap_or(self.config.max_tool_calls_per_request);
            let count = per_tool_counts.entry(call.tool_name.clone()).or_insert(0);
            *count += 1;
            if *count > limit {
                planned.push(Planned::OverToolBudget(call.clone()));
                continue;
            }
            if *global_remaining == 0 {
                warn!(tool = %call.tool_name, "dropping call over the global budget");
                continue;
            }
            *global_remaining -= 1;
            planned.push(Planned::Execute(call.clone()));
        }
        planned
    }

    async fn execute_call(
        &self,
        call: &ProposedCall,
        ctx: &CallContext,
        marker_confirmed: bool,
    ) -> CallResult {
        let tool = self.catalog.get(&call.tool_name);
        let mut confirmed = marker_confirmed;

        // Risk-tiered confirmation gate, ahead of the gateway's own check.
        if let Some(tool) = tool {
            if tool.risk_level != RiskLevel::Low && !confirmed {
                if !self.config.interactive {
                    return self.settled(call, json!({ "error": "confirmation_required" }));
                }
                let summary = args_summary(&call.arguments);
                if self
                    .broker
                    .request(self.chat.as_ref(), &call.tool_name, &summary)
                    .await
                {
                    confirmed = true;
                } else {
                    return self.settled(
                        call,
                        json!({ "error": "cancelled by operator", "cancelled": true }),
                    );
                }
            }
        }

        let ctx = CallContext {
            confirmed,
            ..ctx.clone()
        };
        let call_started = Instant::now();
        let outcome = self.transport.call(&call.tool_name, &call.arguments, &ctx).await;
        let duration_ms = call_started.elapsed().as_millis() as u64;

        let (ok, content) = match outcome {
            Ok(result) => (true, redact(result, tool).to_string()),
            Err(e) => {
                let mut body = json!({ "error": e.code });
                if let Some(details) = e.details {
                    body["details"] = json!(details);
                }
                (false, body.to_string())
            }
        };
        CallResult {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            content,
            executed: Some(ExecutedCall {
                tool_name: call.tool_name.clone(),
                args_fingerprint: fingerprint_args(&call.arguments),
                duration_ms,
                ok,
            }),
        }
    }

    /// A result settled without reaching the transport.
    fn settled(&self, call: &ProposedCall, body: Value) -> CallResult {
        CallResult {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            content: body.to_string(),
            executed: None,
        }
    }

    /// Append a one-line note about this request to the channel scope.
    /// Failures stay in the log; they never affect the reply.
    async fn record_session_note(&self, req: &IncomingRequest, executed: &[ExecutedCall]) {
        let scope = Scope::new(ScopeType::Channel, &req.channel_id);
        let base = match self.memory.get(&scope).await {
            Ok(snapshot) if snapshot.version > 0 => snapshot.content,
            Ok(_) => "## Channel notes".to_string(),
            Err(e) => {
                warn!(error = %e, "skipping session note, notes unreadable");
                return;
            }
        };
        let tools = if executed.is_empty() {
            "no tools".to_string()
        } else {
            executed
                .iter()
                .map(|c| c.tool_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut content = format!("{}\n- {} [{}]", base, truncate(&req.text, 120), tools);
        let chars = content.chars().count();
        if chars > MAX_CONTENT_CHARS {
            content = content.chars().skip(chars - MAX_CONTENT_CHARS).collect();
        }
        if let Err(e) = self
            .memory
            .update(&scope, content, Some("session note".to_string()), &req.user_id)
            .await
        {
            warn!(error = %e, "failed to record session note");
        }
    }
}

fn denied(started: Instant, reason: &str) -> RequestOutcome {
    RequestOutcome {
        reply: reason.to_string(),
        executed: Vec::new(),
        planner_turns: 0,
        planner_tokens: 0,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Mask configured top-level result keys before the result re-enters the
/// planner conversation.
fn redact(mut result: Value, tool: Option<&ToolDefinition>) -> Value {
    let Some(tool) = tool else { return result };
    if let Some(map) = result.as_object_mut() {
        for key in &tool.redaction_rules {
            if let Some(slot) = map.get_mut(key) {
                *slot = Value::String("[redacted]".to_string());
            }
        }
    }
    result
}

/// Compact, non-empty human summary of a call's arguments for the
/// confirmation prompt.
fn args_summary(args: &Value) -> String {
    match args {
        Value::Object(map) if !map.is_empty() => truncate(&args.to_string(), 200),
        _ => String::new(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_chars).collect();
        format!("{}…", kept)
    }
}
