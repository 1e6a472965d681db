// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Planner contract and the OpenAI-compatible adapter.
//!
//! The planner is an untrusted collaborator: it proposes tool calls, and
//! everything it proposes goes through the gateway's checks. The adapter
//! is an anti-corruption layer over the chat-completions wire format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use opsgate_core::domain::catalog::ToolCatalog;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// One planner round-trip: free text plus zero or more proposed calls.
#[derive(Debug, Clone)]
pub struct PlannerTurn {
    pub text: String,
    pub calls: Vec<ProposedCall>,
    pub tokens_used: u32,
}

/// Conversation entries as the loop tracks them.
#[derive(Debug, Clone)]
pub enum ChatMessage {
    User(String),
    Assistant {
        text: String,
        calls: Vec<ProposedCall>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("planner network error: {0}")]
    Network(String),
    #[error("planner authentication failed: {0}")]
    Authentication(String),
    #[error("planner protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// One planner turn over the running conversation. With
    /// `tools_enabled == false` the planner must not propose calls; this
    /// drives the forced final summary turn.
    async fn complete(
        &self,
        history: &[ChatMessage],
        tools_enabled: bool,
    ) -> Result<PlannerTurn, PlannerError>;
}

pub struct OpenAiPlanner {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
    wire_tools: Vec<Value>,
}

impl OpenAiPlanner {
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        system_prompt: String,
        catalog: &ToolCatalog,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
            system_prompt,
            wire_tools: wire_tools(catalog),
        }
    }

    fn wire_request(&self, history: &[ChatMessage], tools_enabled: bool) -> Value {
        let mut request = json!({
            "model": self.model,
            "messages": self.wire_messages(history),
        });
        if !self.wire_tools.is_empty() {
            // `tool_choice` is only valid alongside a `tools` array, so
            // the array is sent either way and "none" pins the forced
            // summary turn.
            request["tools"] = json!(self.wire_tools);
            if !tools_enabled {
                request["tool_choice"] = json!("none");
            }
        }
        request
    }

    fn wire_messages(&self, history: &[ChatMessage]) -> Vec<Value> {
        let mut messages = vec![json!({ "role": "system", "content": self.system_prompt })];
        for message in history {
            match message {
                ChatMessage::User(text) => {
                    messages.push(json!({ "role": "user", "content": text }));
                }
                ChatMessage::Assistant { text, calls } => {
                    let tool_calls: Vec<Value> = calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.call_id,
                                "type": "function",
                                "function": {
                                    "name": c.tool_name,
                                    "arguments": c.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    let mut m = json!({ "role": "assistant", "content": text });
                    if !tool_calls.is_empty() {
                        m["tool_calls"] = json!(tool_calls);
                    }
                    messages.push(m);
                }
                ChatMessage::ToolResult {
                    call_id, content, ..
                } => {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": call_id,
                        "content": content,
                    }));
                }
            }
        }
        messages
    }
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    total_tokens: u32,
}

#[async_trait]
impl Planner for OpenAiPlanner {
    async fn complete(
        &self,
        history: &[ChatMessage],
        tools_enabled: bool,
    ) -> Result<PlannerTurn, PlannerError> {
        let request = self.wire_request(history, tools_enabled);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PlannerError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 401 || status.as_u16() == 403 {
                PlannerError::Authentication(detail)
            } else {
                PlannerError::Protocol(format!("HTTP {}: {}", status, detail))
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| PlannerError::Protocol(format!("failed to parse response: {}", e)))?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PlannerError::Protocol("response had no choices".to_string()))?;

        let calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::Object(Default::default()));
                ProposedCall {
                    call_id: tc.id,
                    tool_name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(PlannerTurn {
            text: choice.message.content.unwrap_or_default(),
            calls,
            tokens_used: wire.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }
}

/// Catalog entries in the planner's function-tool format.
fn wire_tools(catalog: &ToolCatalog) -> Vec<Value> {
    let mut tools: Vec<Value> = catalog
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.tool_name,
                    "description": tool.description,
                    "parameters": tool.parameters_schema,
                }
            })
        })
        .collect();
    tools.sort_by_key(|s| s["function"]["name"].as_str().unwrap_or_default().to_string());
    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsgate_core::domain::catalog::ToolCatalog;

    #[test]
    fn wire_tools_come_from_the_catalog() {
        let catalog = ToolCatalog::from_yaml(
            r#"
- tool_name: b.tool
  description: second
  risk_level: low
- tool_name: a.tool
  description: first
  risk_level: low
"#,
        )
        .unwrap();
        let tools = wire_tools(&catalog);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["function"]["name"], "a.tool");
        assert_eq!(tools[1]["function"]["name"], "b.tool");
    }

    #[test]
    fn disabled_tools_keep_the_tools_array_with_choice_none() {
        let catalog = ToolCatalog::from_yaml(
            r#"
- tool_name: a.tool
  description: first
  risk_level: low
"#,
        )
        .unwrap();
        let planner = OpenAiPlanner::new(
            "http://localhost/v1/chat/completions".to_string(),
            "key".to_string(),
            "model".to_string(),
            "system".to_string(),
            &catalog,
        );
        let history = vec![ChatMessage::User("hi".to_string())];

        // tool_choice without tools is rejected by the chat-completions
        // API, so the forced summary turn sends both.
        let disabled = planner.wire_request(&history, false);
        assert!(disabled["tools"].is_array());
        assert_eq!(disabled["tool_choice"], "none");

        let enabled = planner.wire_request(&history, true);
        assert!(enabled["tools"].is_array());
        assert!(enabled.get("tool_choice").is_none());

        // Empty catalog: neither key goes on the wire.
        let bare = OpenAiPlanner::new(
            "http://localhost/v1/chat/completions".to_string(),
            "key".to_string(),
            "model".to_string(),
            "system".to_string(),
            &ToolCatalog::default(),
        );
        let request = bare.wire_request(&history, false);
        assert!(request.get("tools").is_none());
        assert!(request.get("tool_choice").is_none());
    }

    #[test]
    fn wire_messages_carry_tool_results() {
        let planner = OpenAiPlanner::new(
            "http://localhost/v1/chat/completions".to_string(),
            "key".to_string(),
            "model".to_string(),
            "system".to_string(),
            &ToolCatalog::default(),
        );
        let history = vec![
            ChatMessage::User("look up C-1".to_string()),
            ChatMessage::Assistant {
                text: String::new(),
                calls: vec![ProposedCall {
                    call_id: "call_1".to_string(),
                    tool_name: "customer.lookup".to_string(),
                    arguments: serde_json::json!({ "customer_id": "C-1" }),
                }],
            },
            ChatMessage::ToolResult {
                call_id: "call_1".to_string(),
                tool_name: "customer.lookup".to_string(),
                content: r#"{"name":"Demo"}"#.to_string(),
            },
        ];
        let wire = planner.wire_messages(&history);
        assert_eq!(wire.len(), 4); // system + the three above
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], "customer.lookup");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
    }
}
