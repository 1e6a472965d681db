// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Request lifecycle: Received → Authenticated → Authorized → Validated →
//! Dispatched → {Succeeded, Failed}.
//!
//! This is the single choke point every tool call passes through.
//! Authentication strictly precedes authorization: a bad signature is
//! rejected before the tool name is even looked up. Each terminal
//! transition emits exactly one execution record to the audit sink; sink
//! delivery is fire-and-forget and never changes the caller-visible
//! outcome.

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use opsgate_core::domain::catalog::ToolCatalog;
use opsgate_core::domain::policy::PolicyEngine;
use opsgate_core::domain::record::{fingerprint_args, ErrorCode, ExecutionRecord};
use opsgate_core::infrastructure::audit::AuditSink;
use opsgate_core::infrastructure::signing::{unix_now, RequestSigner};

use crate::error::GatewayError;
use crate::handlers::{HandlerRegistry, RequestContext};

/// Signed wire body: `{arguments, request_context}`.
#[derive(Debug, Deserialize)]
struct ToolCallBody {
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    request_context: RequestContext,
}

/// Raw material of one inbound call, as extracted by the HTTP layer.
pub struct InboundCall {
    pub tool_name: String,
    pub method: String,
    pub path: String,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
    pub signature_version: Option<String>,
    pub body: Vec<u8>,
}

pub struct Dispatcher {
    catalog: ToolCatalog,
    policy: PolicyEngine,
    signer: RequestSigner,
    registry: HandlerRegistry,
    audit: Arc<dyn AuditSink>,
    mutating_enabled: bool,
}

impl Dispatcher {
    pub fn new(
        catalog: ToolCatalog,
        signer: RequestSigner,
        registry: HandlerRegistry,
        audit: Arc<dyn AuditSink>,
        mutating_enabled: bool,
    ) -> Self {
        Self {
            catalog,
            policy: PolicyEngine::new(),
            signer,
            registry,
            audit,
            mutating_enabled,
        }
    }

    pub async fn dispatch(&self, call: InboundCall) -> Result<Value, GatewayError> {
        let started = Instant::now();
        let result = self.run_pipeline(&call).await;
        self.record(&call, started, &result);
        result.map(|(value, _)| value)
    }

    /// The state machine proper. Returns the handler result plus the
    /// arguments (for fingerprinting) on success.
    async fn run_pipeline(
        &self,
        call: &InboundCall,
    ) -> Result<(Value, Value), GatewayError> {
        // Received → Authenticated. The body was already read under the
        // byte cap by the HTTP layer; parse, then verify the signature.
        let body: ToolCallBody = serde_json::from_slice(&call.body)
            .map_err(|e| GatewayError::with_internal(ErrorCode::InvalidJsonBody, e.to_string()))?;
        self.authenticate(call)?;

        // Authenticated → Authorized.
        let tool = self
            .catalog
            .get(&call.tool_name)
            .ok_or_else(|| GatewayError::new(ErrorCode::ToolNotFound))?;
        let role = match body.request_context.role.as_deref() {
            Some(role) if !role.is_empty() => role,
            _ => return Err(GatewayError::new(ErrorCode::MissingRole)),
        };
        let decision = self
            .policy
            .evaluate(Some(tool), role, self.mutating_enabled);
        if let opsgate_core::domain::policy::PolicyDecision::Deny(reason) = decision {
            return Err(GatewayError::with_internal(
                ErrorCode::ToolNotAllowedForRole,
                reason,
            ));
        }
        // Not a failure: a signal to the caller to re-enter through the
        // confirmation handshake.
        if self
            .policy
            .needs_confirmation(tool, body.request_context.confirmed)
        {
            return Err(GatewayError::new(ErrorCode::ConfirmationRequired));
        }

        // Authorized → Validated.
        let violations = tool.parameters_schema.validate(&body.arguments);
        if !violations.is_empty() {
            return Err(GatewayError::invalid_arguments(violations));
        }

        // Validated → Dispatched. The registry is closed at startup, so a
        // catalog entry without a handler is a deployment bug.
        let handler = self.registry.get(&call.tool_name).ok_or_else(|| {
            GatewayError::with_internal(
                ErrorCode::InternalError,
                format!("catalog tool '{}' has no handler", call.tool_name),
            )
        })?;
        match handler.execute(&body.arguments, &body.request_context).await {
            Ok(result) => Ok((result, body.arguments)),
            Err(e) => Err(GatewayError::with_internal(
                ErrorCode::InternalError,
                format!("{:#}", e),
            )),
        }
    }

    fn authenticate(&self, call: &InboundCall) -> Result<(), GatewayError> {
        let (Some(timestamp), Some(signature)) = (&call.timestamp, &call.signature) else {
            warn!(tool = %call.tool_name, "signature headers missing");
            return Err(GatewayError::new(ErrorCode::InvalidRequestSignature));
        };
        if let Err(reason) = self.signer.verify(
            timestamp,
            signature,
            call.signature_version.as_deref(),
            &call.method,
            &call.path,
            &call.body,
            unix_now(),
        ) {
            // Sub-reason stays internal so the endpoint is not an oracle.
            warn!(tool = %call.tool_name, %reason, "request signature rejected");
            return Err(GatewayError::new(ErrorCode::InvalidRequestSignature));
        }
        Ok(())
    }

    /// Record a call the HTTP layer rejected before a body (and so a
    /// role or arguments) was available. The byte-cap and read-timeout
    /// branches are terminal transitions too and must not skip the sink.
    pub fn record_rejected(
        &self,
        tool_name: &str,
        started: Instant,
        code: ErrorCode,
        detail: &str,
    ) {
        counter!("opsgate_gateway_requests_total", "outcome" => code.as_str()).increment(1);
        self.audit.write(ExecutionRecord {
            tool_name: tool_name.to_string(),
            role: None,
            duration_ms: started.elapsed().as_millis() as u64,
            ok: false,
            args_fingerprint: fingerprint_args(&Value::Null),
            error_code: Some(code),
            error_detail: Some(detail.to_string()),
            recorded_at: chrono::Utc::now(),
        });
    }

    fn record(
        &self,
        call: &InboundCall,
        started: Instant,
        result: &Result<(Value, Value), GatewayError>,
    ) {
        // Best-effort argument fingerprint even on failed parses.
        let args = match result {
            Ok((_, args)) => args.clone(),
            Err(_) => serde_json::from_slice::<ToolCallBody>(&call.body)
                .map(|b| b.arguments)
                .unwrap_or(Value::Null),
        };
        let role = serde_json::from_slice::<ToolCallBody>(&call.body)
            .ok()
            .and_then(|b| b.request_context.role);
        let (ok, error_code, error_detail) = match result {
            Ok(_) => (true, None, None),
            Err(e) => (false, Some(e.code), e.internal.clone()),
        };
        let outcome = error_code.map(|c| c.as_str()).unwrap_or("ok");
        counter!("opsgate_gateway_requests_total", "outcome" => outcome).increment(1);

        self.audit.write(ExecutionRecord {
            tool_name: call.tool_name.clone(),
            role,
            duration_ms: started.elapsed().as_millis() as u64,
            ok,
            args_fingerprint: fingerprint_args(&args),
            error_code,
            error_detail,
            recorded_at: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opsgate_core::domain::catalog::ToolDefinition;
    use opsgate_core::infrastructure::audit::InMemoryAuditSink;
    use serde_json::json;

    use crate::handlers::ToolHandler;

    const SECRET: &[u8] = b"dispatch-test-secret";

    struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn execute(&self, _args: &Value, _ctx: &RequestContext) -> anyhow::Result<Value> {
            anyhow::bail!("connection refused: db:5432")
        }
    }

    fn catalog() -> ToolCatalog {
        let defs: Vec<ToolDefinition> = serde_yaml::from_str(
            r#"
- tool_name: customer.lookup
  description: Look up a customer
  risk_level: low
  allowed_roles: [support]
  parameters_schema:
    type: object
    required: [customer_id]
    properties:
      customer_id: { type: string }
    additionalProperties: false
- tool_name: flaky.tool
  description: Always fails
  risk_level: low
  allowed_roles: [support]
"#,
        )
        .unwrap();
        ToolCatalog::from_definitions(defs).unwrap()
    }

    fn dispatcher(audit: Arc<InMemoryAuditSink>) -> Dispatcher {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "customer.lookup",
            crate::handlers::StaticHandler::new(json!({ "name": "Demo" })),
        );
        registry.register("flaky.tool", Arc::new(FailingHandler));
        Dispatcher::new(
            catalog(),
            RequestSigner::new(SECRET),
            registry,
            audit,
            false,
        )
    }

    fn signed_call(tool: &str, body: Value) -> InboundCall {
        let body = serde_json::to_vec(&body).unwrap();
        let path = format!("/tools/{}", tool);
        let ts = unix_now();
        let signature = RequestSigner::new(SECRET).sign(ts, "POST", &path, &body);
        InboundCall {
            tool_name: tool.to_string(),
            method: "POST".to_string(),
            path,
            timestamp: Some(ts.to_string()),
            signature: Some(signature),
            signature_version: Some("v1".to_string()),
            body,
        }
    }

    #[tokio::test]
    async fn happy_path_returns_handler_result_and_records_ok() {
        let audit = InMemoryAuditSink::new();
        let d = dispatcher(audit.clone());
        let call = signed_call(
            "customer.lookup",
            json!({
                "arguments": { "customer_id": "C-1" },
                "request_context": { "role": "support" }
            }),
        );
        let result = d.dispatch(call).await.unwrap();
        assert_eq!(result, json!({ "name": "Demo" }));

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].ok);
        assert_eq!(records[0].role.as_deref(), Some("support"));
        // Fingerprint, never raw arguments.
        assert!(!serde_json::to_string(&records[0]).unwrap().contains("C-1"));
    }

    #[tokio::test]
    async fn unsigned_call_rejected_before_tool_lookup() {
        let audit = InMemoryAuditSink::new();
        let d = dispatcher(audit.clone());
        let mut call = signed_call("no.such.tool", json!({ "request_context": { "role": "support" } }));
        call.signature = None;
        let err = d.dispatch(call).await.unwrap_err();
        // Authentication precedes authorization: not ToolNotFound.
        assert_eq!(err.code, ErrorCode::InvalidRequestSignature);
    }

    #[tokio::test]
    async fn handler_failure_is_generic_outward_detailed_in_audit() {
        let audit = InMemoryAuditSink::new();
        let d = dispatcher(audit.clone());
        let call = signed_call(
            "flaky.tool",
            json!({ "arguments": {}, "request_context": { "role": "support" } }),
        );
        let err = d.dispatch(call).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(err.details.is_none());

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert!(records[0]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn schema_violations_are_fully_detailed() {
        let audit = InMemoryAuditSink::new();
        let d = dispatcher(audit);
        let call = signed_call(
            "customer.lookup",
            json!({
                "arguments": { "extra": true },
                "request_context": { "role": "support" }
            }),
        );
        let err = d.dispatch(call).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArguments);
        assert_eq!(
            err.details.unwrap(),
            vec!["customer_id is required", "extra is not allowed"]
        );
    }

    #[tokio::test]
    async fn empty_role_is_missing_role() {
        let audit = InMemoryAuditSink::new();
        let d = dispatcher(audit);
        let call = signed_call(
            "customer.lookup",
            json!({ "arguments": { "customer_id": "C-1" }, "request_context": { "role": "" } }),
        );
        let err = d.dispatch(call).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRole);
    }
}
