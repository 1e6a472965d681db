// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Role/risk authorization policy.
//!
//! All access is denied by default: a tool must exist in the catalog and
//! explicitly list the caller's role. High-risk tools are additionally
//! gated behind a global mutating-tools flag, and the confirmation
//! requirement is evaluated independently of the risk tier.

use crate::domain::catalog::{RiskLevel, ToolDefinition};

/// Outcome of a policy evaluation, with the denial reason kept for the
/// audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

pub struct PolicyEngine;

impl PolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `role` may invoke `tool`.
    ///
    /// Denies when the tool is absent, the role is not listed, or the tool
    /// is high-risk while mutating tools are globally disabled.
    pub fn is_allowed(
        &self,
        tool: Option<&ToolDefinition>,
        role: &str,
        mutating_enabled: bool,
    ) -> bool {
        self.evaluate(tool, role, mutating_enabled).is_allowed()
    }

    pub fn evaluate(
        &self,
        tool: Option<&ToolDefinition>,
        role: &str,
        mutating_enabled: bool,
    ) -> PolicyDecision {
        let Some(tool) = tool else {
            return PolicyDecision::Deny("tool is not in the catalog".to_string());
        };
        if !tool.allowed_roles.contains(role) {
            return PolicyDecision::Deny(format!(
                "role '{}' is not allowed to call '{}'",
                role, tool.tool_name
            ));
        }
        if tool.risk_level == RiskLevel::High && !mutating_enabled {
            return PolicyDecision::Deny(format!(
                "'{}' is high risk and mutating tools are disabled",
                tool.tool_name
            ));
        }
        PolicyDecision::Allow
    }

    /// Whether a confirmation round-trip is still required for this call.
    pub fn needs_confirmation(&self, tool: &ToolDefinition, already_confirmed: bool) -> bool {
        tool.requires_confirmation && !already_confirmed
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-interactive confirmation convention: a case-insensitive whole-word
/// marker anywhere in the originating request text satisfies the
/// confirmation requirement without an interactive round-trip.
pub fn has_confirmation_marker(text: &str, marker: &str) -> bool {
    let marker = marker.to_lowercase();
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == marker)
}
