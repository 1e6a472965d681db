// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Static tool catalog.
//!
//! The catalog is loaded once at startup from a YAML file and is immutable
//! for the life of the process. Every sensitive backend operation the
//! planner may request is declared here with its risk tier, permitted
//! roles, argument schema, and redaction rules.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::schema::Schema;

/// Declared sensitivity of a tool. Drives both the confirmation gate and
/// the global mutating-tools gate; the two checks stay independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One entry of the static tool catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub tool_name: String,
    pub description: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub allowed_roles: BTreeSet<String>,
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Per-request call budget for this tool. When unset, the caller's
    /// global per-request budget applies.
    #[serde(default)]
    pub max_calls_per_request: Option<u32>,
    #[serde(default)]
    pub parameters_schema: Schema,
    /// Top-level result keys masked before the result re-enters the
    /// planner conversation.
    #[serde(default)]
    pub redaction_rules: BTreeSet<String>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate tool name in catalog: {0}")]
    DuplicateToolName(String),
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Immutable, name-keyed tool catalog with O(1) lookup.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolCatalog {
    /// Build a catalog from a list of definitions, rejecting duplicates.
    pub fn from_definitions(defs: Vec<ToolDefinition>) -> Result<Self, CatalogError> {
        let mut tools = HashMap::with_capacity(defs.len());
        for def in defs {
            if tools.contains_key(&def.tool_name) {
                return Err(CatalogError::DuplicateToolName(def.tool_name));
            }
            tools.insert(def.tool_name.clone(), def);
        }
        Ok(Self { tools })
    }

    /// Load the catalog from a YAML file (a top-level list of tools).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, CatalogError> {
        let defs: Vec<ToolDefinition> = serde_yaml::from_str(raw)?;
        Self::from_definitions(defs)
    }

    pub fn get(&self, tool_name: &str) -> Option<&ToolDefinition> {
        self.tools.get(tool_name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            tool_name: name.to_string(),
            description: "test tool".to_string(),
            risk_level: RiskLevel::Low,
            allowed_roles: BTreeSet::from(["support".to_string()]),
            requires_confirmation: false,
            max_calls_per_request: None,
            parameters_schema: Schema::default(),
            redaction_rules: BTreeSet::new(),
        }
    }

    #[test]
    fn lookup_by_name() {
        let catalog =
            ToolCatalog::from_definitions(vec![def("customer.lookup"), def("orders.search")])
                .unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("customer.lookup").is_some());
        assert!(catalog.get("nonexistent").is_none());
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = ToolCatalog::from_definitions(vec![def("a"), def("a")]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateToolName(name) if name == "a"));
    }

    #[test]
    fn parses_yaml_catalog() {
        let raw = r#"
- tool_name: customer.lookup
  description: Look up a customer record
  risk_level: low
  allowed_roles: [support, admin]
  parameters_schema:
    type: object
    required: [customer_id]
    properties:
      customer_id:
        type: string
- tool_name: billing.refund
  description: Issue a refund
  risk_level: high
  allowed_roles: [admin]
  requires_confirmation: true
  max_calls_per_request: 1
  redaction_rules: [card_number]
"#;
        let catalog = ToolCatalog::from_yaml(raw).unwrap();
        let refund = catalog.get("billing.refund").unwrap();
        assert_eq!(refund.risk_level, RiskLevel::High);
        assert!(refund.requires_confirmation);
        assert_eq!(refund.max_calls_per_request, Some(1));
        assert!(refund.redaction_rules.contains("card_number"));
        let lookup = catalog.get("customer.lookup").unwrap();
        assert_eq!(lookup.risk_level, RiskLevel::Low);
        assert!(!lookup.requires_confirmation);
    }
}
