// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Declarative argument schemas and the recursive validator.
//!
//! Violations are accumulated rather than short-circuited, and each message
//! is qualified with the path of the offending value. The exact message
//! strings are part of the gateway wire contract (they are returned to the
//! caller under `invalid_arguments`), so they are pinned by tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A recursive argument schema. An absent or unrecognized `type` imposes no
/// constraints, so handler authors can leave parts of a payload open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    /// `false` closes the object: undeclared keys are rejected.
    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,
    #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl Schema {
    /// Validate `value` and return every violation as a path-qualified,
    /// human-readable message. Empty result means valid.
    pub fn validate(&self, value: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        self.check(value, "", &mut errors);
        errors
    }

    fn check(&self, value: &Value, path: &str, errors: &mut Vec<String>) {
        match self.schema_type.as_deref() {
            Some("object") => self.check_object(value, path, errors),
            Some("string") => self.check_string(value, path, errors),
            Some("number") => self.check_number(value, path, errors, false),
            Some("integer") => self.check_number(value, path, errors, true),
            Some("boolean") => {
                if !value.is_boolean() {
                    errors.push(format!("{} must be a boolean", label(path)));
                }
            }
            // Unknown or absent type: pass-through.
            _ => {}
        }
    }

    fn check_object(&self, value: &Value, path: &str, errors: &mut Vec<String>) {
        let Some(map) = value.as_object() else {
            errors.push(format!("{} must be an object", label(path)));
            return;
        };
        for field in &self.required {
            if !map.contains_key(field) {
                errors.push(format!("{} is required", join(path, field)));
            }
        }
        if self.additional_properties == Some(false) {
            for key in map.keys() {
                if !self.properties.contains_key(key) {
                    errors.push(format!("{} is not allowed", join(path, key)));
                }
            }
        }
        for (key, child_schema) in &self.properties {
            if let Some(child) = map.get(key) {
                child_schema.check(child, &join(path, key), errors);
            }
        }
    }

    fn check_string(&self, value: &Value, path: &str, errors: &mut Vec<String>) {
        let Some(s) = value.as_str() else {
            errors.push(format!("{} must be a string", label(path)));
            return;
        };
        let chars = s.chars().count();
        if let Some(min) = self.min_length {
            if chars < min {
                errors.push(format!("{} must be at least {} characters", label(path), min));
            }
        }
        if let Some(max) = self.max_length {
            if chars > max {
                errors.push(format!("{} must be at most {} characters", label(path), max));
            }
        }
        if let Some(allowed) = &self.enum_values {
            if !allowed.iter().any(|v| v == s) {
                errors.push(format!(
                    "{} must be one of: {}",
                    label(path),
                    allowed.join(", ")
                ));
            }
        }
    }

    fn check_number(&self, value: &Value, path: &str, errors: &mut Vec<String>, integer: bool) {
        let n = match value.as_f64() {
            Some(n) if n.is_finite() => n,
            _ => {
                let kind = if integer { "an integer" } else { "a number" };
                errors.push(format!("{} must be {}", label(path), kind));
                return;
            }
        };
        if integer && n.fract() != 0.0 {
            errors.push(format!("{} must be an integer", label(path)));
            return;
        }
        if let Some(min) = self.minimum {
            if n < min {
                errors.push(format!("{} must be at least {}", label(path), min));
            }
        }
        if let Some(max) = self.maximum {
            if n > max {
                errors.push(format!("{} must be at most {}", label(path), max));
            }
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn label(path: &str) -> &str {
    if path.is_empty() {
        "arguments"
    } else {
        path
    }
}
