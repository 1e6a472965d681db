// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod catalog;
pub mod identity;
pub mod policy;
pub mod record;
pub mod schema;

pub use catalog::{RiskLevel, ToolCatalog, ToolDefinition};
pub use identity::IdentityContext;
pub use policy::PolicyEngine;
pub use record::{ErrorCode, ExecutionRecord};
pub use schema::Schema;
