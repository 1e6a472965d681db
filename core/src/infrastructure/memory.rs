// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Scoped, append-only versioned memory store.
//!
//! Each scope owns a mutable head pointing at the highest-numbered of an
//! immutable chain of content versions. No version is ever rewritten:
//! updates append, and a rollback appends a new version carrying an older
//! version's content. The write path is "insert version, then advance
//! head" as a single logical unit; backends must make that atomic against
//! concurrent writers in other processes.

pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hard cap on stored content, checked before any write.
pub const MAX_CONTENT_CHARS: usize = 4000;
/// Callers may never page more than this many versions at once.
pub const MAX_LIST_LIMIT: usize = 25;
const DEFAULT_TOKEN_BUDGET: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Channel,
    User,
    Global,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Channel => "channel",
            ScopeType::User => "user",
            ScopeType::Global => "global",
        }
    }

    /// Deterministic content served before a scope has any versions.
    pub fn empty_template(&self) -> &'static str {
        match self {
            ScopeType::Channel => "## Channel notes\n(nothing recorded yet)",
            ScopeType::User => "## Operator notes\n(nothing recorded yet)",
            ScopeType::Global => "## Shared context\n(nothing recorded yet)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub scope_type: ScopeType,
    pub scope_id: String,
}

impl Scope {
    pub fn new(scope_type: ScopeType, scope_id: impl Into<String>) -> Self {
        Self {
            scope_type,
            scope_id: scope_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHead {
    pub current_version: u32,
    pub token_budget: u32,
    pub total_versions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryVersion {
    pub id: Uuid,
    pub version_no: u32,
    pub parent_version_id: Option<Uuid>,
    pub rollback_from_version_id: Option<Uuid>,
    pub content: String,
    pub content_chars: u32,
    pub change_summary: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Version metadata without content, for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub id: Uuid,
    pub version_no: u32,
    pub content_chars: u32,
    pub change_summary: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub is_rollback: bool,
}

impl From<&MemoryVersion> for VersionInfo {
    fn from(v: &MemoryVersion) -> Self {
        Self {
            id: v.id,
            version_no: v.version_no,
            content_chars: v.content_chars,
            change_summary: v.change_summary.clone(),
            created_by: v.created_by.clone(),
            created_at: v.created_at,
            is_rollback: v.rollback_from_version_id.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub content: String,
    pub version: u32,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("content is {0} chars, over the {MAX_CONTENT_CHARS} char cap")]
    ContentTooLarge(usize),
    #[error("invalid rollback target: {0}")]
    InvalidRollbackTarget(String),
    #[error("version {0} does not exist for this scope")]
    NoSuchVersion(u32),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Current content for a scope. A scope with no versions yields its
    /// scope-type template at version 0 rather than an error.
    async fn get(&self, scope: &Scope) -> Result<MemorySnapshot, MemoryError>;

    /// Append a new version and advance the head. Returns the new version
    /// number.
    async fn update(
        &self,
        scope: &Scope,
        content: String,
        change_summary: Option<String>,
        created_by: &str,
    ) -> Result<u32, MemoryError>;

    /// Append a new version whose content equals `target_version`'s
    /// (default: the version before the current one). History before the
    /// rollback is never altered. Returns the new version number.
    async fn rollback(
        &self,
        scope: &Scope,
        target_version: Option<u32>,
        created_by: &str,
    ) -> Result<u32, MemoryError>;

    /// Version metadata, newest first, capped at `limit` (≤ 25).
    async fn list_versions(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<VersionInfo>, MemoryError>;
}

/// Validates an update's content and resolves a rollback target against the
/// head. Shared between backends so the append-only rules cannot diverge.
pub(crate) fn resolve_rollback_target(
    current_version: u32,
    target: Option<u32>,
) -> Result<u32, MemoryError> {
    let target = match target {
        Some(t) => t,
        None => {
            if current_version == 0 {
                return Err(MemoryError::InvalidRollbackTarget(
                    "scope has no versions".to_string(),
                ));
            }
            current_version - 1
        }
    };
    if target == 0 {
        return Err(MemoryError::InvalidRollbackTarget(
            "target must be a positive version number".to_string(),
        ));
    }
    if target == current_version {
        return Err(MemoryError::InvalidRollbackTarget(
            "target equals the current version".to_string(),
        ));
    }
    if target > current_version {
        return Err(MemoryError::NoSuchVersion(target));
    }
    Ok(target)
}

pub(crate) fn check_content_cap(content: &str) -> Result<u32, MemoryError> {
    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(MemoryError::ContentTooLarge(chars));
    }
    Ok(chars as u32)
}

#[derive(Debug, Default)]
struct ScopeState {
    head: Option<MemoryHead>,
    versions: Vec<MemoryVersion>,
}

impl ScopeState {
    fn version(&self, version_no: u32) -> Option<&MemoryVersion> {
        self.versions.iter().find(|v| v.version_no == version_no)
    }

    fn append(
        &mut self,
        content: String,
        content_chars: u32,
        change_summary: Option<String>,
        rollback_from: Option<Uuid>,
        created_by: &str,
    ) -> u32 {
        let head = self.head.get_or_insert(MemoryHead {
            current_version: 0,
            token_budget: DEFAULT_TOKEN_BUDGET,
            total_versions: 0,
        });
        let parent_version_id = self
            .versions
            .iter()
            .find(|v| v.version_no == head.current_version)
            .map(|v| v.id);
        let new_version = head.current_version + 1;
        self.versions.push(MemoryVersion {
            id: Uuid::new_v4(),
            version_no: new_version,
            parent_version_id,
            rollback_from_version_id: rollback_from,
            content,
            content_chars,
            change_summary,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        });
        head.current_version = new_version;
        head.total_versions += 1;
        new_version
    }
}

/// In-process store. The map is confined to this owner and only reachable
/// through the trait API; the head advance and version insert happen under
/// one write guard.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    scopes: Arc<RwLock<HashMap<Scope, ScopeState>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn get(&self, scope: &Scope) -> Result<MemorySnapshot, MemoryError> {
        let scopes = self.scopes.read().await;
        let snapshot = scopes
            .get(scope)
            .and_then(|state| {
                let head = state.head.as_ref()?;
                if head.current_version == 0 {
                    return None;
                }
                let version = state.version(head.current_version)?;
                Some(MemorySnapshot {
                    content: version.content.clone(),
                    version: version.version_no,
                })
            })
            .unwrap_or_else(|| MemorySnapshot {
                content: scope.scope_type.empty_template().to_string(),
                version: 0,
            });
        Ok(snapshot)
    }

    async fn update(
        &self,
        scope: &Scope,
        content: String,
        change_summary: Option<String>,
        created_by: &str,
    ) -> Result<u32, MemoryError> {
        let content_chars = check_content_cap(&content)?;
        let mut scopes = self.scopes.write().await;
        let state = scopes.entry(scope.clone()).or_default();
        Ok(state.append(content, content_chars, change_summary, None, created_by))
    }

    async fn rollback(
        &self,
        scope: &Scope,
        target_version: Option<u32>,
        created_by: &str,
    ) -> Result<u32, MemoryError> {
        let mut scopes = self.scopes.write().await;
        // Resolve against the head before touching the map, so a failed
        // rollback never leaves an empty entry behind.
        let current = scopes
            .get(scope)
            .and_then(|state| state.head.as_ref())
            .map(|h| h.current_version)
            .unwrap_or(0);
        let target = resolve_rollback_target(current, target_version)?;
        let state = scopes
            .get_mut(scope)
            .ok_or(MemoryError::NoSuchVersion(target))?;
        let target_row = state
            .version(target)
            .ok_or(MemoryError::NoSuchVersion(target))?;
        let content = target_row.content.clone();
        let content_chars = target_row.content_chars;
        let rollback_from = Some(target_row.id);
        let summary = Some(format!("rollback to version {}", target));
        Ok(state.append(content, content_chars, summary, rollback_from, created_by))
    }

    async fn list_versions(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<VersionInfo>, MemoryError> {
        let limit = limit.min(MAX_LIST_LIMIT);
        let scopes = self.scopes.read().await;
        let mut infos: Vec<VersionInfo> = scopes
            .get(scope)
            .map(|state| state.versions.iter().map(VersionInfo::from).collect())
            .unwrap_or_default();
        infos.sort_by(|a, b| b.version_no.cmp(&a.version_no));
        infos.truncate(limit);
        Ok(infos)
    }
}
