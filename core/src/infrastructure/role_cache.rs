// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Cached identity → role resolution.
//!
//! Role lookups hit an external directory, so they are resolved once per
//! identity and cached with a TTL; the cache exists specifically so the
//! request path does not suspend on the directory for every event. Entries
//! are swept periodically by the owner task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::domain::identity::IdentityContext;

/// External directory lookup. `None` means the identity has no operator
/// role and must be denied.
#[async_trait]
pub trait RoleResolver: Send + Sync {
    async fn resolve(&self, identity: &IdentityContext) -> anyhow::Result<Option<String>>;
}

struct CachedRole {
    role: Option<String>,
    expires_at: Instant,
}

pub struct RoleCache {
    resolver: Arc<dyn RoleResolver>,
    entries: DashMap<String, CachedRole>,
    ttl: Duration,
}

impl RoleCache {
    pub fn new(resolver: Arc<dyn RoleResolver>, ttl: Duration) -> Self {
        Self {
            resolver,
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Resolve the role for an identity, serving from cache while the
    /// entry is fresh. Resolver failures are not cached.
    pub async fn role_for(&self, identity: &IdentityContext) -> anyhow::Result<Option<String>> {
        let key = identity.role_cache_key();
        if let Some(entry) = self.entries.get(&key) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.role.clone());
            }
        }
        let role = self.resolver.resolve(identity).await?;
        debug!(user_id = %identity.user_id, role = ?role, "role resolved from directory");
        self.entries.insert(
            key,
            CachedRole {
                role: role.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(role)
    }

    /// Drop expired entries. Called from the owner's periodic sweep task.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Resolver backed by a fixed user → role table. Stands in for the
/// directory in single-tenant deployments and tests.
#[derive(Debug, Default)]
pub struct StaticRoleResolver {
    roles: std::collections::HashMap<String, String>,
}

impl StaticRoleResolver {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            roles: pairs.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RoleResolver for StaticRoleResolver {
    async fn resolve(&self, identity: &IdentityContext) -> anyhow::Result<Option<String>> {
        Ok(self.roles.get(&identity.user_id).cloned())
    }
}
