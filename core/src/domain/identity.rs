// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

/// Who is behind an inbound event. Immutable once constructed; the role is
/// resolved separately (and cached) because it requires a directory
/// round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    pub team_id: String,
    pub channel_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl IdentityContext {
    pub fn new(team_id: impl Into<String>, channel_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            username: None,
        }
    }

    /// Cache key for role lookups: one role per user per team.
    pub fn role_cache_key(&self) -> String {
        format!("{}:{}", self.team_id, self.user_id)
    }
}
