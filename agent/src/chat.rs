// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Chat-surface contract. The concrete surface (message formatting, UI
//! elements) is an external collaborator; the loop only needs these three
//! operations.

use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Deliver text to the operator.
    async fn send(&self, text: &str) -> anyhow::Result<()>;

    /// Surface a confirm/cancel prompt for a pending confirmation id. The
    /// surface's affirmative and negative actions must come back through
    /// [`crate::confirm::ConfirmationBroker::resolve`] with this id.
    async fn prompt_choice(&self, id: Uuid, summary: &str) -> anyhow::Result<()>;

    /// Best-effort status label; failures are ignored.
    async fn set_status(&self, label: &str);
}

/// Surface that swallows everything. Used when no interactive channel is
/// attached and by tests.
pub struct NullChatSurface;

#[async_trait]
impl ChatSurface for NullChatSurface {
    async fn send(&self, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn prompt_choice(&self, _id: Uuid, _summary: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_status(&self, _label: &str) {}
}
