// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Opsgate agent: the caller-side execution controller.
//!
//! Converses with an automated planner, executes proposed tool calls
//! through the gateway in bounded rounds, asks a human before risky
//! actions, and carries context between rounds via the versioned memory
//! store.

pub mod chat;
pub mod confirm;
pub mod gateway_client;
pub mod orchestrator;
pub mod planner;
