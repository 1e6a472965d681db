// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Opsgate gateway: the HTTP-facing trust boundary.
//!
//! Every tool call authenticates (signed request), authorizes (role/risk
//! policy), validates (argument schema), and only then reaches a handler.
//! One execution record is emitted per terminal outcome.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod routes;
