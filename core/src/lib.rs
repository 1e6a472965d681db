// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Opsgate core: domain types and trust-boundary primitives shared by the
//! gateway and the agent.
//!
//! # Architecture
//!
//! - **`domain`** — tool catalog, policy engine, schema validator,
//!   identity context, execution records.
//! - **`infrastructure`** — request signing, fixed-window rate limiting,
//!   role caching, the versioned memory store, and the audit sink contract.

pub mod domain;
pub mod infrastructure;

pub use domain::*;
