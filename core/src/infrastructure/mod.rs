// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod audit;
pub mod memory;
pub mod rate_limit;
pub mod role_cache;
pub mod signing;
