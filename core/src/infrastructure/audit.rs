// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Audit sink contract.
//!
//! Sinks are strictly fire-and-forget: the trust boundary never awaits,
//! retries, or surfaces a sink failure. A delivery problem must not change
//! the caller-visible outcome of a request.

use std::sync::Arc;

use parking_lot::Mutex;
use sqlx::postgres::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::record::ExecutionRecord;

pub trait AuditSink: Send + Sync {
    fn write(&self, record: ExecutionRecord);
}

/// Default sink: one structured `info!` event per execution record, picked
/// up by whatever tracing subscriber the deployment configures.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, record: ExecutionRecord) {
        info!(
            tool = %record.tool_name,
            role = ?record.role,
            ok = record.ok,
            duration_ms = record.duration_ms,
            args_fingerprint = %record.args_fingerprint,
            error_code = ?record.error_code,
            "tool execution recorded"
        );
    }
}

/// Test sink collecting records in memory.
#[derive(Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn write(&self, record: ExecutionRecord) {
        self.records.lock().push(record);
    }
}

/// Durable sink for deployments. Each record is written from a detached
/// task so the request path never waits on the database; a failed insert
/// is logged and dropped.
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PostgresAuditSink {
    fn write(&self, record: ExecutionRecord) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO execution_records (
                    id, tool_name, role, duration_ms, ok, args_fingerprint,
                    error_code, error_detail, recorded_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&record.tool_name)
            .bind(&record.role)
            .bind(record.duration_ms as i64)
            .bind(record.ok)
            .bind(&record.args_fingerprint)
            .bind(record.error_code.map(|c| c.as_str()))
            .bind(&record.error_detail)
            .bind(record.recorded_at)
            .execute(&pool)
            .await;
            if let Err(e) = result {
                warn!(tool = %record.tool_name, error = %e, "failed to persist execution record");
            }
        });
    }
}
