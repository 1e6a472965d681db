// Copyright (c) 2026 Opsgate Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Postgres-backed memory store.
//!
//! The in-process caller is single-threaded, but the store must still guard
//! against concurrent writers across process instances: the version insert
//! and head advance run inside one transaction with the head row locked
//! (`FOR UPDATE`), so a partially applied write is never observable.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use super::{
    check_content_cap, resolve_rollback_target, MemoryError, MemorySnapshot, MemoryStore, Scope,
    VersionInfo, MAX_LIST_LIMIT,
};

const DEFAULT_TOKEN_BUDGET: i32 = 1000;

pub struct PostgresMemoryStore {
    pool: PgPool,
}

impl PostgresMemoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock the head row for this scope, creating it on first use, and
    /// return `(current_version, current_version_row_id)`.
    async fn lock_head(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        scope: &Scope,
    ) -> Result<(i32, Option<Uuid>), MemoryError> {
        sqlx::query(
            r#"
            INSERT INTO memory_heads (scope_type, scope_id, current_version, token_budget, total_versions)
            VALUES ($1, $2, 0, $3, 0)
            ON CONFLICT (scope_type, scope_id) DO NOTHING
            "#,
        )
        .bind(scope.scope_type.as_str())
        .bind(&scope.scope_id)
        .bind(DEFAULT_TOKEN_BUDGET)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        let row = sqlx::query(
            r#"
            SELECT current_version FROM memory_heads
            WHERE scope_type = $1 AND scope_id = $2
            FOR UPDATE
            "#,
        )
        .bind(scope.scope_type.as_str())
        .bind(&scope.scope_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage)?;
        let current_version: i32 = row.get("current_version");

        let parent_id = if current_version > 0 {
            sqlx::query(
                r#"
                SELECT id FROM memory_versions
                WHERE scope_type = $1 AND scope_id = $2 AND version_no = $3
                "#,
            )
            .bind(scope.scope_type.as_str())
            .bind(&scope.scope_id)
            .bind(current_version)
            .fetch_optional(&mut **tx)
            .await
            .map_err(storage)?
            .map(|r| r.get::<Uuid, _>("id"))
        } else {
            None
        };

        Ok((current_version, parent_id))
    }

    async fn append_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        scope: &Scope,
        current_version: i32,
        parent_id: Option<Uuid>,
        rollback_from: Option<Uuid>,
        content: &str,
        content_chars: u32,
        change_summary: Option<&str>,
        created_by: &str,
    ) -> Result<u32, MemoryError> {
        let new_version = current_version + 1;
        sqlx::query(
            r#"
            INSERT INTO memory_versions (
                id, scope_type, scope_id, version_no, parent_version_id,
                rollback_from_version_id, content, content_chars,
                change_summary, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(scope.scope_type.as_str())
        .bind(&scope.scope_id)
        .bind(new_version)
        .bind(parent_id)
        .bind(rollback_from)
        .bind(content)
        .bind(content_chars as i32)
        .bind(change_summary)
        .bind(created_by)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            UPDATE memory_heads
            SET current_version = $3, total_versions = total_versions + 1
            WHERE scope_type = $1 AND scope_id = $2
            "#,
        )
        .bind(scope.scope_type.as_str())
        .bind(&scope.scope_id)
        .bind(new_version)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        Ok(new_version as u32)
    }
}

#[async_trait]
impl MemoryStore for PostgresMemoryStore {
    async fn get(&self, scope: &Scope) -> Result<MemorySnapshot, MemoryError> {
        let row = sqlx::query(
            r#"
            SELECT v.content, v.version_no
            FROM memory_heads h
            JOIN memory_versions v
              ON v.scope_type = h.scope_type
             AND v.scope_id = h.scope_id
             AND v.version_no = h.current_version
            WHERE h.scope_type = $1 AND h.scope_id = $2 AND h.current_version > 0
            "#,
        )
        .bind(scope.scope_type.as_str())
        .bind(&scope.scope_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Ok(match row {
            Some(row) => MemorySnapshot {
                content: row.get("content"),
                version: row.get::<i32, _>("version_no") as u32,
            },
            None => MemorySnapshot {
                content: scope.scope_type.empty_template().to_string(),
                version: 0,
            },
        })
    }

    async fn update(
        &self,
        scope: &Scope,
        content: String,
        change_summary: Option<String>,
        created_by: &str,
    ) -> Result<u32, MemoryError> {
        let content_chars = check_content_cap(&content)?;
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let (current, parent_id) = Self::lock_head(&mut tx, scope).await?;
        let new_version = Self::append_version(
            &mut tx,
            scope,
            current,
            parent_id,
            None,
            &content,
            content_chars,
            change_summary.as_deref(),
            created_by,
        )
        .await?;
        tx.commit().await.map_err(storage)?;
        Ok(new_version)
    }

    async fn rollback(
        &self,
        scope: &Scope,
        target_version: Option<u32>,
        created_by: &str,
    ) -> Result<u32, MemoryError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let (current, parent_id) = Self::lock_head(&mut tx, scope).await?;
        let target = resolve_rollback_target(current as u32, target_version)?;

        let row = sqlx::query(
            r#"
            SELECT id, content, content_chars FROM memory_versions
            WHERE scope_type = $1 AND scope_id = $2 AND version_no = $3
            "#,
        )
        .bind(scope.scope_type.as_str())
        .bind(&scope.scope_id)
        .bind(target as i32)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?
        .ok_or(MemoryError::NoSuchVersion(target))?;

        let target_id: Uuid = row.get("id");
        let content: String = row.get("content");
        let content_chars: i32 = row.get("content_chars");
        let summary = format!("rollback to version {}", target);

        let new_version = Self::append_version(
            &mut tx,
            scope,
            current,
            parent_id,
            Some(target_id),
            &content,
            content_chars as u32,
            Some(&summary),
            created_by,
        )
        .await?;
        tx.commit().await.map_err(storage)?;
        Ok(new_version)
    }

    async fn list_versions(
        &self,
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<VersionInfo>, MemoryError> {
        let limit = limit.min(MAX_LIST_LIMIT);
        let rows = sqlx::query(
            r#"
            SELECT id, version_no, content_chars, change_summary, created_by,
                   created_at, rollback_from_version_id
            FROM memory_versions
            WHERE scope_type = $1 AND scope_id = $2
            ORDER BY version_no DESC
            LIMIT $3
            "#,
        )
        .bind(scope.scope_type.as_str())
        .bind(&scope.scope_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows
            .into_iter()
            .map(|row| VersionInfo {
                id: row.get("id"),
                version_no: row.get::<i32, _>("version_no") as u32,
                content_chars: row.get::<i32, _>("content_chars") as u32,
                change_summary: row.get("change_summary"),
                created_by: row.get("created_by"),
                created_at: row.get("created_at"),
                is_rollback: row.get::<Option<Uuid>, _>("rollback_from_version_id").is_some(),
            })
            .collect())
    }
}

fn storage(e: sqlx::Error) -> MemoryError {
    MemoryError::Storage(e.to_string())
}
