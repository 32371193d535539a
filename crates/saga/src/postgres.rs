use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::GlobalId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::dedupe::{DedupKey, DeduplicationStore, effective_ttl};
use crate::error::{Result, SagaError};
use crate::execution::{Execution, ExecutionSnapshot, Version};
use crate::repository::{ExecutionRepository, WorkflowRepository};

/// PostgreSQL-backed execution repository.
///
/// Workflows are stored by name and resolved through `workflows` when an
/// execution is loaded.
#[derive(Clone)]
pub struct PostgresExecutionRepository {
    pool: PgPool,
    workflows: Arc<dyn WorkflowRepository>,
}

impl PostgresExecutionRepository {
    pub fn new(pool: PgPool, workflows: Arc<dyn WorkflowRepository>) -> Self {
        Self { pool, workflows }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_snapshot(row: &PgRow) -> Result<ExecutionSnapshot> {
        let state: serde_json::Value = row.try_get("state")?;
        let state: BTreeMap<String, serde_json::Value> = serde_json::from_value(state)?;
        let status: String = row.try_get("status")?;

        Ok(ExecutionSnapshot {
            id: GlobalId::from_uuid(row.try_get::<Uuid, _>("id")?),
            workflow: row.try_get("workflow_name")?,
            status: status.parse()?,
            version: Version::new(row.try_get("version")?),
            state,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn stored_version(&self, id: GlobalId) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM executions WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.map(Version::new).unwrap_or(Version::initial()))
    }

    async fn conflict(&self, execution: &Execution) -> SagaError {
        match self.stored_version(execution.id()).await {
            Ok(actual) => SagaError::ConcurrencyConflict {
                id: execution.id(),
                expected: execution.version(),
                actual,
            },
            Err(err) => err,
        }
    }
}

#[async_trait]
impl ExecutionRepository for PostgresExecutionRepository {
    async fn find(&self, id: GlobalId) -> Result<Option<Execution>> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_name, state, status, version, created_at, updated_at
            FROM executions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let snapshot = Self::row_to_snapshot(&row)?;
        let workflow = self
            .workflows
            .find(&snapshot.workflow)
            .await?
            .ok_or_else(|| SagaError::WorkflowNotFound(snapshot.workflow.clone()))?;

        Ok(Some(Execution::restore(snapshot, workflow)))
    }

    async fn save(&self, execution: &mut Execution) -> Result<()> {
        let state = serde_json::to_value(execution.state())?;
        let next = execution.version().next();

        let result = if execution.version() == Version::initial() {
            sqlx::query(
                r#"
                INSERT INTO executions (id, workflow_name, state, status, version, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(execution.id().as_uuid())
            .bind(execution.workflow().name())
            .bind(&state)
            .bind(execution.status().as_str())
            .bind(next.as_i64())
            .bind(execution.created_at())
            .bind(execution.updated_at())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE executions
                SET state = $2, status = $3, version = $4, updated_at = $5
                WHERE id = $1 AND version = $6
                "#,
            )
            .bind(execution.id().as_uuid())
            .bind(&state)
            .bind(execution.status().as_str())
            .bind(next.as_i64())
            .bind(execution.updated_at())
            .bind(execution.version().as_i64())
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(self.conflict(execution).await);
        }

        execution.set_version(next);
        Ok(())
    }
}

/// PostgreSQL-backed deduplication store over the `processed_messages`
/// table.
///
/// Shared by every orchestrator instance on the same database and survives
/// restarts.
#[derive(Debug, Clone)]
pub struct PostgresDeduplicationStore {
    pool: PgPool,
}

impl PostgresDeduplicationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes expired keys and returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_messages WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DeduplicationStore for PostgresDeduplicationStore {
    async fn has(&self, key: &DedupKey) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM processed_messages WHERE key = $1 AND expires_at > NOW())",
        )
        .bind(key.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn set(&self, key: &DedupKey, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(effective_ttl(ttl))
            .map_err(|e| SagaError::Deduplication(format!("invalid ttl: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO processed_messages (key, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key.as_str())
        .bind(Utc::now() + ttl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
