use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{BlockRunRecord, Error, RunStatus, Store, WorkflowRunRecord};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Create the schema if it does not exist.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS workflow_runs (
                run_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                parent_run_id TEXT,
                status TEXT NOT NULL,
                failure_reason TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
    )
    .execute(&self.pool)
    .await?;

    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS block_runs (
                block_run_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                label TEXT NOT NULL,
                retry INTEGER NOT NULL,
                status TEXT NOT NULL,
                output TEXT,
                failure_reason TEXT,
                branch_taken TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (run_id, label, retry)
            )
            "#,
    )
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_run(&self, run: &WorkflowRunRecord) -> Result<(), Error> {
    sqlx::query(
            r#"
            INSERT INTO workflow_runs (run_id, workflow_id, parent_run_id, status, failure_reason, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.workflow_id)
        .bind(&run.parent_run_id)
        .bind(run.status)
        .bind(&run.failure_reason)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await?;

    Ok(())
  }

  async fn get_run(&self, run_id: &str) -> Result<WorkflowRunRecord, Error> {
    sqlx::query_as(
      r#"
            SELECT run_id, workflow_id, parent_run_id, status, failure_reason, started_at, completed_at
            FROM workflow_runs
            WHERE run_id = ?
            "#,
    )
    .bind(run_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(run_id.to_string()))
  }

  async fn update_run_status(
    &self,
    run_id: &str,
    status: RunStatus,
    failure_reason: Option<&str>,
    completed_at: Option<DateTime<Utc>>,
  ) -> Result<(), Error> {
    sqlx::query(
      r#"
            UPDATE workflow_runs
            SET status = ?, failure_reason = ?, completed_at = ?
            WHERE run_id = ?
            "#,
    )
    .bind(status)
    .bind(failure_reason)
    .bind(completed_at)
    .bind(run_id)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_runs(&self, workflow_id: &str) -> Result<Vec<WorkflowRunRecord>, Error> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT run_id, workflow_id, parent_run_id, status, failure_reason, started_at, completed_at
            FROM workflow_runs
            WHERE workflow_id = ?
            ORDER BY started_at DESC
            "#,
      )
      .bind(workflow_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }

  async fn create_block_run(&self, block_run: &BlockRunRecord) -> Result<(), Error> {
    sqlx::query(
            r#"
            INSERT INTO block_runs (block_run_id, run_id, label, retry, status, output, failure_reason, branch_taken, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&block_run.block_run_id)
        .bind(&block_run.run_id)
        .bind(&block_run.label)
        .bind(block_run.retry)
        .bind(block_run.status)
        .bind(&block_run.output)
        .bind(&block_run.failure_reason)
        .bind(&block_run.branch_taken)
        .bind(block_run.created_at)
        .execute(&self.pool)
        .await?;

    Ok(())
  }

  async fn list_block_runs(&self, run_id: &str) -> Result<Vec<BlockRunRecord>, Error> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT block_run_id, run_id, label, retry, status, output, failure_reason, branch_taken, created_at
            FROM block_runs
            WHERE run_id = ?
            ORDER BY created_at ASC, retry ASC
            "#,
      )
      .bind(run_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }
}
