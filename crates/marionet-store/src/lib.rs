//! Marionet Store
//!
//! Persistence for workflow runs and block executions. The [`Store`] trait
//! defines the operations the execution engine needs; [`SqliteStore`] backs
//! them with SQLite and [`MemoryStore`] backs them with a map for tests.

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{BlockRunRecord, BlockRunStatus, RunStatus, WorkflowRunRecord};

/// JSON column wrapper, re-exported so callers build records without a
/// direct sqlx dependency.
pub use sqlx::types::Json;

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Storage trait for workflow runs and block runs.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create a new run record.
  async fn create_run(&self, run: &WorkflowRunRecord) -> Result<(), Error>;

  /// Get a run by ID.
  async fn get_run(&self, run_id: &str) -> Result<WorkflowRunRecord, Error>;

  /// Move a run to a new status. Terminal statuses carry the completion
  /// time and, for failures, the reason.
  async fn update_run_status(
    &self,
    run_id: &str,
    status: RunStatus,
    failure_reason: Option<&str>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
  ) -> Result<(), Error>;

  /// List runs for a workflow, newest first.
  async fn list_runs(&self, workflow_id: &str) -> Result<Vec<WorkflowRunRecord>, Error>;

  /// Record one block execution attempt.
  async fn create_block_run(&self, block_run: &BlockRunRecord) -> Result<(), Error>;

  /// List a run's block executions in creation order.
  async fn list_block_runs(&self, run_id: &str) -> Result<Vec<BlockRunRecord>, Error>;
}
