use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Status of a workflow run.
///
/// `Created` and `Running` are transient; everything else is terminal and
/// final (a run never leaves a terminal status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RunStatus {
  Created,
  Running,
  Completed,
  Failed,
  Terminated,
  Canceled,
}

impl RunStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, RunStatus::Created | RunStatus::Running)
  }
}

/// Status of one block execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BlockRunStatus {
  Completed,
  Failed,
  Terminated,
  Canceled,
}

/// A workflow run as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowRunRecord {
  pub run_id: String,
  pub workflow_id: String,
  /// Set when this run was spawned by another run.
  pub parent_run_id: Option<String>,
  pub status: RunStatus,
  pub failure_reason: Option<String>,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

/// One block execution as stored in the database.
///
/// Keyed (run_id, label, retry) so retried attempts are separate rows and
/// a run's history replays in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BlockRunRecord {
  pub block_run_id: String,
  pub run_id: String,
  pub label: String,
  pub retry: i32,
  pub status: BlockRunStatus,
  pub output: Option<Json<serde_json::Value>>,
  pub failure_reason: Option<String>,
  pub branch_taken: Option<String>,
  pub created_at: DateTime<Utc>,
}
