use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{BlockRunRecord, Error, RunStatus, Store, WorkflowRunRecord};

/// In-memory store for tests and the dry-run CLI.
#[derive(Debug, Default)]
pub struct MemoryStore {
  runs: Mutex<HashMap<String, WorkflowRunRecord>>,
  block_runs: Mutex<Vec<BlockRunRecord>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn create_run(&self, run: &WorkflowRunRecord) -> Result<(), Error> {
    self
      .runs
      .lock()
      .expect("memory store poisoned")
      .insert(run.run_id.clone(), run.clone());
    Ok(())
  }

  async fn get_run(&self, run_id: &str) -> Result<WorkflowRunRecord, Error> {
    self
      .runs
      .lock()
      .expect("memory store poisoned")
      .get(run_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(run_id.to_string()))
  }

  async fn update_run_status(
    &self,
    run_id: &str,
    status: RunStatus,
    failure_reason: Option<&str>,
    completed_at: Option<DateTime<Utc>>,
  ) -> Result<(), Error> {
    let mut runs = self.runs.lock().expect("memory store poisoned");
    let run = runs
      .get_mut(run_id)
      .ok_or_else(|| Error::NotFound(run_id.to_string()))?;
    run.status = status;
    run.failure_reason = failure_reason.map(String::from);
    run.completed_at = completed_at;
    Ok(())
  }

  async fn list_runs(&self, workflow_id: &str) -> Result<Vec<WorkflowRunRecord>, Error> {
    let mut runs: Vec<_> = self
      .runs
      .lock()
      .expect("memory store poisoned")
      .values()
      .filter(|r| r.workflow_id == workflow_id)
      .cloned()
      .collect();
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(runs)
  }

  async fn create_block_run(&self, block_run: &BlockRunRecord) -> Result<(), Error> {
    self
      .block_runs
      .lock()
      .expect("memory store poisoned")
      .push(block_run.clone());
    Ok(())
  }

  async fn list_block_runs(&self, run_id: &str) -> Result<Vec<BlockRunRecord>, Error> {
    Ok(
      self
        .block_runs
        .lock()
        .expect("memory store poisoned")
        .iter()
        .filter(|b| b.run_id == run_id)
        .cloned()
        .collect(),
    )
  }
}
