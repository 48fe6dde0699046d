use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::context::RunContext;
use crate::error::ContextError;

/// Explicit registry of in-flight run contexts.
///
/// Contexts are created at run start and discarded at cleanup; the registry
/// exists so transport-layer callers (cancellation endpoints, debug views)
/// can reach a live run's context without any ambient global state. Each
/// context is still exclusively owned by its run: the run holds the handle
/// and locks it across one block boundary at a time.
#[derive(Debug, Default)]
pub struct ContextRegistry {
  inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<RunContext>>>>,
}

impl ContextRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Create the context for a run. Fails if the run already has one.
  pub fn create(&self, run_id: &str) -> Result<Arc<tokio::sync::Mutex<RunContext>>, ContextError> {
    let mut inner = self.inner.lock().expect("context registry poisoned");
    if inner.contains_key(run_id) {
      return Err(ContextError::RunAlreadyExists {
        run_id: run_id.to_string(),
      });
    }
    let handle = Arc::new(tokio::sync::Mutex::new(RunContext::new()));
    inner.insert(run_id.to_string(), handle.clone());
    Ok(handle)
  }

  /// Get a live run's context handle.
  pub fn get(&self, run_id: &str) -> Option<Arc<tokio::sync::Mutex<RunContext>>> {
    self
      .inner
      .lock()
      .expect("context registry poisoned")
      .get(run_id)
      .cloned()
  }

  /// Discard a run's context at cleanup.
  pub fn discard(&self, run_id: &str) {
    self
      .inner
      .lock()
      .expect("context registry poisoned")
      .remove(run_id);
  }

  /// Number of in-flight runs.
  pub fn len(&self) -> usize {
    self.inner.lock().expect("context registry poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_create_get_discard_lifecycle() {
    let registry = ContextRegistry::new();

    let handle = registry.create("run_1").unwrap();
    handle.lock().await.set_value("k", serde_json::json!(1));

    let fetched = registry.get("run_1").unwrap();
    assert_eq!(
      fetched.lock().await.get_value("k"),
      Some(&serde_json::json!(1))
    );

    registry.discard("run_1");
    assert!(registry.get("run_1").is_none());
    assert!(registry.is_empty());
  }

  #[test]
  fn test_duplicate_run_rejected() {
    let registry = ContextRegistry::new();
    registry.create("run_1").unwrap();
    assert!(matches!(
      registry.create("run_1"),
      Err(ContextError::RunAlreadyExists { .. })
    ));
  }
}
