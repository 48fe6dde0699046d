//! Marionet Engine
//!
//! Drives a validated workflow definition to a terminal status: parameter
//! and secret registration, sequential block traversal with branch and
//! continue-on-failure handling, the finally block, webhook delivery and
//! resource cleanup.
//!
//! One run is one logical thread of control. Cancellation is cooperative:
//! the caller's [`tokio_util::sync::CancellationToken`] is observed at
//! every block boundary, never mid-block.

mod engine;
mod error;
mod webhook;

pub use engine::{ExecutionEngine, RunOutcome, RunRequest};
pub use error::EngineError;
pub use marionet_store::RunStatus;
