//! Marionet Config
//!
//! This crate contains the serializable workflow definition types for
//! Marionet. A definition is authored once (JSON from the API, CLI, or
//! database storage) and is immutable thereafter; edits create a new
//! workflow version.
//!
//! The graph builder in `marionet-workflow` takes these types, validates
//! them, and produces a traversable DAG for execution.

mod block;
mod parameter;
mod workflow;

pub use block::{BlockDef, BlockType, BranchCondition, BranchCriteria};
pub use parameter::ParameterDef;
pub use workflow::WorkflowDefinition;
