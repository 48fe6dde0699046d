//! Marionet Workflow
//!
//! Turns a block list into a traversable DAG. All structural invariants
//! are enforced here, at definition create/update time, never at run time:
//! unique labels, exactly one root, no cycles, resolvable edges, exactly
//! one default branch per conditional, terminal finally block.
//!
//! The builder also computes the conditional scope map (which blocks belong
//! to which conditional's branches, with merge points excluded), used by
//! callers that render or partially re-execute branch subgraphs.

mod error;
mod graph;
mod scope;

pub use error::DefinitionError;
pub use graph::{WorkflowGraph, build_graph, validate_definition};
pub use scope::compute_conditional_scope;
