//! Marionet Blocks
//!
//! Execution contracts for every block variant. Dispatch is a closed enum
//! match over [`marionet_config::BlockType`]; shared concerns (parameter
//! resolution, output registration) are standalone helpers, not base-class
//! state.
//!
//! Collaborators that actually drive a browser or an LLM live behind the
//! [`Agent`] and [`LlmClient`] traits; this crate only specifies their
//! boundary. Blocks within a run execute strictly sequentially: later
//! blocks may depend on the browser-page side effects of earlier ones.

mod code;
mod conditional;
mod error;
mod execute;
mod forloop;
mod http;
mod outcome;
mod params;
mod traits;

pub use code::run_lua_code;
pub use error::BlockError;
pub use execute::{BlockContext, Collaborators, execute_block};
pub use outcome::{BlockOutcome, BlockStatus, BranchTaken};
pub use params::{resolve_block_parameters, snapshot_for_templates};
pub use traits::{
  Agent, BlockCache, LlmClient, Mailer, SecretStore, StepOutcome, StepRequest, StepStatus,
};
