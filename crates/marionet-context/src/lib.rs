//! Marionet Context
//!
//! The per-run store of parameter values, secrets, and block metadata.
//!
//! The redaction invariant lives here: a value sourced from a credential or
//! secrets-manager entry is never stored in `values` as plaintext. A fresh
//! opaque id (`secret_<uuid>_<field>`) goes into `values` instead, and the
//! real value lives only in the parallel `secrets` map. Template rendering
//! (and therefore every LLM-visible string) sees only the opaque ids; the
//! second resolution pass that substitutes real values runs immediately
//! before an automation action or code-block execution and is never logged
//! or persisted.

mod context;
mod error;
mod registry;

pub use context::{BlockMetadata, RunContext, SecretField, SecretValue, TOTP_FETCH_SENTINEL};
pub use error::ContextError;
pub use registry::ContextRegistry;
