//! Marionet Template
//!
//! Sandboxed expression templating over a snapshot of run context values.
//! Rendering never sees secret plaintext: the context hands templates
//! opaque secret ids only.
//!
//! The `json` filter preserves value types across rendering. It wraps the
//! JSON-serialized value in a renderer-unique marker; when the fully
//! rendered string is exactly one marked value, the marker is stripped and
//! the middle is parsed back, so `{{ items | json }}` yields a list rather
//! than a lossy string. Mixing `| json` with literal text is a usage error.

mod error;
mod renderer;

pub use error::TemplateError;
pub use renderer::{Strictness, TemplateRenderer};
