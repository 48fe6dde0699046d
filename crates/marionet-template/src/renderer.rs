use minijinja::{Environment, UndefinedBehavior, Value};

use crate::error::TemplateError;

/// How undefined references behave during rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
  /// Any undefined reference is an error.
  Strict,
  /// Undefined references render as the empty string.
  Lenient,
}

/// A sandboxed template renderer.
///
/// One renderer is created per run; the `json` filter marker is unique per
/// renderer so marked output can never collide with workflow data produced
/// by another run.
pub struct TemplateRenderer {
  env: Environment<'static>,
  marker: String,
}

impl TemplateRenderer {
  pub fn new(strictness: Strictness) -> Self {
    let marker = format!("%json-{}%", uuid::Uuid::new_v4());

    let mut env = Environment::new();
    env.set_undefined_behavior(match strictness {
      Strictness::Strict => UndefinedBehavior::Strict,
      Strictness::Lenient => UndefinedBehavior::Lenient,
    });

    let filter_marker = marker.clone();
    env.add_filter("json", move |value: Value| -> Result<String, minijinja::Error> {
      let serialized = serde_json::to_string(&value).map_err(|e| {
        minijinja::Error::new(
          minijinja::ErrorKind::InvalidOperation,
          format!("value is not JSON-serializable: {}", e),
        )
      })?;
      Ok(format!("{}{}{}", filter_marker, serialized, filter_marker))
    });

    Self { env, marker }
  }

  /// Render a template against a context snapshot, preserving the value
  /// type when the whole template is a single `| json` replacement.
  pub fn render(
    &self,
    template: &str,
    context: &serde_json::Value,
  ) -> Result<serde_json::Value, TemplateError> {
    let rendered = self.render_string(template, context)?;

    if !rendered.contains(&self.marker) {
      return Ok(serde_json::Value::String(rendered));
    }

    // The marker must wrap the entire rendered string; anything else means
    // `| json` was mixed with literal text.
    let inner = rendered
      .strip_prefix(&self.marker)
      .and_then(|s| s.strip_suffix(&self.marker))
      .ok_or(TemplateError::JsonFilterMisuse)?;
    if inner.contains(&self.marker) {
      return Err(TemplateError::JsonFilterMisuse);
    }

    serde_json::from_str(inner).map_err(|e| TemplateError::InvalidJson {
      message: e.to_string(),
    })
  }

  /// Render a template to a plain string (no json-filter unwrapping).
  pub fn render_string(
    &self,
    template: &str,
    context: &serde_json::Value,
  ) -> Result<String, TemplateError> {
    self
      .env
      .render_str(template, Value::from_serialize(context))
      .map_err(|e| TemplateError::Render {
        message: e.to_string(),
      })
  }

  /// Evaluate a boolean expression against a context snapshot.
  ///
  /// Used for conditional branch criteria; truthiness follows template
  /// semantics (empty strings, empty lists, 0 and none are false).
  pub fn evaluate_bool(
    &self,
    expression: &str,
    context: &serde_json::Value,
  ) -> Result<bool, TemplateError> {
    let compiled =
      self
        .env
        .compile_expression(expression)
        .map_err(|e| TemplateError::Expression {
          message: e.to_string(),
        })?;
    let result = compiled
      .eval(Value::from_serialize(context))
      .map_err(|e| TemplateError::Expression {
        message: e.to_string(),
      })?;
    Ok(result.is_true())
  }
}
