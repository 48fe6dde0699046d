use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("template render failed: {message}")]
  Render { message: String },

  #[error("expression evaluation failed: {message}")]
  Expression { message: String },

  /// `| json` is valid only for whole-value replacement; surrounding it
  /// with literal text would force a lossy string conversion.
  #[error("the json filter must replace the whole value, not be mixed with literal text")]
  JsonFilterMisuse,

  #[error("json filter produced invalid JSON: {message}")]
  InvalidJson { message: String },
}

impl From<minijinja::Error> for TemplateError {
  fn from(e: minijinja::Error) -> Self {
    TemplateError::Render {
      message: e.to_string(),
    }
  }
}
