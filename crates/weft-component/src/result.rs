//! Component result types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Retry classification of a step error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Retried under the node's retry policy.
  Transient,
  /// Terminates the step on the current attempt.
  Fatal,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorKind::Transient => f.write_str("transient"),
      ErrorKind::Fatal => f.write_str("fatal"),
    }
  }
}

/// A typed step error, carried as data inside [`ComponentResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ComponentError {
  pub kind: ErrorKind,
  pub message: String,
}

impl ComponentError {
  pub fn transient(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::Transient,
      message: message.into(),
    }
  }

  pub fn fatal(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::Fatal,
      message: message.into(),
    }
  }

  pub fn is_transient(&self) -> bool {
    self.kind == ErrorKind::Transient
  }
}

/// Value returned by a component attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentResult {
  pub success: bool,
  /// Output fields; the schema is owned by the component type.
  pub output_data: serde_json::Map<String, serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ComponentError>,
  #[serde(default)]
  pub logs: Vec<String>,
  #[serde(default)]
  pub execution_time_ms: u64,
  /// The component used a reduced-capability fallback. Not a failure.
  #[serde(default)]
  pub degraded: bool,
}

impl ComponentResult {
  /// A successful result.
  ///
  /// An object becomes `output_data` as-is; any other value is stored under
  /// the `value` key.
  pub fn success(output: serde_json::Value) -> Self {
    let output_data = match output {
      serde_json::Value::Object(map) => map,
      serde_json::Value::Null => serde_json::Map::new(),
      other => {
        let mut map = serde_json::Map::new();
        map.insert("value".to_string(), other);
        map
      }
    };
    Self {
      success: true,
      output_data,
      error: None,
      logs: Vec::new(),
      execution_time_ms: 0,
      degraded: false,
    }
  }

  pub fn failure(error: ComponentError) -> Self {
    Self {
      success: false,
      output_data: serde_json::Map::new(),
      error: Some(error),
      logs: Vec::new(),
      execution_time_ms: 0,
      degraded: false,
    }
  }

  pub fn transient(message: impl Into<String>) -> Self {
    Self::failure(ComponentError::transient(message))
  }

  pub fn fatal(message: impl Into<String>) -> Self {
    Self::failure(ComponentError::fatal(message))
  }

  /// Mark the result as produced by a fallback path.
  pub fn degraded(mut self) -> Self {
    self.degraded = true;
    self
  }

  pub fn with_log(mut self, line: impl Into<String>) -> Self {
    self.logs.push(line.into());
    self
  }

  pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
    self.execution_time_ms = ms;
    self
  }

  /// The error to record for an unsuccessful result.
  ///
  /// A failure without an error is treated as fatal.
  pub fn failure_error(&self) -> Option<ComponentError> {
    if self.success {
      return None;
    }
    Some(
      self
        .error
        .clone()
        .unwrap_or_else(|| ComponentError::fatal("component reported failure without an error")),
    )
  }
}
