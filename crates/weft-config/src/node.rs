use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// A single step of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub id: String,
  /// Component type, resolved against the registry.
  #[serde(rename = "type")]
  pub node_type: String,
  /// Component configuration. String values may contain `{name}` placeholders.
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
  /// Overrides the retry policy registered for the node type.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry: Option<RetryPolicy>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

impl NodeDef {
  pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      node_type: node_type.into(),
      config: serde_json::Map::new(),
      retry: None,
      timeout_ms: None,
    }
  }

  /// Builder-style helper to set the config from a JSON object.
  ///
  /// Non-object values are ignored.
  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    if let serde_json::Value::Object(map) = config {
      self.config = map;
    }
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = Some(retry);
    self
  }

  pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }
}
