use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

/// Input handed to [`Component::execute`](crate::Component::execute).
///
/// Built fresh for every attempt and passed by value; the engine never
/// mutates a context after construction.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
  pub instance_id: String,
  pub node_id: String,
  /// 1-based attempt number.
  pub attempt: u32,
  /// Latest successful output of each predecessor, keyed by node id.
  pub previous_outputs: BTreeMap<String, serde_json::Value>,
  /// The instance input, identical for every step of the run.
  pub global_variables: serde_json::Value,
  /// Node config after placeholder substitution.
  pub input_data: serde_json::Map<String, serde_json::Value>,
  /// Cancelled when the instance is cancelled.
  pub cancel: CancellationToken,
}

impl ExecutionContext {
  /// A context with no predecessors, for running a component in isolation.
  pub fn standalone(
    node_id: impl Into<String>,
    input_data: serde_json::Map<String, serde_json::Value>,
  ) -> Self {
    Self {
      instance_id: String::new(),
      node_id: node_id.into(),
      attempt: 1,
      previous_outputs: BTreeMap::new(),
      global_variables: serde_json::Value::Object(serde_json::Map::new()),
      input_data,
      cancel: CancellationToken::new(),
    }
  }

  /// Get a resolved config value.
  pub fn input(&self, key: &str) -> Option<&serde_json::Value> {
    self.input_data.get(key)
  }

  /// Get a resolved config value as a string.
  pub fn input_str(&self, key: &str) -> Option<&str> {
    self.input_data.get(key).and_then(|v| v.as_str())
  }

  /// Get a predecessor's output.
  pub fn previous_output(&self, node_id: &str) -> Option<&serde_json::Value> {
    self.previous_outputs.get(node_id)
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }
}
