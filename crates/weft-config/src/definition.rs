use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::node::NodeDef;

/// How many entry (trigger) nodes a definition may declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
  /// One or more entry nodes.
  #[default]
  Any,
  /// Exactly one entry node.
  Single,
}

/// A workflow definition as authored and saved.
///
/// Node order is significant: it breaks ties in the topological order, which
/// keeps execution order reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
  pub workflow_id: String,
  pub name: String,
  #[serde(default)]
  pub trigger_policy: TriggerPolicy,
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub edges: Vec<Edge>,
}

impl WorkflowDefinition {
  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&NodeDef> {
    self.nodes.iter().find(|n| n.id == node_id)
  }

  /// Parse a definition from JSON text.
  pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(content)
  }
}
