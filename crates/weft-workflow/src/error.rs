use thiserror::Error;

/// Reasons a workflow definition is rejected before any step runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
  #[error("workflow has no nodes")]
  Empty,

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("edge references unknown node: source={source_node}, target={target_node}, unknown={unknown}")]
  UnknownNode {
    source_node: String,
    target_node: String,
    unknown: String,
  },

  #[error("cycle detected: {}", path.join(" -> "))]
  Cycle { path: Vec<String> },

  #[error("no entry points found (all nodes have incoming edges)")]
  NoEntryPoints,

  #[error("workflow must have exactly one entry node, found {}: [{}]", found.len(), found.join(", "))]
  EntryPointCount { found: Vec<String> },

  #[error("node '{node_id}' has no incoming edges but type '{node_type}' is not a trigger (orphan node)")]
  OrphanNode { node_id: String, node_type: String },

  #[error("trigger node '{node_id}' must not have incoming edges")]
  TriggerHasIncoming { node_id: String },

  #[error("node '{node_id}' has unknown component type '{node_type}'")]
  UnknownComponentType { node_id: String, node_type: String },
}
