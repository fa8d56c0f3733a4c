use thiserror::Error;

/// Errors that can occur when building or querying the component registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
  /// No component is registered for the node type.
  #[error("component type not registered: {node_type}")]
  NotFound { node_type: String },

  /// The node type was registered twice. Registrations are append-only.
  #[error("component type already registered: {node_type}")]
  AlreadyRegistered { node_type: String },
}
