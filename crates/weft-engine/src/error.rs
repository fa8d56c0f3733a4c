//! Engine errors.

use weft_store::InstanceStatus;
use weft_workflow::DefinitionError;

/// Errors returned by [`WorkflowEngine`](crate::WorkflowEngine) operations.
///
/// Step failures never show up here; they are recorded on the step and the
/// instance.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The definition was rejected before any step ran.
  #[error("definition invalid: {0}")]
  DefinitionInvalid(#[from] DefinitionError),

  #[error("instance '{instance_id}' not found")]
  InstanceNotFound { instance_id: String },

  /// The operation is not allowed in the instance's current status.
  #[error("cannot {operation} instance '{instance_id}' in status {status}")]
  InvalidState {
    instance_id: String,
    status: InstanceStatus,
    operation: &'static str,
  },

  /// The instance is running, but not under this engine.
  #[error("instance '{instance_id}' is running in another engine")]
  RunNotOwned { instance_id: String },

  #[error("store error: {0}")]
  Store(#[from] weft_store::Error),
}

impl EngineError {
  /// Map a store lookup failure onto the instance it was for.
  pub(crate) fn from_lookup(instance_id: &str, err: weft_store::Error) -> Self {
    match err {
      weft_store::Error::NotFound(_) => EngineError::InstanceNotFound {
        instance_id: instance_id.to_string(),
      },
      other => EngineError::Store(other),
    }
  }
}
