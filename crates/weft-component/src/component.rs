use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::metadata::ComponentMetadata;
use crate::result::ComponentResult;

/// Capability class of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
  /// Starts a run. Trigger nodes are the graph's entry points.
  Trigger,
  /// Reads data from an external system.
  Source,
  /// Processes upstream data (including AI processing).
  Transform,
  /// Writes data to an external system.
  Sink,
}

impl ComponentKind {
  pub fn is_trigger(self) -> bool {
    matches!(self, ComponentKind::Trigger)
  }
}

/// A step implementation.
#[async_trait]
pub trait Component: Send + Sync {
  /// Name, description and declared schemas.
  fn metadata(&self) -> ComponentMetadata;

  /// Run one attempt.
  ///
  /// May perform I/O and suspend. Must not panic or propagate faults: any
  /// failure is returned as `ComponentResult { success: false, error: .. }`.
  /// Long-running work should observe `ctx.cancel` to stop promptly.
  async fn execute(&self, ctx: ExecutionContext) -> ComponentResult;
}
