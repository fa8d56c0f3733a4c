//! Per-step context assembly.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use weft_component::ExecutionContext;
use weft_config::NodeDef;

use crate::template::Scope;

/// A context ready for dispatch, plus the log lines substitution produced.
#[derive(Debug, Clone)]
pub struct StepInput {
  pub context: ExecutionContext,
  pub warnings: Vec<String>,
}

/// Builds [`ExecutionContext`]s for the nodes of one instance.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
  instance_id: String,
  global_variables: Value,
  cancel: CancellationToken,
}

impl ContextBuilder {
  pub fn new(instance_id: impl Into<String>, global_variables: Value, cancel: CancellationToken) -> Self {
    Self {
      instance_id: instance_id.into(),
      global_variables,
      cancel,
    }
  }

  /// Assemble the context for one attempt of `node`.
  ///
  /// `predecessors` holds the latest successful output of each predecessor in
  /// edge order.
  pub fn build(&self, node: &NodeDef, attempt: u32, predecessors: &[(String, Value)]) -> StepInput {
    let resolved = Scope::new(predecessors, &self.global_variables).resolve(&node.config);

    let previous_outputs: BTreeMap<String, Value> = predecessors.iter().cloned().collect();

    StepInput {
      context: ExecutionContext {
        instance_id: self.instance_id.clone(),
        node_id: node.id.clone(),
        attempt,
        previous_outputs,
        global_variables: self.global_variables.clone(),
        input_data: resolved.value,
        cancel: self.cancel.clone(),
      },
      warnings: resolved.unresolved.iter().map(|u| u.warning()).collect(),
    }
  }
}
