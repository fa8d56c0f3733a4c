use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weft_config::WorkflowDefinition;

/// Status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum InstanceStatus {
  Created,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl InstanceStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      InstanceStatus::Completed | InstanceStatus::Failed | InstanceStatus::Cancelled
    )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      InstanceStatus::Created => "created",
      InstanceStatus::Running => "running",
      InstanceStatus::Completed => "completed",
      InstanceStatus::Failed => "failed",
      InstanceStatus::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for InstanceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Status of one attempt of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Success,
  Failed,
  Skipped,
}

impl StepStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
    )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      StepStatus::Pending => "pending",
      StepStatus::Running => "running",
      StepStatus::Success => "success",
      StepStatus::Failed => "failed",
      StepStatus::Skipped => "skipped",
    }
  }
}

impl fmt::Display for StepStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A workflow instance.
///
/// `definition` is a snapshot taken at creation; later edits to the saved
/// definition never reach an existing instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
  pub instance_id: String,
  pub workflow_id: String,
  pub definition: WorkflowDefinition,
  pub status: InstanceStatus,
  pub input_data: serde_json::Value,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub error_message: Option<String>,
}

/// A compare-and-swap on an instance's status.
///
/// Moving to `running` stamps `started_at`; moving to a terminal status
/// stamps `completed_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
  pub from: InstanceStatus,
  pub to: InstanceStatus,
  pub at: DateTime<Utc>,
  pub error_message: Option<String>,
}

impl StatusTransition {
  pub fn new(from: InstanceStatus, to: InstanceStatus) -> Self {
    Self {
      from,
      to,
      at: Utc::now(),
      error_message: None,
    }
  }

  pub fn with_error(mut self, message: impl Into<String>) -> Self {
    self.error_message = Some(message.into());
    self
  }

  pub fn started_at(&self) -> Option<DateTime<Utc>> {
    (self.to == InstanceStatus::Running).then_some(self.at)
  }

  pub fn completed_at(&self) -> Option<DateTime<Utc>> {
    self.to.is_terminal().then_some(self.at)
  }

  /// Apply the transition to an in-memory instance, if it matches.
  pub fn apply(&self, instance: &mut WorkflowInstance) -> bool {
    if instance.status != self.from {
      return false;
    }
    instance.status = self.to;
    if let Some(at) = self.started_at() {
      instance.started_at = Some(at);
    }
    if let Some(at) = self.completed_at() {
      instance.completed_at = Some(at);
    }
    if let Some(message) = &self.error_message {
      instance.error_message = Some(message.clone());
    }
    true
  }
}

/// One attempt of a node within an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
  pub step_id: String,
  pub instance_id: String,
  pub node_id: String,
  pub node_type: String,
  /// 1-based attempt number.
  pub attempt: u32,
  pub status: StepStatus,
  /// Snapshot of the input handed to the component.
  pub input_data: serde_json::Value,
  pub output_data: Option<serde_json::Value>,
  pub error_message: Option<String>,
  /// Append-only; includes the log lines of earlier attempts.
  pub logs: Vec<String>,
  /// The component returned a fallback result.
  pub degraded: bool,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use weft_config::{NodeDef, TriggerPolicy};

  fn instance() -> WorkflowInstance {
    WorkflowInstance {
      instance_id: "i-1".to_string(),
      workflow_id: "wf".to_string(),
      definition: WorkflowDefinition {
        workflow_id: "wf".to_string(),
        name: "wf".to_string(),
        trigger_policy: TriggerPolicy::Any,
        nodes: vec![NodeDef::new("t", "manual_trigger")],
        edges: vec![],
      },
      status: InstanceStatus::Created,
      input_data: serde_json::json!({}),
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
      error_message: None,
    }
  }

  #[test]
  fn test_apply_transition_stamps_times() {
    let mut instance = instance();

    assert!(StatusTransition::new(InstanceStatus::Created, InstanceStatus::Running).apply(&mut instance));
    assert!(instance.started_at.is_some());
    assert!(instance.completed_at.is_none());

    let failed = StatusTransition::new(InstanceStatus::Running, InstanceStatus::Failed)
      .with_error("node 'a' failed");
    assert!(failed.apply(&mut instance));
    assert_eq!(instance.status, InstanceStatus::Failed);
    assert!(instance.completed_at.is_some());
    assert_eq!(instance.error_message.as_deref(), Some("node 'a' failed"));
  }

  #[test]
  fn test_apply_transition_rejects_mismatch() {
    let mut instance = instance();

    let transition = StatusTransition::new(InstanceStatus::Running, InstanceStatus::Completed);
    assert!(!transition.apply(&mut instance));
    assert_eq!(instance.status, InstanceStatus::Created);
  }

  #[test]
  fn test_terminal_statuses() {
    assert!(!InstanceStatus::Running.is_terminal());
    assert!(InstanceStatus::Cancelled.is_terminal());
    assert!(!StepStatus::Pending.is_terminal());
    assert!(StepStatus::Skipped.is_terminal());
  }
}
