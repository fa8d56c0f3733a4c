//! Per-attempt step records.
//!
//! The decision loop appends a record when it dispatches an attempt and
//! hands the resulting [`StepHandle`] to the attempt's task. From then on the
//! task is the only writer of that record. Skipped rows are written once and
//! never touched again.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use weft_config::NodeDef;
use weft_store::{ExecutionStep, StepStatus, Store};

/// Prefix a log line with its attempt number.
pub fn tag(attempt: u32, line: &str) -> String {
  format!("[attempt {}] {}", attempt, line)
}

/// Creates step records for one instance.
#[derive(Clone)]
pub struct StepTracker {
  store: Arc<dyn Store>,
  instance_id: String,
}

impl StepTracker {
  pub fn new(store: Arc<dyn Store>, instance_id: impl Into<String>) -> Self {
    Self {
      store,
      instance_id: instance_id.into(),
    }
  }

  fn record(&self, node: &NodeDef, attempt: u32, status: StepStatus, input_data: Value, logs: Vec<String>) -> ExecutionStep {
    ExecutionStep {
      step_id: uuid::Uuid::new_v4().to_string(),
      instance_id: self.instance_id.clone(),
      node_id: node.id.clone(),
      node_type: node.node_type.clone(),
      attempt,
      status,
      input_data,
      output_data: None,
      error_message: None,
      logs,
      degraded: false,
      created_at: Utc::now(),
      started_at: None,
      ended_at: None,
    }
  }

  /// Append a `pending` record for a new attempt.
  ///
  /// `logs` carries the lines of earlier attempts.
  pub async fn begin(
    &self,
    node: &NodeDef,
    attempt: u32,
    input_data: Value,
    logs: Vec<String>,
  ) -> Result<StepHandle, weft_store::Error> {
    let step = self.record(node, attempt, StepStatus::Pending, input_data, logs);
    self.store.append_step(&step).await?;
    Ok(StepHandle {
      store: self.store.clone(),
      step,
    })
  }

  /// Append a terminal `skipped` record for a node that will never run.
  pub async fn skip(
    &self,
    node: &NodeDef,
    attempt: u32,
    mut logs: Vec<String>,
    reason: &str,
  ) -> Result<ExecutionStep, weft_store::Error> {
    logs.push(tag(attempt, reason));
    let mut step = self.record(node, attempt, StepStatus::Skipped, Value::Null, logs);
    step.ended_at = Some(step.created_at);
    self.store.append_step(&step).await?;
    Ok(step)
  }
}

/// Exclusive writer for one attempt's record.
pub struct StepHandle {
  store: Arc<dyn Store>,
  step: ExecutionStep,
}

impl StepHandle {
  pub fn step(&self) -> &ExecutionStep {
    &self.step
  }

  pub fn attempt(&self) -> u32 {
    self.step.attempt
  }

  pub fn logs(&self) -> &[String] {
    &self.step.logs
  }

  /// Append a line tagged with this attempt. Written with the next update.
  pub fn log(&mut self, line: &str) {
    let line = tag(self.step.attempt, line);
    self.step.logs.push(line);
  }

  pub async fn start(&mut self) -> Result<(), weft_store::Error> {
    self.step.status = StepStatus::Running;
    self.step.started_at = Some(Utc::now());
    self.store.update_step(&self.step).await
  }

  pub async fn succeed(&mut self, output: Value, degraded: bool) -> Result<(), weft_store::Error> {
    self.step.status = StepStatus::Success;
    self.step.output_data = Some(output);
    self.step.degraded = degraded;
    self.step.ended_at = Some(Utc::now());
    self.store.update_step(&self.step).await
  }

  pub async fn fail(&mut self, error: String) -> Result<(), weft_store::Error> {
    self.step.status = StepStatus::Failed;
    self.step.error_message = Some(error);
    self.step.ended_at = Some(Utc::now());
    self.store.update_step(&self.step).await
  }

  pub fn into_step(self) -> ExecutionStep {
    self.step
  }
}
