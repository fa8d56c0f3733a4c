//! Scripted components and fixtures shared by the scenario tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use weft_component::builtin::register_builtins;
use weft_component::{
  Component, ComponentKind, ComponentMetadata, ComponentResult, ExecutionContext, RegistryBuilder,
};
use weft_config::{Edge, NodeDef, RetryPolicy, TriggerPolicy, WorkflowDefinition};
use weft_engine::{EngineError, WorkflowEngine};
use weft_store::{ExecutionStep, StepStatus, WorkflowInstance};

/// Succeeds after `delay`, echoing its resolved input.
///
/// Tracks how many copies run at once through `active`/`peak`.
#[derive(Clone, Default)]
pub struct Recorder {
  pub delay: Duration,
  pub active: Arc<AtomicUsize>,
  pub peak: Arc<AtomicUsize>,
}

impl Recorder {
  pub fn with_delay(delay: Duration) -> Self {
    Self {
      delay,
      ..Self::default()
    }
  }
}

#[async_trait]
impl Component for Recorder {
  fn metadata(&self) -> ComponentMetadata {
    ComponentMetadata::new("Recorder", "Echoes its input", ComponentKind::Transform)
  }

  async fn execute(&self, ctx: ExecutionContext) -> ComponentResult {
    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(self.delay).await;
    self.active.fetch_sub(1, Ordering::SeqCst);

    ComponentResult::success(json!({
      "node": ctx.node_id,
      "attempt": ctx.attempt,
      "input": ctx.input_data,
    }))
    .with_log(format!("recorded {}", ctx.node_id))
  }
}

/// Fails transiently `failures` times, then succeeds.
#[derive(Clone)]
pub struct Flaky {
  pub failures: Arc<AtomicU32>,
}

impl Flaky {
  pub fn new(failures: u32) -> Self {
    Self {
      failures: Arc::new(AtomicU32::new(failures)),
    }
  }
}

#[async_trait]
impl Component for Flaky {
  fn metadata(&self) -> ComponentMetadata {
    ComponentMetadata::new("Flaky", "Fails transiently a few times", ComponentKind::Transform)
  }

  async fn execute(&self, ctx: ExecutionContext) -> ComponentResult {
    let left = self.failures.load(Ordering::SeqCst);
    if left > 0 {
      self.failures.store(left - 1, Ordering::SeqCst);
      return ComponentResult::transient("upstream timeout")
        .with_log(format!("attempt {} hit a timeout", ctx.attempt));
    }
    ComponentResult::success(json!({ "summary": "processed" }))
  }
}

/// Always fails with a transient error.
#[derive(Clone, Default)]
pub struct AlwaysTransient;

#[async_trait]
impl Component for AlwaysTransient {
  fn metadata(&self) -> ComponentMetadata {
    ComponentMetadata::new("Always transient", "Never recovers", ComponentKind::Transform)
  }

  async fn execute(&self, _ctx: ExecutionContext) -> ComponentResult {
    ComponentResult::transient("service unavailable")
  }
}

/// Always fails with a fatal error.
#[derive(Clone, Default)]
pub struct Fatal;

#[async_trait]
impl Component for Fatal {
  fn metadata(&self) -> ComponentMetadata {
    ComponentMetadata::new("Fatal", "Fails for good", ComponentKind::Transform)
  }

  async fn execute(&self, _ctx: ExecutionContext) -> ComponentResult {
    ComponentResult::fatal("invalid configuration")
  }
}

/// Returns a best-effort result marked degraded.
#[derive(Clone, Default)]
pub struct Degraded;

#[async_trait]
impl Component for Degraded {
  fn metadata(&self) -> ComponentMetadata {
    ComponentMetadata::new("Degraded", "Falls back to a canned answer", ComponentKind::Transform)
  }

  async fn execute(&self, _ctx: ExecutionContext) -> ComponentResult {
    ComponentResult::success(json!({ "summary": "fallback summary" }))
      .degraded()
      .with_log("provider unreachable, using fallback")
  }
}

/// Panics instead of returning a result.
#[derive(Clone, Default)]
pub struct Panicker;

#[async_trait]
impl Component for Panicker {
  fn metadata(&self) -> ComponentMetadata {
    ComponentMetadata::new("Panicker", "Breaks the component contract", ComponentKind::Sink)
  }

  async fn execute(&self, _ctx: ExecutionContext) -> ComponentResult {
    panic!("sheet client exploded");
  }
}

/// A registry with the built-ins plus the scripted components that need no
/// shared state.
pub fn registry_builder() -> RegistryBuilder {
  let mut builder = RegistryBuilder::new();
  register_builtins(&mut builder).unwrap();
  builder
    .register("recorder", Recorder::default)
    .unwrap()
    .register("always_transient", AlwaysTransient::default)
    .unwrap()
    .register("fatal", Fatal::default)
    .unwrap()
    .register("degraded", Degraded::default)
    .unwrap()
    .register("panicker", Panicker::default)
    .unwrap();
  builder
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
  RetryPolicy::new(max_attempts, Duration::from_millis(5), 2.0)
}

pub fn definition(nodes: Vec<NodeDef>, edges: &[(&str, &str)]) -> WorkflowDefinition {
  WorkflowDefinition {
    workflow_id: "scenario".to_string(),
    name: "Scenario".to_string(),
    trigger_policy: TriggerPolicy::Single,
    nodes,
    edges: edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
  }
}

/// Create, execute and wait for an instance.
pub async fn run(
  engine: &WorkflowEngine,
  definition: &WorkflowDefinition,
  input: serde_json::Value,
) -> Result<(WorkflowInstance, Vec<ExecutionStep>), EngineError> {
  let instance = engine.create(definition, input).await?;
  engine.execute(&instance.instance_id).await?;
  let finished = tokio::time::timeout(Duration::from_secs(10), engine.wait(&instance.instance_id))
    .await
    .expect("instance did not finish in time")?;
  let steps = engine.logs(&instance.instance_id).await?;
  Ok((finished, steps))
}

pub fn steps_for<'a>(steps: &'a [ExecutionStep], node_id: &str) -> Vec<&'a ExecutionStep> {
  steps.iter().filter(|s| s.node_id == node_id).collect()
}

pub fn statuses(steps: &[&ExecutionStep]) -> Vec<StepStatus> {
  steps.iter().map(|s| s.status).collect()
}
