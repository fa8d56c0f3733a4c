//! The decision loop.
//!
//! One loop per instance owns every scheduling decision: eligibility,
//! retries, skip-cascade, cancellation and the final status transition.
//! Component calls run in their own tasks and report back over a channel, so
//! no scheduling state is shared between tasks.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use weft_component::{ComponentError, ComponentRegistry, ComponentResult, ExecutionContext};
use weft_config::{NodeDef, RetryPolicy};
use weft_store::{InstanceStatus, StatusTransition, Store, WorkflowInstance};
use weft_workflow::Graph;

use crate::config::EngineConfig;
use crate::context::ContextBuilder;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::tracker::{StepHandle, StepTracker};

const CANCELLED_REASON: &str = "skipped: instance cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
  /// Some predecessor has not succeeded yet.
  Waiting,
  /// Eligible, waiting for a free slot.
  Ready,
  Running,
  /// Failed transiently; the next attempt is due after the backoff delay.
  RetryWait,
  Succeeded,
  Failed,
  Skipped,
}

struct NodeRun {
  def: NodeDef,
  retry: RetryPolicy,
  state: NodeState,
  /// Attempts dispatched so far.
  attempts: u32,
  /// Log lines of every attempt so far.
  logs: Vec<String>,
  output: Option<Value>,
}

enum Signal {
  Finished(AttemptReport),
  RetryDue { index: usize },
}

struct AttemptReport {
  index: usize,
  attempt: u32,
  /// Output and degraded flag on success.
  outcome: Result<(Value, bool), ComponentError>,
  logs: Vec<String>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
  pub status: InstanceStatus,
  pub error_message: Option<String>,
}

/// Shared services an executor runs with.
#[derive(Clone)]
pub(crate) struct Services {
  pub registry: Arc<ComponentRegistry>,
  pub store: Arc<dyn Store>,
  pub notifier: Arc<dyn ExecutionNotifier>,
  pub config: EngineConfig,
}

pub(crate) struct Executor {
  instance_id: String,
  workflow_id: String,
  services: Services,
  cancel: CancellationToken,
  tracker: StepTracker,
  contexts: ContextBuilder,
  graph: Graph,
  /// Indexed by position in the topological order.
  runs: Vec<NodeRun>,
  index: HashMap<String, usize>,
  upstream: Vec<Vec<usize>>,
  downstream: Vec<Vec<usize>>,
  /// Ready nodes, dispatched in topological order.
  ready: BTreeSet<usize>,
  in_flight: usize,
  retry_waiting: usize,
  first_failure: Option<String>,
}

impl Executor {
  /// Prepare a run of `instance`, whose definition `graph` was built from.
  pub(crate) fn new(
    instance: &WorkflowInstance,
    graph: Graph,
    services: Services,
    cancel: CancellationToken,
  ) -> Self {
    let defs: HashMap<&str, &NodeDef> = instance
      .definition
      .nodes
      .iter()
      .map(|node| (node.id.as_str(), node))
      .collect();

    let order = graph.topological_order();
    let index: HashMap<String, usize> = order
      .iter()
      .enumerate()
      .map(|(i, id)| (id.clone(), i))
      .collect();

    let runs: Vec<NodeRun> = order
      .iter()
      .filter_map(|id| defs.get(id.as_str()))
      .map(|def| NodeRun {
        def: (*def).clone(),
        retry: def
          .retry
          .clone()
          .unwrap_or_else(|| services.registry.retry_policy(&def.node_type).clone()),
        state: NodeState::Waiting,
        attempts: 0,
        logs: Vec::new(),
        output: None,
      })
      .collect();

    let to_indices = |ids: &[String]| -> Vec<usize> {
      ids.iter().filter_map(|id| index.get(id).copied()).collect()
    };
    let upstream = order.iter().map(|id| to_indices(graph.upstream(id))).collect();
    let downstream = order.iter().map(|id| to_indices(graph.downstream(id))).collect();

    Self {
      instance_id: instance.instance_id.clone(),
      workflow_id: instance.workflow_id.clone(),
      tracker: StepTracker::new(services.store.clone(), instance.instance_id.clone()),
      contexts: ContextBuilder::new(
        instance.instance_id.clone(),
        instance.input_data.clone(),
        cancel.clone(),
      ),
      services,
      cancel,
      graph,
      runs,
      index,
      upstream,
      downstream,
      ready: BTreeSet::new(),
      in_flight: 0,
      retry_waiting: 0,
      first_failure: None,
    }
  }

  fn notify(&self, event: ExecutionEvent) {
    self.services.notifier.notify(event);
  }

  /// Drive the instance to a terminal status.
  ///
  /// The instance must already be `running`.
  #[instrument(
    name = "instance_run",
    skip(self),
    fields(instance_id = %self.instance_id, workflow_id = %self.workflow_id)
  )]
  pub(crate) async fn run(mut self) -> RunOutcome {
    info!(
      instance_id = %self.instance_id,
      workflow_id = %self.workflow_id,
      nodes = self.runs.len(),
      "instance_started"
    );
    self.notify(ExecutionEvent::InstanceStarted {
      instance_id: self.instance_id.clone(),
      workflow_id: self.workflow_id.clone(),
    });

    for i in 0..self.runs.len() {
      if self.upstream[i].is_empty() {
        self.runs[i].state = NodeState::Ready;
        self.ready.insert(i);
      }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = self.cancel.clone();
    let mut cancel_applied = false;

    loop {
      if !cancel_applied && cancel.is_cancelled() {
        cancel_applied = true;
        self.apply_cancellation().await;
      }
      if !cancel_applied {
        self.dispatch_ready(&tx).await;
      }

      if self.in_flight == 0 && self.retry_waiting == 0 && self.ready.is_empty() {
        break;
      }

      tokio::select! {
        _ = cancel.cancelled(), if !cancel_applied => {}
        signal = rx.recv() => match signal {
          Some(Signal::Finished(report)) => self.on_finished(report, &tx).await,
          Some(Signal::RetryDue { index }) => self.on_retry_due(index),
          None => break,
        }
      }
    }

    self.finish().await
  }

  async fn dispatch_ready(&mut self, tx: &mpsc::UnboundedSender<Signal>) {
    while self.in_flight < self.services.config.concurrency() {
      let Some(i) = self.ready.pop_first() else {
        break;
      };
      self.dispatch(i, tx).await;
    }
  }

  async fn dispatch(&mut self, i: usize, tx: &mpsc::UnboundedSender<Signal>) {
    let attempt = self.runs[i].attempts + 1;
    self.runs[i].attempts = attempt;
    self.runs[i].state = NodeState::Running;
    self.in_flight += 1;

    let predecessors: Vec<(String, Value)> = self.upstream[i]
      .iter()
      .filter_map(|&p| {
        let run = &self.runs[p];
        run.output.clone().map(|output| (run.def.id.clone(), output))
      })
      .collect();

    let node = self.runs[i].def.clone();
    let input = self.contexts.build(&node, attempt, &predecessors);

    let mut logs = self.runs[i].logs.clone();
    for warning in &input.warnings {
      warn!(
        instance_id = %self.instance_id,
        node_id = %node.id,
        attempt,
        warning = %warning,
        "unresolved placeholder"
      );
      logs.push(crate::tracker::tag(attempt, warning));
    }

    info!(
      instance_id = %self.instance_id,
      node_id = %node.id,
      node_type = %node.node_type,
      attempt,
      "step_dispatched"
    );

    let snapshot = Value::Object(input.context.input_data.clone());
    match self.tracker.begin(&node, attempt, snapshot, logs.clone()).await {
      Ok(handle) => {
        let task = AttemptTask {
          index: i,
          handle,
          last_attempt: !self.runs[i].retry.should_retry(attempt),
          context: input.context,
          node_type: node.node_type.clone(),
          timeout: node
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.services.config.step_timeout()),
          registry: self.services.registry.clone(),
          notifier: self.services.notifier.clone(),
        };
        let tx = tx.clone();
        tokio::spawn(async move {
          let report = task.run().await;
          let _ = tx.send(Signal::Finished(report));
        });
      }
      Err(err) => {
        error!(
          instance_id = %self.instance_id,
          node_id = %node.id,
          error = %err,
          "failed to record step"
        );
        let _ = tx.send(Signal::Finished(AttemptReport {
          index: i,
          attempt,
          outcome: Err(ComponentError::fatal(format!("failed to record step: {}", err))),
          logs,
        }));
      }
    }
  }

  async fn on_finished(&mut self, report: AttemptReport, tx: &mpsc::UnboundedSender<Signal>) {
    let i = report.index;
    let attempt = report.attempt;
    self.in_flight -= 1;
    self.runs[i].logs = report.logs;
    let node_id = self.runs[i].def.id.clone();

    match report.outcome {
      Ok((output, degraded)) => {
        info!(
          instance_id = %self.instance_id,
          node_id = %node_id,
          attempt,
          degraded,
          "step_completed"
        );
        self.notify(ExecutionEvent::StepCompleted {
          instance_id: self.instance_id.clone(),
          node_id,
          attempt,
          output: output.clone(),
          degraded,
        });
        self.runs[i].output = Some(output);
        self.runs[i].state = NodeState::Succeeded;
        self.release_children(i);
      }
      Err(err) => {
        self.notify(ExecutionEvent::StepFailed {
          instance_id: self.instance_id.clone(),
          node_id: node_id.clone(),
          attempt,
          error: err.to_string(),
        });

        let retryable = err.is_transient() && self.runs[i].retry.should_retry(attempt);
        if retryable && self.cancel.is_cancelled() {
          // The next attempt would be a new dispatch.
          self.skip_node(i, CANCELLED_REASON.to_string()).await;
        } else if retryable {
          let delay = self.runs[i].retry.delay_after(attempt);
          warn!(
            instance_id = %self.instance_id,
            node_id = %node_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "step_retry_scheduled"
          );
          self.notify(ExecutionEvent::StepRetryScheduled {
            instance_id: self.instance_id.clone(),
            node_id,
            next_attempt: attempt + 1,
            delay_ms: delay.as_millis() as u64,
          });
          self.runs[i].state = NodeState::RetryWait;
          self.retry_waiting += 1;
          let tx = tx.clone();
          tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Signal::RetryDue { index: i });
          });
        } else {
          error!(
            instance_id = %self.instance_id,
            node_id = %node_id,
            attempt,
            error = %err,
            "step_failed"
          );
          self.runs[i].state = NodeState::Failed;
          if self.first_failure.is_none() {
            self.first_failure = Some(format!(
              "node '{}' failed after {} attempt(s): {}",
              node_id, attempt, err
            ));
          }
          self.cascade_skip(i).await;
        }
      }
    }
  }

  fn on_retry_due(&mut self, i: usize) {
    // Cancellation may have skipped the node in the meantime.
    if self.runs[i].state != NodeState::RetryWait {
      return;
    }
    self.retry_waiting -= 1;
    self.runs[i].state = NodeState::Ready;
    self.ready.insert(i);
  }

  /// Make children eligible once all of their predecessors succeeded.
  fn release_children(&mut self, i: usize) {
    for &child in &self.downstream[i] {
      if self.runs[child].state != NodeState::Waiting {
        continue;
      }
      let all_succeeded = self.upstream[child]
        .iter()
        .all(|&p| self.runs[p].state == NodeState::Succeeded);
      if all_succeeded {
        self.runs[child].state = NodeState::Ready;
        self.ready.insert(child);
      }
    }
  }

  /// Skip every waiting descendant of a failed node.
  async fn cascade_skip(&mut self, failed: usize) {
    let mut descendants: Vec<usize> = self
      .graph
      .descendants(&self.runs[failed].def.id)
      .iter()
      .filter_map(|id| self.index.get(id).copied())
      .collect();
    descendants.sort_unstable();

    for d in descendants {
      if self.runs[d].state != NodeState::Waiting {
        continue;
      }
      let cause = self.upstream[d].iter().find_map(|&p| match self.runs[p].state {
        NodeState::Failed => Some(format!(
          "skipped: upstream node '{}' failed",
          self.runs[p].def.id
        )),
        NodeState::Skipped => Some(format!(
          "skipped: upstream node '{}' was skipped",
          self.runs[p].def.id
        )),
        _ => None,
      });
      if let Some(reason) = cause {
        self.skip_node(d, reason).await;
      }
    }
  }

  async fn apply_cancellation(&mut self) {
    warn!(instance_id = %self.instance_id, "instance cancellation requested");
    self.ready.clear();
    for i in 0..self.runs.len() {
      match self.runs[i].state {
        NodeState::Waiting | NodeState::Ready => {}
        NodeState::RetryWait => self.retry_waiting -= 1,
        _ => continue,
      }
      self.skip_node(i, CANCELLED_REASON.to_string()).await;
    }
  }

  async fn skip_node(&mut self, i: usize, reason: String) {
    self.runs[i].state = NodeState::Skipped;
    let attempt = self.runs[i].attempts + 1;
    let node = &self.runs[i].def;

    info!(
      instance_id = %self.instance_id,
      node_id = %node.id,
      reason = %reason,
      "step_skipped"
    );
    self.notify(ExecutionEvent::StepSkipped {
      instance_id: self.instance_id.clone(),
      node_id: node.id.clone(),
      reason: reason.clone(),
    });

    let logs = self.runs[i].logs.clone();
    if let Err(err) = self.tracker.skip(node, attempt, logs, &reason).await {
      error!(
        instance_id = %self.instance_id,
        node_id = %node.id,
        error = %err,
        "failed to record skipped step"
      );
    }
  }

  async fn finish(self) -> RunOutcome {
    // A requested cancellation wins even when nothing was left to skip.
    let status = if self.cancel.is_cancelled() {
      InstanceStatus::Cancelled
    } else if self.first_failure.is_some() {
      InstanceStatus::Failed
    } else {
      InstanceStatus::Completed
    };
    let error_message = match status {
      InstanceStatus::Failed => self.first_failure.clone(),
      _ => None,
    };

    let mut transition = StatusTransition::new(InstanceStatus::Running, status);
    if let Some(message) = &error_message {
      transition = transition.with_error(message.clone());
    }

    match self
      .services
      .store
      .transition_instance(&self.instance_id, &transition)
      .await
    {
      Ok(true) => {}
      Ok(false) => warn!(
        instance_id = %self.instance_id,
        status = %status,
        "instance is no longer running, final status not written"
      ),
      Err(err) => error!(
        instance_id = %self.instance_id,
        error = %err,
        "failed to write final instance status"
      ),
    }

    match &error_message {
      Some(message) => error!(
        instance_id = %self.instance_id,
        status = %status,
        error = %message,
        "instance_finished"
      ),
      None => info!(
        instance_id = %self.instance_id,
        status = %status,
        "instance_finished"
      ),
    }
    self.notify(ExecutionEvent::InstanceFinished {
      instance_id: self.instance_id.clone(),
      status,
      error: error_message.clone(),
    });

    RunOutcome {
      status,
      error_message,
    }
  }
}

/// One attempt of one node, running off the decision loop.
struct AttemptTask {
  index: usize,
  handle: StepHandle,
  /// No retry follows this attempt.
  last_attempt: bool,
  context: ExecutionContext,
  node_type: String,
  timeout: Option<Duration>,
  registry: Arc<ComponentRegistry>,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl AttemptTask {
  #[instrument(
    name = "step_attempt",
    skip(self),
    fields(
      instance_id = %self.context.instance_id,
      node_id = %self.context.node_id,
      attempt = self.context.attempt,
    )
  )]
  async fn run(self) -> AttemptReport {
    let AttemptTask {
      index,
      mut handle,
      last_attempt,
      context,
      node_type,
      timeout,
      registry,
      notifier,
    } = self;
    let instance_id = context.instance_id.clone();
    let node_id = context.node_id.clone();
    let attempt = handle.attempt();

    if let Err(err) = handle.start().await {
      error!(instance_id = %instance_id, node_id = %node_id, error = %err, "failed to record step start");
    }
    notifier.notify(ExecutionEvent::StepStarted {
      instance_id: instance_id.clone(),
      node_id: node_id.clone(),
      attempt,
    });

    let started = Instant::now();
    let result = execute_component(&registry, &node_type, context, timeout).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    for line in &result.logs {
      handle.log(line);
    }

    let outcome = match result.failure_error() {
      None => {
        if result.degraded {
          handle.log("degraded result");
        }
        Ok((Value::Object(result.output_data), result.degraded))
      }
      Some(err) => {
        let err = if last_attempt && err.is_transient() {
          ComponentError::fatal(format!(
            "retries exhausted after {} attempt(s): {}",
            attempt, err.message
          ))
        } else {
          err
        };
        handle.log(&format!("error: {}", err));
        Err(err)
      }
    };

    let written = match &outcome {
      Ok((output, degraded)) => handle.succeed(output.clone(), *degraded).await,
      Err(err) => handle.fail(err.to_string()).await,
    };
    if let Err(err) = written {
      error!(instance_id = %instance_id, node_id = %node_id, error = %err, "failed to record step result");
    }

    info!(
      instance_id = %instance_id,
      node_id = %node_id,
      attempt,
      elapsed_ms,
      success = outcome.is_ok(),
      "step attempt finished"
    );

    AttemptReport {
      index,
      attempt,
      outcome,
      logs: handle.into_step().logs,
    }
  }
}

/// Run a component with panic isolation and an optional timeout.
///
/// The component runs in its own task so a panic surfaces as a `JoinError`
/// instead of tearing down the attempt task.
async fn execute_component(
  registry: &ComponentRegistry,
  node_type: &str,
  context: ExecutionContext,
  timeout: Option<Duration>,
) -> ComponentResult {
  let component = match registry.instantiate(node_type) {
    Ok(component) => component,
    Err(err) => return ComponentResult::fatal(err.to_string()),
  };

  let mut join = tokio::spawn(async move { component.execute(context).await });

  let joined = match timeout {
    Some(limit) => match tokio::time::timeout(limit, &mut join).await {
      Ok(joined) => joined,
      Err(_) => {
        join.abort();
        return ComponentResult::transient(format!(
          "step timed out after {} ms",
          limit.as_millis()
        ));
      }
    },
    None => join.await,
  };

  match joined {
    Ok(result) => result,
    Err(err) if err.is_panic() => {
      let payload = err.into_panic();
      let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
      ComponentResult::fatal(format!("component panicked: {}", message))
    }
    Err(err) => ComponentResult::fatal(format!("component task failed: {}", err)),
  }
}
