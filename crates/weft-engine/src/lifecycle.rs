//! Instance lifecycle.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use weft_component::ComponentRegistry;
use weft_config::WorkflowDefinition;
use weft_store::{ExecutionStep, InstanceStatus, StatusTransition, Store, WorkflowInstance};
use weft_workflow::{DefinitionError, Graph};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::executor::{Executor, RunOutcome, Services};
use crate::tracker::StepTracker;

const CANCELLED_BEFORE_START: &str = "skipped: instance cancelled before start";

#[derive(Clone)]
struct RunHandle {
  cancel: CancellationToken,
  done: watch::Receiver<Option<RunOutcome>>,
}

/// Creates, runs and cancels workflow instances.
///
/// ```ignore
/// let engine = WorkflowEngine::new(registry, Arc::new(MemoryStore::new()));
/// let instance = engine.create(&definition, json!({ "sheet_id": "abc" })).await?;
/// engine.execute(&instance.instance_id).await?;
///
/// // Poll, or wait for the terminal status.
/// let finished = engine.wait(&instance.instance_id).await?;
/// let steps = engine.logs(&instance.instance_id).await?;
/// ```
#[derive(Clone)]
pub struct WorkflowEngine {
  services: Services,
  runs: Arc<DashMap<String, RunHandle>>,
}

impl WorkflowEngine {
  pub fn new(registry: ComponentRegistry, store: Arc<dyn Store>) -> Self {
    Self {
      services: Services {
        registry: Arc::new(registry),
        store,
        notifier: Arc::new(NoopNotifier),
        config: EngineConfig::default(),
      },
      runs: Arc::new(DashMap::new()),
    }
  }

  pub fn with_config(mut self, config: EngineConfig) -> Self {
    self.services.config = config;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.services.notifier = notifier;
    self
  }

  pub fn registry(&self) -> &ComponentRegistry {
    &self.services.registry
  }

  pub fn config(&self) -> &EngineConfig {
    &self.services.config
  }

  /// Validate a definition against the graph rules and the registry.
  pub fn validate(&self, definition: &WorkflowDefinition) -> Result<Graph, EngineError> {
    let graph = Graph::build(definition)?;

    let registry = &self.services.registry;
    if let Some(node) = definition
      .nodes
      .iter()
      .find(|node| !registry.contains(&node.node_type))
    {
      return Err(
        DefinitionError::UnknownComponentType {
          node_id: node.id.clone(),
          node_type: node.node_type.clone(),
        }
        .into(),
      );
    }

    graph.check_entry_kinds(|node_type| registry.is_trigger(node_type))?;
    Ok(graph)
  }

  /// Validate and store a definition for later [`create_from_stored`](Self::create_from_stored).
  pub async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
    self.validate(definition)?;
    self.services.store.save_definition(definition).await?;
    Ok(())
  }

  /// Create an instance from a snapshot of `definition`.
  #[instrument(skip(self, definition, input_data), fields(workflow_id = %definition.workflow_id))]
  pub async fn create(
    &self,
    definition: &WorkflowDefinition,
    input_data: Value,
  ) -> Result<WorkflowInstance, EngineError> {
    if let Err(err) = self.validate(definition) {
      warn!(workflow_id = %definition.workflow_id, error = %err, "definition rejected");
      return Err(err);
    }

    let instance = WorkflowInstance {
      instance_id: uuid::Uuid::new_v4().to_string(),
      workflow_id: definition.workflow_id.clone(),
      definition: definition.clone(),
      status: InstanceStatus::Created,
      input_data,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
      error_message: None,
    };
    self.services.store.create_instance(&instance).await?;

    info!(
      instance_id = %instance.instance_id,
      workflow_id = %instance.workflow_id,
      "instance_created"
    );
    Ok(instance)
  }

  /// Create an instance from a stored definition.
  pub async fn create_from_stored(
    &self,
    workflow_id: &str,
    input_data: Value,
  ) -> Result<WorkflowInstance, EngineError> {
    let definition = self.services.store.load_definition(workflow_id).await?;
    self.create(&definition, input_data).await
  }

  /// Start a `created` instance. Returns once the run is under way.
  #[instrument(skip(self))]
  pub async fn execute(&self, instance_id: &str) -> Result<(), EngineError> {
    let instance = self.status(instance_id).await?;
    if instance.status != InstanceStatus::Created {
      return Err(invalid_state(&instance, "execute"));
    }
    let graph = self.validate(&instance.definition)?;

    let cancel = CancellationToken::new();
    let (done_tx, done_rx) = watch::channel(None);
    match self.runs.entry(instance_id.to_string()) {
      Entry::Occupied(_) => return Err(invalid_state(&instance, "execute")),
      Entry::Vacant(entry) => {
        entry.insert(RunHandle {
          cancel: cancel.clone(),
          done: done_rx,
        });
      }
    }

    // Registered before the CAS so a racing cancel always finds the handle.
    let start = StatusTransition::new(InstanceStatus::Created, InstanceStatus::Running);
    match self.services.store.transition_instance(instance_id, &start).await {
      Ok(true) => {}
      Ok(false) => {
        self.runs.remove(instance_id);
        let current = self.status(instance_id).await?;
        return Err(invalid_state(&current, "execute"));
      }
      Err(err) => {
        self.runs.remove(instance_id);
        return Err(err.into());
      }
    }

    let executor = Executor::new(&instance, graph, self.services.clone(), cancel);
    let runs = self.runs.clone();
    let id = instance_id.to_string();
    tokio::spawn(async move {
      let outcome = executor.run().await;
      let _ = done_tx.send(Some(outcome));
      runs.remove(&id);
    });

    Ok(())
  }

  /// Request cancellation.
  ///
  /// A running instance lets in-flight attempts finish and skips everything
  /// else. A created instance is cancelled on the spot.
  #[instrument(skip(self))]
  pub async fn cancel(&self, instance_id: &str) -> Result<(), EngineError> {
    let instance = self.status(instance_id).await?;
    match instance.status {
      InstanceStatus::Created => {
        let transition = StatusTransition::new(InstanceStatus::Created, InstanceStatus::Cancelled);
        if self
          .services
          .store
          .transition_instance(instance_id, &transition)
          .await?
        {
          self.skip_unstarted(&instance).await;
          return Ok(());
        }
        // Lost the race against execute.
        self.signal_cancel(instance_id).await
      }
      InstanceStatus::Running => self.signal_cancel(instance_id).await,
      _ => Err(invalid_state(&instance, "cancel")),
    }
  }

  async fn signal_cancel(&self, instance_id: &str) -> Result<(), EngineError> {
    let cancel = self.runs.get(instance_id).map(|run| run.cancel.clone());
    match cancel {
      Some(cancel) => {
        info!(instance_id = %instance_id, "cancellation requested");
        cancel.cancel();
        Ok(())
      }
      None => {
        let current = self.status(instance_id).await?;
        if current.status == InstanceStatus::Running {
          Err(EngineError::RunNotOwned {
            instance_id: instance_id.to_string(),
          })
        } else {
          Err(invalid_state(&current, "cancel"))
        }
      }
    }
  }

  async fn skip_unstarted(&self, instance: &WorkflowInstance) {
    let tracker = StepTracker::new(self.services.store.clone(), instance.instance_id.clone());
    let order: Vec<String> = match Graph::build(&instance.definition) {
      Ok(graph) => graph.topological_order().to_vec(),
      Err(_) => instance.definition.nodes.iter().map(|n| n.id.clone()).collect(),
    };

    for node_id in &order {
      let Some(node) = instance.definition.get_node(node_id) else {
        continue;
      };
      if let Err(err) = tracker.skip(node, 1, Vec::new(), CANCELLED_BEFORE_START).await {
        warn!(instance_id = %instance.instance_id, node_id = %node_id, error = %err, "failed to record skipped step");
      }
      self.services.notifier.notify(ExecutionEvent::StepSkipped {
        instance_id: instance.instance_id.clone(),
        node_id: node_id.clone(),
        reason: CANCELLED_BEFORE_START.to_string(),
      });
    }

    info!(
      instance_id = %instance.instance_id,
      status = %InstanceStatus::Cancelled,
      "instance_finished"
    );
    self.services.notifier.notify(ExecutionEvent::InstanceFinished {
      instance_id: instance.instance_id.clone(),
      status: InstanceStatus::Cancelled,
      error: None,
    });
  }

  /// Current instance record.
  pub async fn status(&self, instance_id: &str) -> Result<WorkflowInstance, EngineError> {
    self
      .services
      .store
      .get_instance(instance_id)
      .await
      .map_err(|err| EngineError::from_lookup(instance_id, err))
  }

  /// Step records of an instance, in the order they were created.
  pub async fn logs(&self, instance_id: &str) -> Result<Vec<ExecutionStep>, EngineError> {
    self.status(instance_id).await?;
    Ok(self.services.store.list_steps(instance_id).await?)
  }

  /// Instances of a workflow, oldest first.
  pub async fn instances(&self, workflow_id: &str) -> Result<Vec<WorkflowInstance>, EngineError> {
    Ok(self.services.store.list_instances(workflow_id).await?)
  }

  /// Wait until a started instance reaches a terminal status.
  pub async fn wait(&self, instance_id: &str) -> Result<WorkflowInstance, EngineError> {
    let done = self.runs.get(instance_id).map(|run| run.done.clone());
    if let Some(mut done) = done {
      let _ = done.wait_for(|outcome| outcome.is_some()).await;
    }

    let instance = self.status(instance_id).await?;
    match instance.status {
      InstanceStatus::Created => Err(invalid_state(&instance, "wait for")),
      InstanceStatus::Running => Err(EngineError::RunNotOwned {
        instance_id: instance_id.to_string(),
      }),
      _ => Ok(instance),
    }
  }
}

fn invalid_state(instance: &WorkflowInstance, operation: &'static str) -> EngineError {
  EngineError::InvalidState {
    instance_id: instance.instance_id.clone(),
    status: instance.status,
    operation,
  }
}
