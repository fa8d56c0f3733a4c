use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use weft_config::WorkflowDefinition;

use crate::{Error, ExecutionStep, StatusTransition, Store, WorkflowInstance};

/// In-process store.
///
/// Each record sits behind its own shard lock, so a status CAS on one
/// instance never blocks writes to another.
#[derive(Debug, Default)]
pub struct MemoryStore {
  definitions: DashMap<String, WorkflowDefinition>,
  instances: DashMap<String, WorkflowInstance>,
  steps: DashMap<String, ExecutionStep>,
  instance_steps: DashMap<String, Vec<String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), Error> {
    self
      .definitions
      .insert(definition.workflow_id.clone(), definition.clone());
    Ok(())
  }

  async fn load_definition(&self, workflow_id: &str) -> Result<WorkflowDefinition, Error> {
    self
      .definitions
      .get(workflow_id)
      .map(|entry| entry.value().clone())
      .ok_or_else(|| Error::NotFound(format!("workflow {}", workflow_id)))
  }

  async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), Error> {
    match self.instances.entry(instance.instance_id.clone()) {
      Entry::Occupied(_) => Err(Error::AlreadyExists(format!(
        "instance {}",
        instance.instance_id
      ))),
      Entry::Vacant(entry) => {
        entry.insert(instance.clone());
        Ok(())
      }
    }
  }

  async fn get_instance(&self, instance_id: &str) -> Result<WorkflowInstance, Error> {
    self
      .instances
      .get(instance_id)
      .map(|entry| entry.value().clone())
      .ok_or_else(|| Error::NotFound(format!("instance {}", instance_id)))
  }

  async fn list_instances(&self, workflow_id: &str) -> Result<Vec<WorkflowInstance>, Error> {
    let mut instances: Vec<WorkflowInstance> = self
      .instances
      .iter()
      .filter(|entry| entry.workflow_id == workflow_id)
      .map(|entry| entry.value().clone())
      .collect();
    instances.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(instances)
  }

  async fn transition_instance(
    &self,
    instance_id: &str,
    transition: &StatusTransition,
  ) -> Result<bool, Error> {
    let mut entry = self
      .instances
      .get_mut(instance_id)
      .ok_or_else(|| Error::NotFound(format!("instance {}", instance_id)))?;
    Ok(transition.apply(entry.value_mut()))
  }

  async fn append_step(&self, step: &ExecutionStep) -> Result<(), Error> {
    if self.steps.contains_key(&step.step_id) {
      return Err(Error::AlreadyExists(format!("step {}", step.step_id)));
    }
    // Index first so that list_steps never sees a step without its slot.
    self
      .instance_steps
      .entry(step.instance_id.clone())
      .or_default()
      .push(step.step_id.clone());
    self.steps.insert(step.step_id.clone(), step.clone());
    Ok(())
  }

  async fn update_step(&self, step: &ExecutionStep) -> Result<(), Error> {
    let mut entry = self
      .steps
      .get_mut(&step.step_id)
      .ok_or_else(|| Error::NotFound(format!("step {}", step.step_id)))?;
    *entry.value_mut() = step.clone();
    Ok(())
  }

  async fn list_steps(&self, instance_id: &str) -> Result<Vec<ExecutionStep>, Error> {
    let ids = self
      .instance_steps
      .get(instance_id)
      .map(|entry| entry.value().clone())
      .unwrap_or_default();
    Ok(
      ids
        .iter()
        .filter_map(|id| self.steps.get(id).map(|entry| entry.value().clone()))
        .collect(),
    )
  }
}
