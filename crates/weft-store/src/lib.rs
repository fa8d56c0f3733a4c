//! Weft Store
//!
//! This crate provides the storage trait and implementations for workflow
//! definitions, instances and execution steps.
//!
//! The [`Store`] trait is the narrow contract the engine needs:
//! - Saving and loading definitions
//! - Creating instances and moving their status with compare-and-swap
//! - Appending and updating per-attempt step records
//!
//! Two implementations ship with the crate: [`MemoryStore`] (per-key locking
//! over `DashMap`) and [`SqliteStore`].

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{ExecutionStep, InstanceStatus, StatusTransition, StepStatus, WorkflowInstance};

use async_trait::async_trait;
use weft_config::WorkflowDefinition;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same key already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Schema migration failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for definitions, instances and execution steps.
#[async_trait]
pub trait Store: Send + Sync {
  /// Save (insert or replace) a workflow definition.
  async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), Error>;

  /// Load a workflow definition by ID.
  async fn load_definition(&self, workflow_id: &str) -> Result<WorkflowDefinition, Error>;

  /// Create a new instance.
  async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), Error>;

  /// Get an instance by ID.
  async fn get_instance(&self, instance_id: &str) -> Result<WorkflowInstance, Error>;

  /// List instances of a workflow, oldest first.
  async fn list_instances(&self, workflow_id: &str) -> Result<Vec<WorkflowInstance>, Error>;

  /// Atomically move an instance from `transition.from` to `transition.to`.
  ///
  /// Returns `false` without writing when the current status is not
  /// `transition.from`.
  async fn transition_instance(
    &self,
    instance_id: &str,
    transition: &StatusTransition,
  ) -> Result<bool, Error>;

  /// Append a new step record.
  async fn append_step(&self, step: &ExecutionStep) -> Result<(), Error>;

  /// Replace an existing step record.
  async fn update_step(&self, step: &ExecutionStep) -> Result<(), Error>;

  /// List step records of an instance in append order.
  async fn list_steps(&self, instance_id: &str) -> Result<Vec<ExecutionStep>, Error>;
}
