use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use weft_config::WorkflowDefinition;

use async_trait::async_trait;

use crate::{
  Error, ExecutionStep, InstanceStatus, StatusTransition, StepStatus, Store, WorkflowInstance,
};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and run migrations.
  pub async fn open(path: &Path) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(4)
      .connect_with(options)
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[derive(FromRow)]
struct DefinitionRow {
  definition: Json<WorkflowDefinition>,
}

#[derive(FromRow)]
struct InstanceRow {
  instance_id: String,
  workflow_id: String,
  definition: Json<WorkflowDefinition>,
  status: InstanceStatus,
  input_data: Json<serde_json::Value>,
  created_at: DateTime<Utc>,
  started_at: Option<DateTime<Utc>>,
  completed_at: Option<DateTime<Utc>>,
  error_message: Option<String>,
}

impl From<InstanceRow> for WorkflowInstance {
  fn from(row: InstanceRow) -> Self {
    Self {
      instance_id: row.instance_id,
      workflow_id: row.workflow_id,
      definition: row.definition.0,
      status: row.status,
      input_data: row.input_data.0,
      created_at: row.created_at,
      started_at: row.started_at,
      completed_at: row.completed_at,
      error_message: row.error_message,
    }
  }
}

#[derive(FromRow)]
struct StepRow {
  step_id: String,
  instance_id: String,
  node_id: String,
  node_type: String,
  attempt: u32,
  status: StepStatus,
  input_data: Json<serde_json::Value>,
  output_data: Option<Json<serde_json::Value>>,
  error_message: Option<String>,
  logs: Json<Vec<String>>,
  degraded: bool,
  created_at: DateTime<Utc>,
  started_at: Option<DateTime<Utc>>,
  ended_at: Option<DateTime<Utc>>,
}

impl From<StepRow> for ExecutionStep {
  fn from(row: StepRow) -> Self {
    Self {
      step_id: row.step_id,
      instance_id: row.instance_id,
      node_id: row.node_id,
      node_type: row.node_type,
      attempt: row.attempt,
      status: row.status,
      input_data: row.input_data.0,
      output_data: row.output_data.map(|json| json.0),
      error_message: row.error_message,
      logs: row.logs.0,
      degraded: row.degraded,
      created_at: row.created_at,
      started_at: row.started_at,
      ended_at: row.ended_at,
    }
  }
}

const INSTANCE_COLUMNS: &str = "instance_id, workflow_id, definition, status, input_data, \
   created_at, started_at, completed_at, error_message";

const STEP_COLUMNS: &str = "step_id, instance_id, node_id, node_type, attempt, status, \
   input_data, output_data, error_message, logs, degraded, created_at, started_at, ended_at";

fn map_unique(err: sqlx::Error, what: String) -> Error {
  let unique = err
    .as_database_error()
    .is_some_and(|db| db.is_unique_violation());
  if unique {
    Error::AlreadyExists(what)
  } else {
    Error::Database(err)
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO workflow_definitions (workflow_id, name, definition, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (workflow_id) DO UPDATE
            SET name = excluded.name, definition = excluded.definition, updated_at = excluded.updated_at
            "#,
    )
    .bind(&definition.workflow_id)
    .bind(&definition.name)
    .bind(Json(definition))
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn load_definition(&self, workflow_id: &str) -> Result<WorkflowDefinition, Error> {
    let row: Option<DefinitionRow> = sqlx::query_as(
      r#"
            SELECT definition
            FROM workflow_definitions
            WHERE workflow_id = ?
            "#,
    )
    .bind(workflow_id)
    .fetch_optional(&self.pool)
    .await?;

    row
      .map(|row| row.definition.0)
      .ok_or_else(|| Error::NotFound(format!("workflow {}", workflow_id)))
  }

  async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), Error> {
    sqlx::query(&format!(
      "INSERT INTO workflow_instances ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
      INSTANCE_COLUMNS
    ))
    .bind(&instance.instance_id)
    .bind(&instance.workflow_id)
    .bind(Json(&instance.definition))
    .bind(instance.status)
    .bind(Json(&instance.input_data))
    .bind(instance.created_at)
    .bind(instance.started_at)
    .bind(instance.completed_at)
    .bind(&instance.error_message)
    .execute(&self.pool)
    .await
    .map_err(|err| map_unique(err, format!("instance {}", instance.instance_id)))?;

    Ok(())
  }

  async fn get_instance(&self, instance_id: &str) -> Result<WorkflowInstance, Error> {
    let row: Option<InstanceRow> = sqlx::query_as(&format!(
      "SELECT {} FROM workflow_instances WHERE instance_id = ?",
      INSTANCE_COLUMNS
    ))
    .bind(instance_id)
    .fetch_optional(&self.pool)
    .await?;

    row
      .map(WorkflowInstance::from)
      .ok_or_else(|| Error::NotFound(format!("instance {}", instance_id)))
  }

  async fn list_instances(&self, workflow_id: &str) -> Result<Vec<WorkflowInstance>, Error> {
    let rows: Vec<InstanceRow> = sqlx::query_as(&format!(
      "SELECT {} FROM workflow_instances WHERE workflow_id = ? ORDER BY created_at ASC",
      INSTANCE_COLUMNS
    ))
    .bind(workflow_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(WorkflowInstance::from).collect())
  }

  async fn transition_instance(
    &self,
    instance_id: &str,
    transition: &StatusTransition,
  ) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
            UPDATE workflow_instances
            SET status = ?,
                started_at = COALESCE(?, started_at),
                completed_at = COALESCE(?, completed_at),
                error_message = COALESCE(?, error_message)
            WHERE instance_id = ? AND status = ?
            "#,
    )
    .bind(transition.to)
    .bind(transition.started_at())
    .bind(transition.completed_at())
    .bind(&transition.error_message)
    .bind(instance_id)
    .bind(transition.from)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 1 {
      return Ok(true);
    }

    // Distinguish a lost race from a missing instance.
    self.get_instance(instance_id).await?;
    Ok(false)
  }

  async fn append_step(&self, step: &ExecutionStep) -> Result<(), Error> {
    sqlx::query(&format!(
      "INSERT INTO execution_steps ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
      STEP_COLUMNS
    ))
    .bind(&step.step_id)
    .bind(&step.instance_id)
    .bind(&step.node_id)
    .bind(&step.node_type)
    .bind(step.attempt)
    .bind(step.status)
    .bind(Json(&step.input_data))
    .bind(step.output_data.as_ref().map(Json))
    .bind(&step.error_message)
    .bind(Json(&step.logs))
    .bind(step.degraded)
    .bind(step.created_at)
    .bind(step.started_at)
    .bind(step.ended_at)
    .execute(&self.pool)
    .await
    .map_err(|err| map_unique(err, format!("step {}", step.step_id)))?;

    Ok(())
  }

  async fn update_step(&self, step: &ExecutionStep) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            UPDATE execution_steps
            SET status = ?, input_data = ?, output_data = ?, error_message = ?, logs = ?,
                degraded = ?, started_at = ?, ended_at = ?
            WHERE step_id = ?
            "#,
    )
    .bind(step.status)
    .bind(Json(&step.input_data))
    .bind(step.output_data.as_ref().map(Json))
    .bind(&step.error_message)
    .bind(Json(&step.logs))
    .bind(step.degraded)
    .bind(step.started_at)
    .bind(step.ended_at)
    .bind(&step.step_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("step {}", step.step_id)));
    }
    Ok(())
  }

  async fn list_steps(&self, instance_id: &str) -> Result<Vec<ExecutionStep>, Error> {
    let rows: Vec<StepRow> = sqlx::query_as(&format!(
      "SELECT {} FROM execution_steps WHERE instance_id = ? ORDER BY seq ASC",
      STEP_COLUMNS
    ))
    .bind(instance_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(ExecutionStep::from).collect())
  }
}
