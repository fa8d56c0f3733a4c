use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use weft_component::RegistryBuilder;
use weft_component::builtin::register_builtins;
use weft_config::WorkflowDefinition;
use weft_engine::{EngineConfig, WorkflowEngine, load_config};
use weft_store::{InstanceStatus, MemoryStore, SqliteStore, Store};

/// Weft - run workflow definitions as DAGs of components
#[derive(Parser)]
#[command(name = "weft")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.weft)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to the engine config (default: <data-dir>/config.toml)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a workflow file and print its execution order
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Run a workflow with the JSON payload read from stdin
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Record the run in <data-dir>/weft.db instead of memory
    #[arg(long)]
    persist: bool,
  },

  /// Show a persisted instance
  Status {
    instance_id: String,
  },

  /// Show the execution steps of a persisted instance
  Logs {
    instance_id: String,
  },
}

fn main() -> Result<()> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".weft"),
  };
  let config_path = cli.config.unwrap_or_else(|| data_dir.join("config.toml"));

  let command = match cli.command {
    Some(command) => command,
    None => {
      println!("weft - use --help to see available commands");
      return Ok(());
    }
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let config = load_config(&config_path).await;
    match command {
      Commands::Validate { workflow_file } => validate(&workflow_file, config).await,
      Commands::Run {
        workflow_file,
        persist,
      } => {
        let store = open_store(&data_dir, persist).await?;
        run_workflow(&workflow_file, config, store).await
      }
      Commands::Status { instance_id } => {
        let engine = build_engine(config, open_store(&data_dir, true).await?)?;
        let instance = engine.status(&instance_id).await?;
        println!("{}", serde_json::to_string_pretty(&instance)?);
        Ok(())
      }
      Commands::Logs { instance_id } => {
        let engine = build_engine(config, open_store(&data_dir, true).await?)?;
        let steps = engine.logs(&instance_id).await?;
        println!("{}", serde_json::to_string_pretty(&steps)?);
        Ok(())
      }
    }
  })
}

fn build_engine(config: EngineConfig, store: Arc<dyn Store>) -> Result<WorkflowEngine> {
  let mut builder = RegistryBuilder::new();
  register_builtins(&mut builder).context("failed to register built-in components")?;
  config
    .apply_retry(&mut builder)
    .context("invalid retry configuration")?;
  Ok(WorkflowEngine::new(builder.build(), store).with_config(config))
}

async fn open_store(data_dir: &Path, persist: bool) -> Result<Arc<dyn Store>> {
  if !persist {
    return Ok(Arc::new(MemoryStore::new()));
  }
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  let path = data_dir.join("weft.db");
  let store = SqliteStore::open(&path)
    .await
    .with_context(|| format!("failed to open database: {}", path.display()))?;
  Ok(Arc::new(store))
}

async fn read_definition(workflow_file: &Path) -> Result<WorkflowDefinition> {
  let content = tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  WorkflowDefinition::from_json(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))
}

async fn validate(workflow_file: &Path, config: EngineConfig) -> Result<()> {
  let definition = read_definition(workflow_file).await?;
  let engine = build_engine(config, Arc::new(MemoryStore::new()))?;

  let graph = engine
    .validate(&definition)
    .with_context(|| format!("workflow '{}' is invalid", definition.workflow_id))?;

  eprintln!("Workflow '{}' is valid", definition.name);
  for node_id in graph.topological_order() {
    println!("{}", node_id);
  }
  Ok(())
}

async fn run_workflow(
  workflow_file: &Path,
  config: EngineConfig,
  store: Arc<dyn Store>,
) -> Result<()> {
  let definition = read_definition(workflow_file).await?;
  eprintln!("Loaded workflow: {}", definition.name);

  let payload = read_payload_from_stdin()?;
  let engine = build_engine(config, store)?;

  let instance = engine
    .create(&definition, payload)
    .await
    .context("failed to create instance")?;
  let instance_id = instance.instance_id;
  eprintln!("Instance: {}", instance_id);

  engine
    .execute(&instance_id)
    .await
    .context("failed to start instance")?;

  let finished = tokio::select! {
    finished = engine.wait(&instance_id) => finished?,
    _ = tokio::signal::ctrl_c() => {
      eprintln!("Cancelling...");
      engine.cancel(&instance_id).await?;
      engine.wait(&instance_id).await?
    }
  };
  let steps = engine.logs(&instance_id).await?;

  eprintln!("Execution finished: {}", finished.status);
  println!(
    "{}",
    serde_json::to_string_pretty(&serde_json::json!({
      "instance": finished,
      "steps": steps,
    }))?
  );

  if finished.status != InstanceStatus::Completed {
    anyhow::bail!("instance {} ended as {}", instance_id, finished.status);
  }
  Ok(())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}
