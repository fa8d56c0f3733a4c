//! Weft Workflow Engine
//!
//! Runs workflow instances: a snapshot of a validated definition plus the
//! instance input, driven to `completed`, `failed` or `cancelled`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                         │
//! │  - create / execute / cancel / status / logs / wait         │
//! │  - validates definitions against graph rules and registry   │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Executor (decision loop)                  │
//! │  - AND-join eligibility, fan-out limit                      │
//! │  - retry with backoff, skip-cascade, cancellation           │
//! │  - single CAS to the terminal status                        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │  one task per attempt
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          ContextBuilder → Component → StepTracker           │
//! │  - `{name}` substitution over predecessor outputs and input │
//! │  - timeout and panic isolation                              │
//! │  - per-attempt step record, written by its task only        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use weft_engine::{EngineConfig, WorkflowEngine};
//!
//! let mut builder = RegistryBuilder::new();
//! register_builtins(&mut builder)?;
//! let engine = WorkflowEngine::new(builder.build(), Arc::new(MemoryStore::new()))
//!   .with_config(EngineConfig::default());
//!
//! let instance = engine.create(&definition, input).await?;
//! engine.execute(&instance.instance_id).await?;
//! let finished = engine.wait(&instance.instance_id).await?;
//! ```

mod config;
mod context;
mod error;
mod events;
mod executor;
mod lifecycle;
mod template;
mod tracker;

pub use config::{EngineConfig, RetryConfig, load_config};
pub use context::{ContextBuilder, StepInput};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::RunOutcome;
pub use lifecycle::WorkflowEngine;
pub use template::{Resolved, Scope, Unresolved};
pub use tracker::{StepHandle, StepTracker};
