//! Built-in components.
//!
//! External adapters (spreadsheets, AI providers, mail) live outside the
//! engine. These two are enough to run a definition end-to-end.

use async_trait::async_trait;

use crate::component::{Component, ComponentKind};
use crate::context::ExecutionContext;
use crate::error::RegistryError;
use crate::metadata::ComponentMetadata;
use crate::registry::RegistryBuilder;
use crate::result::ComponentResult;

pub const MANUAL_TRIGGER: &str = "manual_trigger";
pub const PASSTHROUGH: &str = "passthrough";

/// Register every built-in component.
pub fn register_builtins(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
  builder
    .register(MANUAL_TRIGGER, ManualTrigger::default)?
    .register(PASSTHROUGH, Passthrough::default)?;
  Ok(())
}

/// Starts a run with the instance input.
///
/// Output is the instance input (when it is an object) with the resolved
/// config fields layered on top.
#[derive(Debug, Default, Clone)]
pub struct ManualTrigger;

#[async_trait]
impl Component for ManualTrigger {
  fn metadata(&self) -> ComponentMetadata {
    ComponentMetadata::new(
      "Manual trigger",
      "Starts the workflow with the instance input",
      ComponentKind::Trigger,
    )
  }

  async fn execute(&self, ctx: ExecutionContext) -> ComponentResult {
    let mut output = match &ctx.global_variables {
      serde_json::Value::Object(map) => map.clone(),
      serde_json::Value::Null => serde_json::Map::new(),
      other => {
        let mut map = serde_json::Map::new();
        map.insert("input".to_string(), other.clone());
        map
      }
    };
    for (key, value) in ctx.input_data {
      output.insert(key, value);
    }
    let fields = output.len();
    ComponentResult::success(serde_json::Value::Object(output))
      .with_log(format!("trigger emitted {} field(s)", fields))
  }
}

/// Emits its resolved config as output.
///
/// Useful for reshaping upstream data with placeholders.
#[derive(Debug, Default, Clone)]
pub struct Passthrough;

#[async_trait]
impl Component for Passthrough {
  fn metadata(&self) -> ComponentMetadata {
    ComponentMetadata::new(
      "Passthrough",
      "Emits the resolved config as output",
      ComponentKind::Transform,
    )
  }

  async fn execute(&self, ctx: ExecutionContext) -> ComponentResult {
    ComponentResult::success(serde_json::Value::Object(ctx.input_data))
  }
}
