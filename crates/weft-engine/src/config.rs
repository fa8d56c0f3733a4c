//! Engine configuration.
//!
//! Read from a `config.toml` file; missing or malformed files fall back to
//! [`EngineConfig::default()`].
//!
//! ```toml
//! max_concurrency = 4
//! step_timeout_ms = 30000
//!
//! [retry.default]
//! max_attempts = 3
//! base_delay_ms = 500
//!
//! [retry.types.ai_process]
//! max_attempts = 5
//! backoff_multiplier = 3.0
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use weft_component::{RegistryBuilder, RegistryError};
use weft_config::RetryPolicy;

fn default_max_concurrency() -> usize {
  8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
  /// Upper bound on steps running at once within one instance.
  #[serde(default = "default_max_concurrency")]
  pub max_concurrency: usize,
  /// Per-attempt timeout for nodes without their own `timeout_ms`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub step_timeout_ms: Option<u64>,
  #[serde(default)]
  pub retry: RetryConfig,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_concurrency: default_max_concurrency(),
      step_timeout_ms: None,
      retry: RetryConfig::default(),
    }
  }
}

/// Registry-wide default retry policy plus per-type overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
  #[serde(default)]
  pub default: RetryPolicy,
  #[serde(default)]
  pub types: BTreeMap<String, RetryPolicy>,
}

impl EngineConfig {
  /// Fan-out limit, never below one.
  pub fn concurrency(&self) -> usize {
    self.max_concurrency.max(1)
  }

  pub fn step_timeout(&self) -> Option<Duration> {
    self.step_timeout_ms.map(Duration::from_millis)
  }

  pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  /// Apply the retry section to a registry under construction.
  ///
  /// Per-type entries must name registered types.
  pub fn apply_retry(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    builder.default_retry(self.retry.default.clone());
    for (node_type, policy) in &self.retry.types {
      builder.set_retry(node_type, policy.clone())?;
    }
    Ok(())
  }
}

/// Load configuration from a TOML file.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   returns the default.
pub async fn load_config(path: &Path) -> EngineConfig {
  let content = match tokio::fs::read_to_string(path).await {
    Ok(content) => content,
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
      tracing::debug!(path = %path.display(), "no config file found, using defaults");
      return EngineConfig::default();
    }
    Err(err) => {
      tracing::warn!(path = %path.display(), error = %err, "failed to read config, using defaults");
      return EngineConfig::default();
    }
  };

  match EngineConfig::from_toml_str(&content) {
    Ok(config) => config,
    Err(err) => {
      tracing::warn!(path = %path.display(), error = %err, "failed to parse config, using defaults");
      EngineConfig::default()
    }
  }
}
