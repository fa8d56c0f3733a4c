//! Retry policy for failed steps.
//!
//! Attempt `k` (1-based) that fails with a transient error is followed by a
//! wait of `base_delay * backoff_multiplier^(k-1)` before attempt `k + 1`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_max_attempts() -> u32 {
  1
}

fn default_base_delay_ms() -> u64 {
  1_000
}

fn default_backoff_multiplier() -> f64 {
  2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
  /// Total attempts including the first one. Values below 1 are treated as 1.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_base_delay_ms")]
  pub base_delay_ms: u64,
  #[serde(default = "default_backoff_multiplier")]
  pub backoff_multiplier: f64,
  /// Upper bound for a single delay.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_delay_ms: Option<u64>,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      base_delay_ms: default_base_delay_ms(),
      backoff_multiplier: default_backoff_multiplier(),
      max_delay_ms: None,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
    Self {
      max_attempts,
      base_delay_ms: base_delay.as_millis() as u64,
      backoff_multiplier,
      max_delay_ms: None,
    }
  }

  /// A policy that never retries.
  pub fn no_retry() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts.max(1)
  }

  /// Whether another attempt is allowed after `attempt` failed.
  pub fn should_retry(&self, attempt: u32) -> bool {
    attempt < self.max_attempts()
  }

  /// Delay to wait after `attempt` failed, before the next attempt starts.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let multiplier = if self.backoff_multiplier.is_finite() && self.backoff_multiplier > 0.0 {
      self.backoff_multiplier
    } else {
      1.0
    };
    let mut delay_ms = self.base_delay_ms as f64 * multiplier.powi(exponent);
    if let Some(max) = self.max_delay_ms {
      delay_ms = delay_ms.min(max as f64);
    }
    if !delay_ms.is_finite() || delay_ms >= u64::MAX as f64 {
      return Duration::from_millis(self.max_delay_ms.unwrap_or(u64::MAX));
    }
    Duration::from_millis(delay_ms.max(0.0) as u64)
  }
}
