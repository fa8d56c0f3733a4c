//! Execution events and notifiers for observability.
//!
//! Events are emitted during an instance run so consumers can stream
//! progress, mirror state elsewhere, or simply ignore them.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use weft_store::InstanceStatus;

/// Events emitted during an instance run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  /// The instance moved to `running`.
  InstanceStarted {
    instance_id: String,
    workflow_id: String,
  },

  /// An attempt of a node has started.
  StepStarted {
    instance_id: String,
    node_id: String,
    attempt: u32,
  },

  /// An attempt of a node succeeded.
  StepCompleted {
    instance_id: String,
    node_id: String,
    attempt: u32,
    output: serde_json::Value,
    degraded: bool,
  },

  /// An attempt of a node failed.
  StepFailed {
    instance_id: String,
    node_id: String,
    attempt: u32,
    error: String,
  },

  /// A failed attempt will be followed by another one after `delay_ms`.
  StepRetryScheduled {
    instance_id: String,
    node_id: String,
    next_attempt: u32,
    delay_ms: u64,
  },

  /// A node will never run in this instance.
  StepSkipped {
    instance_id: String,
    node_id: String,
    reason: String,
  },

  /// The instance reached a terminal status.
  InstanceFinished {
    instance_id: String,
    status: InstanceStatus,
    error: Option<String>,
  },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Event volume is a handful per attempt, so an unbounded channel keeps the
/// decision loop from ever waiting on a slow consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier together with its receiving end.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
