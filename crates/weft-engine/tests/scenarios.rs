//! End-to-end scenarios over the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use weft_component::builtin::{MANUAL_TRIGGER, PASSTHROUGH};
use weft_config::{NodeDef, RetryPolicy};
use weft_engine::{ChannelNotifier, EngineConfig, ExecutionEvent, WorkflowEngine};
use weft_store::{InstanceStatus, MemoryStore, StepStatus};

use common::*;

fn engine(builder: weft_component::RegistryBuilder) -> WorkflowEngine {
  WorkflowEngine::new(builder.build(), Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn test_linear_workflow_completes() {
  let mut builder = registry_builder();
  builder
    .register("slow_recorder", || Recorder::with_delay(Duration::from_millis(5)))
    .unwrap();
  let engine = engine(builder);
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("read", "slow_recorder").with_config(json!({ "sheet_id": "{sheet_id}" })),
      NodeDef::new("process", "slow_recorder").with_config(json!({ "rows": "{read.input}" })),
      NodeDef::new("write", "slow_recorder").with_config(json!({ "node": "{node}" })),
    ],
    &[("trigger", "read"), ("read", "process"), ("process", "write")],
  );

  let (instance, steps) = run(&engine, &definition, json!({ "sheet_id": "abc" }))
    .await
    .unwrap();

  assert_eq!(instance.status, InstanceStatus::Completed);
  assert!(instance.error_message.is_none());
  assert_eq!(steps.len(), 4);
  assert!(steps.iter().all(|s| s.status == StepStatus::Success && s.attempt == 1));

  let order: Vec<&str> = steps.iter().map(|s| s.node_id.as_str()).collect();
  assert_eq!(order, vec!["trigger", "read", "process", "write"]);
  for pair in steps.windows(2) {
    assert!(pair[0].started_at.unwrap() < pair[1].started_at.unwrap());
    assert!(pair[0].ended_at.unwrap() <= pair[1].started_at.unwrap());
  }

  assert_eq!(steps[1].input_data, json!({ "sheet_id": "abc" }));
  assert_eq!(steps[2].input_data, json!({ "rows": { "sheet_id": "abc" } }));
  // `{node}` resolves against the direct predecessor first.
  assert_eq!(steps[3].input_data, json!({ "node": "process" }));
}

#[tokio::test]
async fn test_retry_then_success() {
  let flaky = Flaky::new(2);
  let mut builder = registry_builder();
  builder
    .register("flaky", move || flaky.clone())
    .unwrap();
  let engine = engine(builder);
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("process", "flaky").with_retry(fast_retry(3)),
      NodeDef::new("write", "recorder"),
    ],
    &[("trigger", "process"), ("process", "write")],
  );

  let (instance, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(instance.status, InstanceStatus::Completed);
  let process = steps_for(&steps, "process");
  assert_eq!(
    statuses(&process),
    vec![StepStatus::Failed, StepStatus::Failed, StepStatus::Success]
  );
  assert_eq!(
    process.iter().map(|s| s.attempt).collect::<Vec<_>>(),
    vec![1, 2, 3]
  );
  assert_eq!(
    process[0].error_message.as_deref(),
    Some("transient error: upstream timeout")
  );

  // The final record carries the whole retry history.
  let final_logs = &process[2].logs;
  assert!(final_logs.contains(&"[attempt 1] attempt 1 hit a timeout".to_string()));
  assert!(final_logs.contains(&"[attempt 1] error: transient error: upstream timeout".to_string()));
  assert!(final_logs.contains(&"[attempt 2] error: transient error: upstream timeout".to_string()));
  assert!(final_logs.iter().all(|line| !line.starts_with("[attempt 3] error")));

  assert_eq!(steps_for(&steps, "write")[0].status, StepStatus::Success);
}

#[tokio::test]
async fn test_retry_bound_is_max_attempts() {
  let engine = engine(registry_builder());
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("process", "always_transient").with_retry(fast_retry(3)),
      NodeDef::new("write", "recorder"),
    ],
    &[("trigger", "process"), ("process", "write")],
  );

  let (instance, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(instance.status, InstanceStatus::Failed);
  assert_eq!(
    instance.error_message.as_deref(),
    Some(
      "node 'process' failed after 3 attempt(s): \
       fatal error: retries exhausted after 3 attempt(s): service unavailable"
    )
  );

  let process = steps_for(&steps, "process");
  assert_eq!(process.len(), 3);
  assert!(process.iter().all(|s| s.status == StepStatus::Failed));
  assert_eq!(process[2].attempt, 3);
  assert_eq!(
    process[1].error_message.as_deref(),
    Some("transient error: service unavailable")
  );
  assert_eq!(
    process[2].error_message.as_deref(),
    Some("fatal error: retries exhausted after 3 attempt(s): service unavailable")
  );

  let write = steps_for(&steps, "write");
  assert_eq!(statuses(&write), vec![StepStatus::Skipped]);
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
  let engine = engine(registry_builder());
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("write", "fatal").with_retry(fast_retry(5)),
    ],
    &[("trigger", "write")],
  );

  let (instance, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(instance.status, InstanceStatus::Failed);
  assert_eq!(steps_for(&steps, "write").len(), 1);
  assert_eq!(
    instance.error_message.as_deref(),
    Some("node 'write' failed after 1 attempt(s): fatal error: invalid configuration")
  );
}

#[tokio::test]
async fn test_diamond_skip_cascade() {
  let engine = engine(registry_builder());
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("a", "fatal"),
      NodeDef::new("b", "recorder"),
      NodeDef::new("c", "recorder"),
      NodeDef::new("d", "recorder"),
    ],
    &[
      ("trigger", "a"),
      ("a", "b"),
      ("a", "c"),
      ("b", "d"),
      ("c", "d"),
    ],
  );

  let (instance, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(instance.status, InstanceStatus::Failed);
  assert_eq!(steps_for(&steps, "a")[0].status, StepStatus::Failed);
  for node in ["b", "c", "d"] {
    let rows = steps_for(&steps, node);
    assert_eq!(statuses(&rows), vec![StepStatus::Skipped], "node {}", node);
    assert!(rows[0].started_at.is_none());
  }
  assert_eq!(
    steps_for(&steps, "b")[0].logs,
    vec!["[attempt 1] skipped: upstream node 'a' failed"]
  );
  assert_eq!(
    steps_for(&steps, "d")[0].logs,
    vec!["[attempt 1] skipped: upstream node 'b' was skipped"]
  );
}

#[tokio::test]
async fn test_and_join_waits_for_all_predecessors() {
  let mut builder = registry_builder();
  builder
    .register("fast", || Recorder::with_delay(Duration::from_millis(5)))
    .unwrap()
    .register("slow", || Recorder::with_delay(Duration::from_millis(80)))
    .unwrap();
  let engine = engine(builder);
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("a", "fast"),
      NodeDef::new("b", "slow"),
      NodeDef::new("c", "recorder").with_config(json!({ "from_a": "{a.node}", "from_b": "{b.node}" })),
    ],
    &[("trigger", "a"), ("trigger", "b"), ("a", "c"), ("b", "c")],
  );

  let (instance, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(instance.status, InstanceStatus::Completed);
  let a = steps_for(&steps, "a")[0];
  let b = steps_for(&steps, "b")[0];
  let c = steps_for(&steps, "c")[0];
  assert!(c.started_at.unwrap() >= a.ended_at.unwrap());
  assert!(c.started_at.unwrap() >= b.ended_at.unwrap());
  assert_eq!(c.input_data, json!({ "from_a": "a", "from_b": "b" }));
}

#[tokio::test]
async fn test_and_join_skips_when_one_predecessor_fails() {
  let engine = engine(registry_builder());
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("a", "recorder"),
      NodeDef::new("b", "fatal"),
      NodeDef::new("c", "recorder"),
    ],
    &[("trigger", "a"), ("trigger", "b"), ("a", "c"), ("b", "c")],
  );

  let (instance, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(instance.status, InstanceStatus::Failed);
  assert_eq!(steps_for(&steps, "a")[0].status, StepStatus::Success);
  let c = steps_for(&steps, "c");
  assert_eq!(statuses(&c), vec![StepStatus::Skipped]);
  assert!(c[0].started_at.is_none());
}

#[tokio::test]
async fn test_cancel_lets_running_step_finish() {
  let mut builder = registry_builder();
  builder
    .register("slow", || Recorder::with_delay(Duration::from_millis(300)))
    .unwrap();
  let (notifier, mut events) = ChannelNotifier::channel();
  let engine = engine(builder).with_notifier(Arc::new(notifier));
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("process", "slow"),
      NodeDef::new("write", "recorder"),
    ],
    &[("trigger", "process"), ("process", "write")],
  );

  let instance = engine.create(&definition, json!({})).await.unwrap();
  engine.execute(&instance.instance_id).await.unwrap();

  tokio::time::timeout(Duration::from_secs(5), async {
    while let Some(event) = events.recv().await {
      if let ExecutionEvent::StepStarted { node_id, .. } = event {
        if node_id == "process" {
          break;
        }
      }
    }
  })
  .await
  .unwrap();

  engine.cancel(&instance.instance_id).await.unwrap();
  let finished = engine.wait(&instance.instance_id).await.unwrap();

  assert_eq!(finished.status, InstanceStatus::Cancelled);
  let steps = engine.logs(&instance.instance_id).await.unwrap();
  assert_eq!(statuses(&steps_for(&steps, "process")), vec![StepStatus::Success]);
  let write = steps_for(&steps, "write");
  assert_eq!(statuses(&write), vec![StepStatus::Skipped]);
  assert_eq!(write[0].logs, vec!["[attempt 1] skipped: instance cancelled"]);
}

async fn wait_for_event(
  events: &mut tokio::sync::mpsc::UnboundedReceiver<ExecutionEvent>,
  matches: impl Fn(&ExecutionEvent) -> bool,
) {
  tokio::time::timeout(Duration::from_secs(5), async {
    while let Some(event) = events.recv().await {
      if matches(&event) {
        break;
      }
    }
  })
  .await
  .unwrap();
}

#[tokio::test]
async fn test_cancel_while_last_node_runs() {
  let mut builder = registry_builder();
  builder
    .register("slow", || Recorder::with_delay(Duration::from_millis(300)))
    .unwrap();
  let (notifier, mut events) = ChannelNotifier::channel();
  let engine = engine(builder).with_notifier(Arc::new(notifier));
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("process", "slow"),
    ],
    &[("trigger", "process")],
  );

  let instance = engine.create(&definition, json!({})).await.unwrap();
  engine.execute(&instance.instance_id).await.unwrap();
  wait_for_event(&mut events, |event| {
    matches!(event, ExecutionEvent::StepStarted { node_id, .. } if node_id == "process")
  })
  .await;

  engine.cancel(&instance.instance_id).await.unwrap();
  let finished = engine.wait(&instance.instance_id).await.unwrap();

  assert_eq!(finished.status, InstanceStatus::Cancelled);
  assert_eq!(finished.error_message, None);
  let steps = engine.logs(&instance.instance_id).await.unwrap();
  assert_eq!(statuses(&steps_for(&steps, "process")), vec![StepStatus::Success]);
}

#[tokio::test]
async fn test_cancelled_instance_has_no_error_message() {
  let mut builder = registry_builder();
  builder
    .register("slow", || Recorder::with_delay(Duration::from_millis(300)))
    .unwrap();
  let (notifier, mut events) = ChannelNotifier::channel();
  let engine = engine(builder).with_notifier(Arc::new(notifier));
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("a", "slow"),
      NodeDef::new("b", "fatal"),
    ],
    &[("trigger", "a"), ("trigger", "b")],
  );

  let instance = engine.create(&definition, json!({})).await.unwrap();
  engine.execute(&instance.instance_id).await.unwrap();
  wait_for_event(&mut events, |event| {
    matches!(event, ExecutionEvent::StepFailed { node_id, .. } if node_id == "b")
  })
  .await;

  engine.cancel(&instance.instance_id).await.unwrap();
  let finished = engine.wait(&instance.instance_id).await.unwrap();

  assert_eq!(finished.status, InstanceStatus::Cancelled);
  assert_eq!(finished.error_message, None);
  let steps = engine.logs(&instance.instance_id).await.unwrap();
  assert_eq!(statuses(&steps_for(&steps, "a")), vec![StepStatus::Success]);
  assert_eq!(statuses(&steps_for(&steps, "b")), vec![StepStatus::Failed]);
}

#[tokio::test]
async fn test_cancel_during_backoff_skips_next_attempt() {
  let engine = engine(registry_builder());
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("process", "always_transient")
        .with_retry(RetryPolicy::new(5, Duration::from_secs(30), 1.0)),
    ],
    &[("trigger", "process")],
  );

  let instance = engine.create(&definition, json!({})).await.unwrap();
  engine.execute(&instance.instance_id).await.unwrap();

  tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      let steps = engine.logs(&instance.instance_id).await.unwrap();
      if steps.iter().any(|s| s.node_id == "process" && s.status == StepStatus::Failed) {
        break;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .unwrap();

  engine.cancel(&instance.instance_id).await.unwrap();
  let finished = tokio::time::timeout(Duration::from_secs(5), engine.wait(&instance.instance_id))
    .await
    .unwrap()
    .unwrap();

  assert_eq!(finished.status, InstanceStatus::Cancelled);
  let steps = engine.logs(&instance.instance_id).await.unwrap();
  let process = steps_for(&steps, "process");
  assert_eq!(statuses(&process), vec![StepStatus::Failed, StepStatus::Skipped]);
  assert_eq!(process[1].attempt, 2);
}

#[tokio::test]
async fn test_degraded_output_flows_downstream() {
  let engine = engine(registry_builder());
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("process", "degraded"),
      NodeDef::new("write", PASSTHROUGH).with_config(json!({ "body": "Summary: {summary}" })),
    ],
    &[("trigger", "process"), ("process", "write")],
  );

  let (instance, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(instance.status, InstanceStatus::Completed);
  let process = steps_for(&steps, "process")[0];
  assert!(process.degraded);
  assert_eq!(
    process.logs,
    vec![
      "[attempt 1] provider unreachable, using fallback",
      "[attempt 1] degraded result",
    ]
  );
  let write = steps_for(&steps, "write")[0];
  assert!(!write.degraded);
  assert_eq!(write.output_data, Some(json!({ "body": "Summary: fallback summary" })));
}

#[tokio::test]
async fn test_unresolved_placeholder_is_logged() {
  let engine = engine(registry_builder());
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("write", PASSTHROUGH)
        .with_config(json!({ "to": "{email}", "subject": "Report for {customer}" })),
    ],
    &[("trigger", "write")],
  );

  let (instance, steps) = run(&engine, &definition, json!({ "customer": "Acme" }))
    .await
    .unwrap();

  assert_eq!(instance.status, InstanceStatus::Completed);
  let write = steps_for(&steps, "write")[0];
  assert_eq!(
    write.input_data,
    json!({ "to": "{email}", "subject": "Report for Acme" })
  );
  assert_eq!(
    write.logs,
    vec!["[attempt 1] warning: unresolved placeholder {email} at $.to"]
  );
}

#[tokio::test]
async fn test_fan_out_limit() {
  let probe = Recorder::with_delay(Duration::from_millis(40));
  let peak = probe.peak.clone();
  let mut builder = registry_builder();
  builder
    .register("probe", move || probe.clone())
    .unwrap();
  let config = EngineConfig {
    max_concurrency: 2,
    ..EngineConfig::default()
  };
  let engine = engine(builder).with_config(config);
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("a", "probe"),
      NodeDef::new("b", "probe"),
      NodeDef::new("c", "probe"),
      NodeDef::new("d", "probe"),
    ],
    &[("trigger", "a"), ("trigger", "b"), ("trigger", "c"), ("trigger", "d")],
  );

  let (instance, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(instance.status, InstanceStatus::Completed);
  assert_eq!(steps.len(), 5);
  assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_timeout_is_transient() {
  let mut builder = registry_builder();
  builder
    .register("hang", || Recorder::with_delay(Duration::from_secs(5)))
    .unwrap();
  let engine = engine(builder);
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("process", "hang")
        .with_timeout_ms(20)
        .with_retry(fast_retry(2)),
    ],
    &[("trigger", "process")],
  );

  let (instance, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(instance.status, InstanceStatus::Failed);
  let process = steps_for(&steps, "process");
  assert_eq!(process.len(), 2);
  assert_eq!(
    process[0].error_message.as_deref(),
    Some("transient error: step timed out after 20 ms")
  );
  assert_eq!(
    process[1].error_message.as_deref(),
    Some("fatal error: retries exhausted after 2 attempt(s): step timed out after 20 ms")
  );
}

#[tokio::test]
async fn test_panicking_component_fails_the_step() {
  let engine = engine(registry_builder());
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("write", "panicker").with_retry(fast_retry(3)),
    ],
    &[("trigger", "write")],
  );

  let (instance, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(instance.status, InstanceStatus::Failed);
  let write = steps_for(&steps, "write");
  assert_eq!(write.len(), 1);
  assert_eq!(
    write[0].error_message.as_deref(),
    Some("fatal error: component panicked: sheet client exploded")
  );
}

#[tokio::test]
async fn test_type_retry_policy_and_node_override() {
  let mut builder = registry_builder();
  builder.set_retry("always_transient", fast_retry(4)).unwrap();
  let engine = engine(builder);
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("by_type", "always_transient"),
      NodeDef::new("by_node", "always_transient").with_retry(fast_retry(2)),
    ],
    &[("trigger", "by_type"), ("trigger", "by_node")],
  );

  let (_, steps) = run(&engine, &definition, json!({})).await.unwrap();

  assert_eq!(steps_for(&steps, "by_type").len(), 4);
  assert_eq!(steps_for(&steps, "by_node").len(), 2);
}

#[tokio::test]
async fn test_events_bracket_the_run() {
  let (notifier, mut events) = ChannelNotifier::channel();
  let engine = engine(registry_builder()).with_notifier(Arc::new(notifier));
  let definition = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("echo", PASSTHROUGH),
    ],
    &[("trigger", "echo")],
  );

  let (instance, _) = run(&engine, &definition, json!({})).await.unwrap();

  let mut received = Vec::new();
  while let Ok(event) = events.try_recv() {
    received.push(event);
  }
  assert!(matches!(
    received.first(),
    Some(ExecutionEvent::InstanceStarted { .. })
  ));
  assert_eq!(
    received.last(),
    Some(&ExecutionEvent::InstanceFinished {
      instance_id: instance.instance_id.clone(),
      status: InstanceStatus::Completed,
      error: None,
    })
  );
  let completed = received
    .iter()
    .filter(|e| matches!(e, ExecutionEvent::StepCompleted { .. }))
    .count();
  assert_eq!(completed, 2);
}

#[tokio::test]
async fn test_concurrent_instances_are_independent() {
  let engine = engine(registry_builder());
  let ok = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("echo", PASSTHROUGH),
    ],
    &[("trigger", "echo")],
  );
  let bad = definition(
    vec![
      NodeDef::new("trigger", MANUAL_TRIGGER),
      NodeDef::new("write", "fatal"),
    ],
    &[("trigger", "write")],
  );

  let (first, second) = tokio::join!(
    run(&engine, &ok, json!({})),
    run(&engine, &bad, json!({}))
  );

  assert_eq!(first.unwrap().0.status, InstanceStatus::Completed);
  assert_eq!(second.unwrap().0.status, InstanceStatus::Failed);
}
