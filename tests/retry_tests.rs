// ABOUTME: Integration tests for retry policies and backoff timing
// ABOUTME: Timing assertions run under paused tokio time so waits are deterministic

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::*;
use switchyard::model::{TaskStatus, WorkflowStatus};
use switchyard::{WorkflowDef, WorkflowRunner};

fn flaky_capabilities(fail_times: u32) -> (Arc<AtomicU32>, Arc<switchyard::engine::Capabilities>) {
    let attempts = Arc::new(AtomicU32::new(0));
    let capabilities = capabilities_with(vec![Arc::new(FlakyHandler {
        fail_times,
        attempts: Arc::clone(&attempts),
    })]);
    (attempts, capabilities)
}

#[tokio::test(start_paused = true)]
async fn test_fixed_retry_recovers_after_transient_failures() {
    let (attempts, capabilities) = flaky_capabilities(2);
    let started = Instant::now();
    let workflow = run_yaml_with(
        r#"
        name: transient
        tasks:
          - name: wobbly
            type: flaky
            retry:
              count: 3
              strategy: fixed
              delay_seconds: 1
        "#,
        capabilities,
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let wobbly = find_task(&workflow, "wobbly").await.unwrap();
    assert_eq!(wobbly.read().await.retry_count, 2);

    // Two 1s waits between the three attempts.
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2200));
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_doubles_each_wait() {
    let (attempts, capabilities) = flaky_capabilities(2);
    let started = Instant::now();
    let workflow = run_yaml_with(
        r#"
        name: backoff
        tasks:
          - name: wobbly
            type: flaky
            retry:
              count: 3
              strategy: exponential_backoff
              delay_seconds: 1
        "#,
        capabilities,
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    // 1s then 2s.
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_millis(3200));
}

#[tokio::test(start_paused = true)]
async fn test_linear_backoff_first_retry_is_immediate() {
    let (attempts, capabilities) = flaky_capabilities(2);
    let started = Instant::now();
    let workflow = run_yaml_with(
        r#"
        name: backoff
        tasks:
          - name: wobbly
            type: flaky
            retry:
              count: 3
              strategy: linear_backoff
              delay_seconds: 2
        "#,
        capabilities,
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    // 0s then 2 * 1.5 * 1 = 3s.
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_millis(3200));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_reraises_original_error() {
    let (attempts, capabilities) = flaky_capabilities(10);
    let workflow = run_yaml_with(
        r#"
        name: hopeless
        tasks:
          - name: wobbly
            type: flaky
            retry:
              count: 2
              strategy: fixed
              delay_seconds: 1
        "#,
        capabilities,
    )
    .await;

    assert_eq!(workflow.status, WorkflowStatus::Error);
    assert!(workflow.error.as_deref().unwrap().contains("transient failure"));
    // Initial attempt plus two retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(status_of(&workflow, "wobbly").await, TaskStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_workflow_level_policy_applies_when_task_has_none() {
    let (attempts, capabilities) = flaky_capabilities(10);
    let workflow = run_yaml_with(
        r#"
        name: inherited
        retry:
          count: 1
          strategy: fixed
          delay_seconds: 1
        tasks:
          - name: wobbly
            type: flaky
        "#,
        capabilities,
    )
    .await;

    assert_eq!(workflow.status, WorkflowStatus::Error);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancellation_during_retry_wait() {
    let (attempts, capabilities) = flaky_capabilities(10);
    let def = WorkflowDef::from_yaml(
        r#"
        name: impatient
        tasks:
          - name: wobbly
            type: flaky
            retry:
              count: 5
              strategy: fixed
              delay_seconds: 5
        "#,
    )
    .unwrap();
    let runner = WorkflowRunner::with_capabilities(capabilities);
    let cancel = CancellationToken::new();

    let (workflow, _) = tokio::join!(
        runner.run(Arc::new(def), Value::Null, cancel.clone()),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    );

    // The wait is abandoned and the run winds down as cancelled.
    assert_eq!(workflow.status, WorkflowStatus::Cancelled);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(status_of(&workflow, "wobbly").await, TaskStatus::Cancelled);
}
