// ABOUTME: Shared helpers for integration tests
// ABOUTME: Test-only handlers and workflow-running conveniences

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use switchyard::engine::{Capabilities, EngineError, HandlerRegistry, TaskInvoker};
use switchyard::handlers::{HandlerResult, RunContext, TaskHandler};
use switchyard::model::{TaskRef, TaskStatus};
use switchyard::{Workflow, WorkflowDef, WorkflowRunner};

/// Always fails with the `message` parameter (or a default).
pub struct FailHandler;

#[async_trait]
impl TaskHandler for FailHandler {
    fn kind(&self) -> &'static str {
        "fail"
    }

    async fn run(&self, task: &TaskRef, _ctx: &RunContext) -> switchyard::engine::Result<HandlerResult> {
        let guard = task.read().await;
        let message = guard
            .parameters
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("boom")
            .to_string();
        Err(EngineError::TaskFailed {
            name: guard.name.clone(),
            message,
        })
    }
}

/// Counts invocations; output records the running total.
pub struct CountingHandler {
    pub calls: Arc<AtomicU32>,
}

#[async_trait]
impl TaskHandler for CountingHandler {
    fn kind(&self) -> &'static str {
        "count"
    }

    async fn run(&self, _task: &TaskRef, _ctx: &RunContext) -> switchyard::engine::Result<HandlerResult> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(HandlerResult::Done(serde_json::json!({ "calls": calls })))
    }
}

/// Fails the first `fail_times` invocations, then succeeds.
pub struct FlakyHandler {
    pub fail_times: u32,
    pub attempts: Arc<AtomicU32>,
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    fn kind(&self) -> &'static str {
        "flaky"
    }

    async fn run(&self, task: &TaskRef, _ctx: &RunContext) -> switchyard::engine::Result<HandlerResult> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_times {
            return Err(EngineError::TaskFailed {
                name: task.read().await.name.clone(),
                message: format!("transient failure {}", attempt),
            });
        }
        Ok(HandlerResult::Done(serde_json::json!({ "attempt": attempt })))
    }
}

/// Parks until the run is cancelled, then raises an ordinary failure. The
/// retry engine must still surface the interrupted signal, not this error.
pub struct BlockThenFailHandler;

#[async_trait]
impl TaskHandler for BlockThenFailHandler {
    fn kind(&self) -> &'static str {
        "block_then_fail"
    }

    async fn run(&self, task: &TaskRef, ctx: &RunContext) -> switchyard::engine::Result<HandlerResult> {
        ctx.cancel.cancelled().await;
        Err(EngineError::TaskFailed {
            name: task.read().await.name.clone(),
            message: "late ordinary failure".to_string(),
        })
    }
}

pub fn capabilities_with(handlers: Vec<Arc<dyn TaskHandler>>) -> Arc<Capabilities> {
    let mut registry = HandlerRegistry::with_builtins();
    for handler in handlers {
        registry.register(handler);
    }
    Arc::new(Capabilities {
        invoker: Arc::new(TaskInvoker::new(registry)),
        ..Default::default()
    })
}

pub async fn run_yaml(yaml: &str) -> Workflow {
    run_yaml_with(yaml, Arc::new(Capabilities::default())).await
}

pub async fn run_yaml_with(yaml: &str, capabilities: Arc<Capabilities>) -> Workflow {
    let def = WorkflowDef::from_yaml(yaml).expect("valid workflow yaml");
    WorkflowRunner::with_capabilities(capabilities)
        .run(Arc::new(def), Value::Null, CancellationToken::new())
        .await
}

/// Find a task anywhere in the tree, including inactive branch containers.
pub async fn find_task(workflow: &Workflow, name: &str) -> Option<TaskRef> {
    let mut stack: Vec<TaskRef> = workflow.tasks.clone();
    while let Some(task) = stack.pop() {
        let guard = task.read().await;
        if guard.name == name {
            drop(guard);
            return Some(task);
        }
        stack.extend(guard.children.iter().cloned());
        stack.extend(guard.then_tasks.iter().cloned());
        stack.extend(guard.else_tasks.iter().cloned());
        for case in guard.case_tasks.values() {
            stack.extend(case.iter().cloned());
        }
        stack.extend(guard.default_tasks.iter().cloned());
        stack.extend(guard.loop_tasks.iter().cloned());
        stack.extend(guard.catch_tasks.iter().cloned());
        stack.extend(guard.finally_tasks.iter().cloned());
    }
    None
}

pub async fn status_of(workflow: &Workflow, name: &str) -> TaskStatus {
    let task = find_task(workflow, name)
        .await
        .unwrap_or_else(|| panic!("task '{}' not found", name));
    let status = task.read().await.status;
    status
}
