// ABOUTME: The open/close/queue scheduler cycle driving a workflow run to completion
// ABOUTME: Implements joins, blocking siblings, the rerun protocol, and catch short-circuiting

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::{EngineError, Result};
use super::invoker::TaskInvoker;
use super::retry::{resolve_retry_options, RetryEngine};
use crate::definition::RetryDef;
use crate::handlers::{HandlerResult, RunContext};
use crate::interp::RunHooks;
use crate::model::{TaskRef, TaskStatus};
use crate::session::Session;

/// Drives one workflow run over its task tree. Scheduling is cooperative
/// and single-cycled: bookkeeping never suspends, and "concurrent" execution
/// means the queued batch is started together and joined as a unit.
pub struct Scheduler {
    session: Arc<Session>,
    invoker: Arc<TaskInvoker>,
    retry: Arc<RetryEngine>,
    hooks: Arc<dyn RunHooks>,
    ctx: RunContext,
    workflow_retry: Option<RetryDef>,
}

impl Scheduler {
    pub fn new(
        session: Arc<Session>,
        invoker: Arc<TaskInvoker>,
        retry: Arc<RetryEngine>,
        hooks: Arc<dyn RunHooks>,
        ctx: RunContext,
        workflow_retry: Option<RetryDef>,
    ) -> Self {
        Self {
            session,
            invoker,
            retry,
            hooks,
            ctx,
            workflow_retry,
        }
    }

    /// Run cycles until one queues nothing; the final cycle's batch result
    /// is the workflow output.
    pub async fn run(&self, roots: &[TaskRef]) -> Result<Value> {
        let mut last_result = Value::Null;

        loop {
            close_parent_tasks(roots).await;
            open_next_tasks(roots, Utc::now()).await;

            let open = collect_open_tasks(roots).await;
            let mut queued = Vec::new();
            for task in open {
                if self.is_executable(&task).await {
                    self.prepare_for_execution(&task).await;
                    queued.push(task);
                }
            }

            if queued.is_empty() {
                return Ok(last_result);
            }
            debug!("Executing batch of {} tasks", queued.len());

            let futures = queued.iter().map(|task| self.execute_task(task));
            let results = join_all(futures).await;

            let mut outputs = Vec::new();
            let mut failure: Option<EngineError> = None;
            for result in results {
                match result {
                    Ok(output) => outputs.push(output),
                    Err(e) if e.is_interrupted() => {
                        failure = Some(e);
                        break;
                    }
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                }
            }

            if let Some(e) = failure {
                // Re-close parents so statuses reflect the failure even
                // though this cycle aborts.
                close_parent_tasks(roots).await;
                return Err(e);
            }

            last_result = if outputs.len() == 1 {
                outputs.pop().unwrap_or(Value::Null)
            } else {
                Value::Array(outputs)
            };
        }
    }

    /// An open task is queued when it has no children, or when all of its
    /// children are terminal: the latter is the re-invocation path used by
    /// loop and try handlers after their spawned children finish.
    async fn is_executable(&self, task: &TaskRef) -> bool {
        let children = task.read().await.children.clone();
        if children.is_empty() {
            return true;
        }
        for child in &children {
            if !child.read().await.status.is_terminal() {
                return false;
            }
        }
        true
    }

    /// Resolve parameters through the session and stamp the task executing,
    /// immediately before queuing.
    async fn prepare_for_execution(&self, task: &TaskRef) {
        let parameters = task.read().await.def.parameters.clone();
        let resolved = self.session.resolve_parameters(&parameters).await;
        let mut guard = task.write().await;
        guard.parameters = resolved;
        guard.status = TaskStatus::Executing;
    }

    async fn execute_task(&self, task: &TaskRef) -> Result<Value> {
        {
            task.write().await.time_started = Some(Utc::now());
        }
        self.hooks.before_task(task).await;

        let options = resolve_retry_options(task, &self.session, self.workflow_retry.as_ref()).await;
        let invoked = self
            .retry
            .retry(
                || self.invoker.invoke(task, &self.ctx),
                EngineError::is_retryable,
                task,
                &options,
                &self.ctx.cancel,
            )
            .await;

        let outcome = match invoked {
            Ok(HandlerResult::Rerun) => {
                // The handler attached fresh children; reopen so the next
                // cycle opens them, and re-queue once they all terminate.
                task.write().await.mark_reopened();
                Ok(Value::Null)
            }
            Ok(HandlerResult::Done(output)) => self.record_success(task, output).await,
            Err(EngineError::Interrupted) => {
                task.write().await.mark_cancelled();
                Err(EngineError::Interrupted)
            }
            Err(e) => self.record_failure(task, e).await,
        };

        self.hooks.after_task(task).await;
        outcome
    }

    async fn record_success(&self, task: &TaskRef, output: Value) -> Result<Value> {
        let children = task.read().await.children.clone();
        let mut all_completed = true;
        for child in &children {
            if child.read().await.status != TaskStatus::Completed {
                all_completed = false;
                break;
            }
        }

        let mut guard = task.write().await;
        if guard.has_children() && !all_completed {
            // Waiting on work it just spawned; the close pass finishes it.
            guard.output = output.clone();
        } else {
            guard.mark_completed(output.clone());
        }
        Ok(output)
    }

    async fn record_failure(&self, task: &TaskRef, error: EngineError) -> Result<Value> {
        let (name, task_id, ignore_error) = {
            let guard = task.read().await;
            (guard.name.clone(), guard.id.clone(), guard.def.ignore_error)
        };

        if ignore_error {
            warn!("Task '{}' failed but ignores errors: {}", name, error);
            task.write().await.mark_completed(Value::Null);
            return Ok(Value::Null);
        }

        task.write().await.mark_error(error.to_string());

        let catch_ancestor = self
            .session
            .find_ancestor(&task_id, |t| self.invoker.is_catch_kind(&t.def.kind))
            .await;

        match catch_ancestor {
            Some(catch_task) => {
                info!(
                    "Task '{}' failed, short-circuiting to catch task '{}'",
                    name,
                    catch_task.read().await.name
                );
                cancel_pending_descendants(&catch_task).await;
                // The catch task's next invocation observes the error via
                // its children's statuses.
                Ok(Value::Null)
            }
            None => Err(error),
        }
    }
}

/// Close parents whose children have all settled: all terminal and none
/// errored means completed with duration stamps; any errored child marks
/// the parent errored without computing duration. Idempotent.
pub async fn close_parent_tasks(roots: &[TaskRef]) {
    for task in collect_tasks_post_order(roots).await {
        let mut guard = task.write().await;
        if guard.status != TaskStatus::Executing || !guard.has_children() {
            continue;
        }

        let mut all_terminal = true;
        let mut first_error: Option<String> = None;
        for child in &guard.children {
            let child_guard = child.read().await;
            if !child_guard.status.is_terminal() {
                all_terminal = false;
                break;
            }
            if child_guard.status == TaskStatus::Error && first_error.is_none() {
                first_error = Some(
                    child_guard
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("task '{}' failed", child_guard.name)),
                );
            }
        }

        if let Some(message) = first_error {
            guard.mark_error(message);
        } else if all_terminal {
            guard.status = TaskStatus::Completed;
            guard.stamp_completion();
        }
    }
}

/// Open the next available tasks, top-down. Sibling traversal stops right
/// after a blocking task that has not yet terminated, which realizes
/// "list = sequential, map = parallel" at every nesting level. Every task
/// opened in one pass shares the same timestamp.
pub fn open_next_tasks(tasks: &[TaskRef], now: DateTime<Utc>) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        for task in tasks {
            let status = task.read().await.status;
            match status {
                TaskStatus::Waiting => {
                    task.write().await.mark_opened(now);
                    let children = task.read().await.children.clone();
                    open_next_tasks(&children, now).await;
                }
                TaskStatus::Open | TaskStatus::Executing => {
                    let children = task.read().await.children.clone();
                    open_next_tasks(&children, now).await;
                }
                _ => {}
            }

            let guard = task.read().await;
            if guard.blocking && !guard.status.is_terminal() {
                break;
            }
        }
    })
}

/// Deep-scan the active tree for tasks currently open.
pub async fn collect_open_tasks(roots: &[TaskRef]) -> Vec<TaskRef> {
    let mut open = Vec::new();
    for task in collect_tasks_post_order(roots).await {
        if task.read().await.status == TaskStatus::Open {
            open.push(task);
        }
    }
    open
}

/// Mark every not-yet-run descendant of a catch task cancelled so its
/// children settle and the catch handler gets invoked. Terminal and
/// executing descendants are left as-is.
async fn cancel_pending_descendants(catch_task: &TaskRef) {
    let children = catch_task.read().await.children.clone();
    let mut stack = children;
    while let Some(task) = stack.pop() {
        let mut guard = task.write().await;
        if matches!(guard.status, TaskStatus::Waiting | TaskStatus::Open) {
            guard.mark_cancelled();
        }
        stack.extend(guard.children.iter().cloned());
    }
}

/// Children before parents, so a close pass settles inner joins before the
/// parents that depend on them.
async fn collect_tasks_post_order(roots: &[TaskRef]) -> Vec<TaskRef> {
    let mut stack: Vec<TaskRef> = roots.to_vec();
    let mut visited = Vec::new();
    while let Some(task) = stack.pop() {
        let children = task.read().await.children.clone();
        visited.push(task);
        stack.extend(children);
    }
    visited.reverse();
    visited
}
