// ABOUTME: Loop family handlers: item iteration, bounded count, and condition-checked
// ABOUTME: Each invocation installs one iteration's children and raises the rerun signal

use async_trait::async_trait;
use serde_json::{json, Value};

use super::conditional::{compare, is_truthy};
use super::{HandlerResult, RunContext, TaskHandler};
use crate::engine::error::{EngineError, Result};
use crate::model::TaskRef;

/// Iterates over a resolved `items` array, exposing the current element as
/// `output.item`.
pub struct EachHandler;

/// Runs the loop body a fixed `count` times.
pub struct RepeatHandler;

/// Re-evaluates its condition before every iteration; parameters are
/// re-resolved by the scheduler on each queueing, so the condition can read
/// values produced by earlier iterations.
pub struct WhileHandler;

#[async_trait]
impl TaskHandler for EachHandler {
    fn kind(&self) -> &'static str {
        "each"
    }

    async fn run(&self, task: &TaskRef, ctx: &RunContext) -> Result<HandlerResult> {
        let (name, params) = read_invocation(task).await;
        let items = params
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| EngineError::InvalidParameter {
                task: name,
                reason: "'items' must resolve to an array".to_string(),
            })?;

        let iteration = next_iteration(task).await;
        if iteration as usize >= items.len() {
            return finish(task, iteration).await;
        }

        let item = items[iteration as usize].clone();
        {
            let mut guard = task.write().await;
            guard.output = json!({ "iteration": iteration, "item": item });
        }
        spawn_iteration(task, ctx, iteration).await?;
        Ok(HandlerResult::Rerun)
    }
}

#[async_trait]
impl TaskHandler for RepeatHandler {
    fn kind(&self) -> &'static str {
        "repeat"
    }

    async fn run(&self, task: &TaskRef, ctx: &RunContext) -> Result<HandlerResult> {
        let (name, params) = read_invocation(task).await;
        let count =
            params
                .get("count")
                .and_then(Value::as_u64)
                .ok_or_else(|| EngineError::InvalidParameter {
                    task: name,
                    reason: "'count' must resolve to a non-negative integer".to_string(),
                })?;

        let iteration = next_iteration(task).await;
        if iteration >= count {
            return finish(task, iteration).await;
        }

        {
            let mut guard = task.write().await;
            guard.output = json!({ "iteration": iteration });
        }
        spawn_iteration(task, ctx, iteration).await?;
        Ok(HandlerResult::Rerun)
    }
}

#[async_trait]
impl TaskHandler for WhileHandler {
    fn kind(&self) -> &'static str {
        "while"
    }

    async fn run(&self, task: &TaskRef, ctx: &RunContext) -> Result<HandlerResult> {
        let (name, params) = read_invocation(task).await;

        let proceed = match (
            params.get("expression").and_then(Value::as_str),
            params.get("language").and_then(Value::as_str),
        ) {
            (Some(expression), Some(language)) => {
                let scope = ctx.session.namespace().await;
                let value = ctx
                    .scripting
                    .eval(expression, language, &scope)
                    .await
                    .map_err(|e| EngineError::ScriptError(e.to_string()))?;
                is_truthy(&value)
            }
            _ => {
                let operator = params
                    .get("operator")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::InvalidParameter {
                        task: name.clone(),
                        reason: "needs an expression or a left/operator/right condition"
                            .to_string(),
                    })?;
                let left = params.get("left").unwrap_or(&Value::Null);
                compare(left, operator, params.get("right")).map_err(|reason| {
                    EngineError::InvalidParameter { task: name, reason }
                })?
            }
        };

        let iteration = next_iteration(task).await;
        if !proceed {
            return finish(task, iteration).await;
        }

        {
            let mut guard = task.write().await;
            guard.output = json!({ "iteration": iteration });
        }
        spawn_iteration(task, ctx, iteration).await?;
        Ok(HandlerResult::Rerun)
    }
}

async fn read_invocation(task: &TaskRef) -> (String, serde_json::Map<String, Value>) {
    let guard = task.read().await;
    (guard.name.clone(), guard.parameters.clone())
}

/// 0 on the first invocation, previous iteration + 1 afterwards. The counter
/// lives in the task's own output so each re-invocation can resume.
async fn next_iteration(task: &TaskRef) -> u64 {
    let guard = task.read().await;
    match guard.output.get("iteration").and_then(Value::as_u64) {
        Some(previous) => previous + 1,
        None => 0,
    }
}

/// Sole termination path: report the final iteration count instead of
/// rerunning. Any `item` from the last iteration is dropped.
async fn finish(task: &TaskRef, iteration: u64) -> Result<HandlerResult> {
    let output = json!({ "iteration": iteration });
    task.write().await.output = output.clone();
    Ok(HandlerResult::Done(output))
}

/// Instantiate one iteration's children from the loop body definition, with
/// runtime names suffixed by the iteration number. A loop created inside
/// another loop's iteration extends the enclosing suffix, so iteration
/// names stay distinct from the pre-expanded body template and across
/// nesting levels.
async fn spawn_iteration(task: &TaskRef, ctx: &RunContext, iteration: u64) -> Result<()> {
    let (id, scope, body) = {
        let guard = task.read().await;
        (
            guard.id.clone(),
            guard.name_suffix.clone(),
            guard.def.loop_over.clone(),
        )
    };
    let body = body.ok_or_else(|| EngineError::InvalidParameter {
        task: id.to_string(),
        reason: "loop task has no body".to_string(),
    })?;

    let suffix = match scope {
        Some(outer) => format!("{}-{}", outer, iteration),
        None => iteration.to_string(),
    };
    let children = ctx
        .factory
        .create_tasks_suffixed(&body, Some(&id), Some(&suffix))?;
    ctx.session.set_tasks(task, children).await;
    Ok(())
}
