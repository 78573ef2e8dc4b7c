// ABOUTME: Try/catch/finally emulation over a task's own children
// ABOUTME: Tracks handled blocks in output, stashes errors across finally, re-raises at the end

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;

use super::conditional::is_truthy;
use super::{HandlerResult, RunContext, TaskHandler};
use crate::engine::error::{EngineError, Result};
use crate::model::{TaskRef, TaskStatus};

const CATCH_BLOCK: &str = "catch";
const FINALLY_BLOCK: &str = "finally";

/// The catch task. Its plain children are the try body; the scheduler
/// invokes this handler only once all current children have terminated, so
/// each invocation observes one finished block (body, catch, or finally) and
/// decides what runs next.
pub struct TryHandler;

#[async_trait]
impl TaskHandler for TryHandler {
    fn kind(&self) -> &'static str {
        "try"
    }

    fn is_catch(&self) -> bool {
        true
    }

    async fn run(&self, task: &TaskRef, ctx: &RunContext) -> Result<HandlerResult> {
        let (name, params, children, catch_tasks, finally_tasks, output) = {
            let guard = task.read().await;
            (
                guard.name.clone(),
                guard.parameters.clone(),
                guard.children.clone(),
                guard.catch_tasks.clone(),
                guard.finally_tasks.clone(),
                guard.output.clone(),
            )
        };

        let mut handled = handled_blocks(&output);
        let child_error = first_child_error(&children).await;

        // The finally block just ran: its own errors propagate immediately,
        // a stashed error re-raises, otherwise the pass is complete.
        if handled.iter().any(|b| b == FINALLY_BLOCK) {
            if let Some(message) = child_error {
                return Err(EngineError::ChildTaskFailed { name, message });
            }
            if let Some(message) = task.write().await.delayed_error.take() {
                return Err(EngineError::ChildTaskFailed { name, message });
            }
            return Ok(HandlerResult::Done(json!({ "handledBlocks": handled })));
        }

        if let Some(message) = child_error {
            let catch_available = !handled.iter().any(|b| b == CATCH_BLOCK)
                && !catch_tasks.is_empty()
                && error_matches(&message, &params, ctx).await?;

            if catch_available {
                handled.push(CATCH_BLOCK.to_string());
                record_handled(task, &handled).await;
                ctx.session.set_tasks(task, catch_tasks).await;
                return Ok(HandlerResult::Rerun);
            }

            // No matching catch (or the catch branch itself failed): stash
            // the error so finally still runs before it re-raises.
            task.write().await.delayed_error = Some(message);
        }

        if !finally_tasks.is_empty() {
            handled.push(FINALLY_BLOCK.to_string());
            record_handled(task, &handled).await;
            ctx.session.set_tasks(task, finally_tasks).await;
            return Ok(HandlerResult::Rerun);
        }

        if let Some(message) = task.write().await.delayed_error.take() {
            return Err(EngineError::ChildTaskFailed { name, message });
        }
        Ok(HandlerResult::Done(json!({ "handledBlocks": handled })))
    }
}

fn handled_blocks(output: &Value) -> Vec<String> {
    output
        .get("handledBlocks")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

async fn record_handled(task: &TaskRef, handled: &[String]) {
    task.write().await.output = json!({ "handledBlocks": handled });
}

/// First error among the current children, scanning top-down in sibling
/// order. When several siblings failed in one batch, the first one seen
/// wins.
async fn first_child_error(children: &[TaskRef]) -> Option<String> {
    let mut queue: VecDeque<TaskRef> = children.iter().cloned().collect();
    while let Some(task) = queue.pop_front() {
        let guard = task.read().await;
        if guard.status == TaskStatus::Error {
            return Some(
                guard
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("task '{}' failed", guard.name)),
            );
        }
        queue.extend(guard.children.iter().cloned());
    }
    None
}

/// A catch branch may be restricted to errors matching a name fragment or a
/// boolean scripted expression; with neither parameter it matches anything.
async fn error_matches(
    message: &str,
    params: &serde_json::Map<String, Value>,
    ctx: &RunContext,
) -> Result<bool> {
    if let Some(error_name) = params.get("error_name").and_then(Value::as_str) {
        return Ok(message.contains(error_name));
    }

    if let (Some(expression), Some(language)) = (
        params.get("expression").and_then(Value::as_str),
        params.get("language").and_then(Value::as_str),
    ) {
        let mut scope = ctx.session.namespace().await;
        if let Some(fields) = scope.as_object_mut() {
            fields.insert("error".to_string(), json!({ "message": message }));
        }
        let value = ctx
            .scripting
            .eval(expression, language, &scope)
            .await
            .map_err(|e| EngineError::ScriptError(e.to_string()))?;
        return Ok(is_truthy(&value));
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handled_blocks_round_trip() {
        assert!(handled_blocks(&Value::Null).is_empty());
        let output = json!({ "handledBlocks": ["catch", "finally"] });
        assert_eq!(handled_blocks(&output), vec!["catch", "finally"]);
    }
}
