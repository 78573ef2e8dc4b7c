// ABOUTME: Switch task handler dispatching on a case key
// ABOUTME: Key comes from a resolved value or a scripted expression; falls back to the default case

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{HandlerResult, RunContext, TaskHandler};
use crate::engine::error::{EngineError, Result};
use crate::model::TaskRef;

pub struct SwitchHandler;

#[async_trait]
impl TaskHandler for SwitchHandler {
    fn kind(&self) -> &'static str {
        "switch"
    }

    async fn run(&self, task: &TaskRef, ctx: &RunContext) -> Result<HandlerResult> {
        let (name, params, case_tasks, default_tasks) = {
            let guard = task.read().await;
            (
                guard.name.clone(),
                guard.parameters.clone(),
                guard.case_tasks.clone(),
                guard.default_tasks.clone(),
            )
        };

        let key_value = match (
            params.get("expression").and_then(Value::as_str),
            params.get("language").and_then(Value::as_str),
        ) {
            (Some(expression), Some(language)) => {
                let scope = ctx.session.namespace().await;
                ctx.scripting
                    .eval(expression, language, &scope)
                    .await
                    .map_err(|e| EngineError::ScriptError(e.to_string()))?
            }
            _ => params
                .get("value")
                .cloned()
                .ok_or_else(|| EngineError::InvalidParameter {
                    task: name.clone(),
                    reason: "needs a value or an expression with a language".to_string(),
                })?,
        };

        let key = case_key(&key_value);
        let branch = match case_tasks.get(&key) {
            Some(tasks) => tasks.clone(),
            None if !default_tasks.is_empty() => default_tasks,
            None => return Err(EngineError::NoCaseMatched { key }),
        };

        ctx.session.set_tasks(task, branch).await;
        Ok(HandlerResult::Done(json!({ "case": key })))
    }
}

fn case_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_key_forms() {
        assert_eq!(case_key(&json!("green")), "green");
        assert_eq!(case_key(&json!(3)), "3");
        assert_eq!(case_key(&json!(true)), "true");
    }
}
