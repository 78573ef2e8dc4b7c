// ABOUTME: Basic leaf handlers: noop and shared-variable assignment
// ABOUTME: The smallest useful built-ins; external handlers cover real side effects

use async_trait::async_trait;
use serde_json::Value;

use super::{HandlerResult, RunContext, TaskHandler};
use crate::engine::error::Result;
use crate::model::TaskRef;

/// Returns its resolved parameters as output.
pub struct NoopHandler;

#[async_trait]
impl TaskHandler for NoopHandler {
    fn kind(&self) -> &'static str {
        "noop"
    }

    async fn run(&self, task: &TaskRef, _ctx: &RunContext) -> Result<HandlerResult> {
        let params = task.read().await.parameters.clone();
        Ok(HandlerResult::Done(Value::Object(params)))
    }
}

/// Writes every resolved parameter into the workflow's shared variable map.
pub struct VariableHandler;

#[async_trait]
impl TaskHandler for VariableHandler {
    fn kind(&self) -> &'static str {
        "variable"
    }

    async fn run(&self, task: &TaskRef, ctx: &RunContext) -> Result<HandlerResult> {
        let params = task.read().await.parameters.clone();
        for (key, value) in &params {
            ctx.session.set_variable(key.clone(), value.clone()).await;
        }
        Ok(HandlerResult::Done(Value::Object(params)))
    }
}
