// ABOUTME: Task handler trait, handler outcome type, and built-in handler exports
// ABOUTME: Control-flow handlers cooperate with the scheduler through tree mutation plus the rerun signal

pub mod basic;
pub mod catch;
pub mod conditional;
pub mod loops;
pub mod switch;

pub use basic::{NoopHandler, VariableHandler};
pub use catch::TryHandler;
pub use conditional::IfHandler;
pub use loops::{EachHandler, RepeatHandler, WhileHandler};
pub use switch::SwitchHandler;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::engine::error::Result;
use crate::factory::TasksFactory;
use crate::interp::ScriptEvaluator;
use crate::model::TaskRef;
use crate::session::Session;

/// What a handler invocation produced. `Rerun` is a control signal, not an
/// error: the handler has just attached new children via the session and
/// wants another invocation once they all terminate.
#[derive(Debug)]
pub enum HandlerResult {
    Done(Value),
    Rerun,
}

/// Capabilities a handler may reach during one invocation. Scoped to a
/// single workflow run; never process-global.
#[derive(Clone)]
pub struct RunContext {
    pub session: Arc<Session>,
    pub factory: Arc<TasksFactory>,
    pub scripting: Arc<dyn ScriptEvaluator>,
    pub cancel: CancellationToken,
}

/// A task handler. Handlers are stateless; anything an invocation needs to
/// resume lives in the task's own output field.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Whether this handler implements try/catch/finally semantics over its
    /// children. The scheduler short-circuits descendant errors to the
    /// nearest ancestor for which this is true.
    fn is_catch(&self) -> bool {
        false
    }

    async fn run(&self, task: &TaskRef, ctx: &RunContext) -> Result<HandlerResult>;
}
