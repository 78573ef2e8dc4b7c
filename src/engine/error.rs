// ABOUTME: Error types for workflow execution
// ABOUTME: Distinguishes domain failures from the interrupted control signal

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Task '{name}' failed: {message}")]
    TaskFailed { name: String, message: String },

    /// A child error re-raised by a control-flow handler after its blocks
    /// have run. The children that produced it are already settled, so
    /// re-invoking the handler cannot change the outcome; never retried.
    #[error("Task '{name}' failed: {message}")]
    ChildTaskFailed { name: String, message: String },

    #[error("Handler not found: {kind}")]
    HandlerNotFound { kind: String },

    #[error("Invalid parameter for task '{task}': {reason}")]
    InvalidParameter { task: String, reason: String },

    #[error("No case matched key '{key}' and no default case is present")]
    NoCaseMatched { key: String },

    #[error("Script evaluation failed: {0}")]
    ScriptError(String),

    #[error("Definition error: {0}")]
    DefinitionError(#[from] crate::definition::DefinitionError),

    /// Control signal, not a domain failure: the cancellation token was
    /// observed set at a checkpoint. The scheduler maps this to workflow
    /// status `cancelled`, never `error`.
    #[error("Run interrupted by cancellation")]
    Interrupted,
}

impl EngineError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, EngineError::Interrupted)
    }

    /// Whether the retry engine should consider another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TaskFailed { .. } | EngineError::ScriptError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
