// ABOUTME: Main library module for the switchyard workflow engine
// ABOUTME: Exports all core modules and provides the public API

pub mod definition;
pub mod engine;
pub mod factory;
pub mod handlers;
pub mod interp;
pub mod model;
pub mod session;

// Re-export commonly used types
pub use definition::{RetryDef, RetryStrategy, TaskDef, TaskDefs, WorkflowDef};
pub use engine::{Capabilities, EngineError, HandlerRegistry, TaskInvoker, WorkflowRunner};
pub use factory::TasksFactory;
pub use handlers::{HandlerResult, RunContext, TaskHandler};
pub use model::{Task, TaskId, TaskRef, TaskStatus, Workflow, WorkflowStatus};
pub use session::Session;

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
