// ABOUTME: Workflow execution engine module
// ABOUTME: The scheduler cycle, task invoker, retry engine, and workflow runner

pub mod error;
pub mod invoker;
pub mod retry;
pub mod runner;
pub mod scheduler;

pub use error::{EngineError, Result};
pub use invoker::{HandlerRegistry, HandlerResolver, TaskInvoker};
pub use retry::{resolve_retry_options, RetryEngine, RetryOptions};
pub use runner::{Capabilities, WorkflowRunner};
pub use scheduler::{close_parent_tasks, collect_open_tasks, open_next_tasks, Scheduler};
