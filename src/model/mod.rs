// ABOUTME: Live entity model for workflow runs
// ABOUTME: Exports the task tree, identifier scheme, and workflow entities

pub mod id;
pub mod task;
pub mod workflow;

pub use id::TaskId;
pub use task::{Task, TaskRef, TaskStatus};
pub use workflow::{Workflow, WorkflowStatus};
