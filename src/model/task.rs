// ABOUTME: Live task entity, status lifecycle, and child container slots
// ABOUTME: Tasks mirror their static definition and are mutated by the scheduler and handlers

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::id::TaskId;
use crate::definition::TaskDef;

pub type TaskRef = Arc<RwLock<Task>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Waiting,
    Open,
    Executing,
    Completed,
    Error,
    Cancelled,
    Paused,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
        )
    }
}

/// A live task in the tree. Status and timestamps are mutated by the
/// scheduler; child containers and output are mutated by control-flow
/// handlers through the session.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    /// Runtime name; distinct from the definition name in loop contexts,
    /// where each iteration's children get the iteration number as a suffix.
    pub name: String,
    /// The suffix this task's runtime name was created with, if any. Loop
    /// handlers extend it with their iteration number so names stay unique
    /// across nesting levels.
    pub name_suffix: Option<String>,
    pub status: TaskStatus,
    pub def: Arc<TaskDef>,
    /// Parameters resolved through the session immediately before queuing.
    pub parameters: Map<String, Value>,
    pub output: Value,
    /// Active children the scheduler walks. Control-flow handlers replace
    /// this set wholesale via `Session::set_tasks`.
    pub children: Vec<TaskRef>,
    pub then_tasks: Vec<TaskRef>,
    pub else_tasks: Vec<TaskRef>,
    pub case_tasks: IndexMap<String, Vec<TaskRef>>,
    pub default_tasks: Vec<TaskRef>,
    /// Pre-expanded loop body; loop handlers instantiate fresh, suffixed
    /// copies per iteration rather than running these directly.
    pub loop_tasks: Vec<TaskRef>,
    pub catch_tasks: Vec<TaskRef>,
    pub finally_tasks: Vec<TaskRef>,
    /// Later siblings of a blocking task stay waiting until it terminates.
    pub blocking: bool,
    pub time_opened: Option<DateTime<Utc>>,
    pub time_started: Option<DateTime<Utc>>,
    pub time_completed: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub retry_count: u32,
    pub error: Option<String>,
    /// Error stashed by the catch handler to defer re-throwing across a
    /// finally block.
    pub delayed_error: Option<String>,
}

impl Task {
    pub fn new(id: TaskId, name: String, def: Arc<TaskDef>) -> Self {
        Self {
            id,
            name,
            name_suffix: None,
            status: TaskStatus::Waiting,
            def,
            parameters: Map::new(),
            output: Value::Null,
            children: Vec::new(),
            then_tasks: Vec::new(),
            else_tasks: Vec::new(),
            case_tasks: IndexMap::new(),
            default_tasks: Vec::new(),
            loop_tasks: Vec::new(),
            catch_tasks: Vec::new(),
            finally_tasks: Vec::new(),
            blocking: false,
            time_opened: None,
            time_started: None,
            time_completed: None,
            duration: None,
            retry_count: 0,
            error: None,
            delayed_error: None,
        }
    }

    pub fn into_ref(self) -> TaskRef {
        Arc::new(RwLock::new(self))
    }

    pub fn mark_opened(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Open;
        self.time_opened = Some(now);
    }

    pub fn mark_started(&mut self) {
        self.status = TaskStatus::Executing;
        self.time_started = Some(Utc::now());
    }

    /// Rerun protocol: the handler attached new children and wants another
    /// invocation once they terminate.
    pub fn mark_reopened(&mut self) {
        self.status = TaskStatus::Open;
    }

    pub fn mark_completed(&mut self, output: Value) {
        self.status = TaskStatus::Completed;
        self.output = output;
        self.stamp_completion();
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Error;
        self.error = Some(message.into());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
    }

    pub fn stamp_completion(&mut self) {
        let now = Utc::now();
        self.time_completed = Some(now);
        if let Some(started) = self.time_started.or(self.time_opened) {
            self.duration = (now - started).to_std().ok();
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task() -> Task {
        let def = Arc::new(TaskDef::leaf("t", "noop"));
        Task::new(TaskId::root(0), "t".to_string(), def)
    }

    #[test]
    fn test_status_lifecycle() {
        let mut task = make_task();
        assert_eq!(task.status, TaskStatus::Waiting);
        assert!(!task.status.is_terminal());

        task.mark_opened(Utc::now());
        assert_eq!(task.status, TaskStatus::Open);
        assert!(task.time_opened.is_some());

        task.mark_started();
        assert_eq!(task.status, TaskStatus::Executing);

        task.mark_completed(Value::Bool(true));
        assert!(task.status.is_terminal());
        assert_eq!(task.output, Value::Bool(true));
        assert!(task.time_completed.is_some());
        assert!(task.duration.is_some());
    }

    #[test]
    fn test_rerun_reopens_executing_task() {
        let mut task = make_task();
        task.mark_opened(Utc::now());
        task.mark_started();
        task.mark_reopened();
        assert_eq!(task.status, TaskStatus::Open);
    }
}
