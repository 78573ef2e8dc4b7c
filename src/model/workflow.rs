// ABOUTME: Live workflow entity and run-level status tracking
// ABOUTME: Created when a run starts from a definition, mutated by the runner and hooks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::task::TaskRef;
use crate::definition::WorkflowDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Open,
    Executing,
    Completed,
    Error,
    Cancelled,
}

/// One workflow run. A failed run still yields this entity with
/// `status = Error` and the partial task tree intact, never a bare error
/// that loses the tree.
#[derive(Debug)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub def: Arc<WorkflowDef>,
    pub input: Value,
    pub output: Value,
    /// Shared variables visible to every task, written back from the
    /// session namespace when the run finishes.
    pub variables: Map<String, Value>,
    /// Root of the live task tree.
    pub tasks: Vec<TaskRef>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Workflow {
    pub fn new(def: Arc<WorkflowDef>, input: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: def.name.clone(),
            status: WorkflowStatus::Open,
            variables: def.variables.clone(),
            def,
            input,
            output: Value::Null,
            tasks: Vec::new(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_started(&mut self) {
        self.status = WorkflowStatus::Executing;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, output: Value) {
        self.status = WorkflowStatus::Completed;
        self.output = output;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = WorkflowStatus::Error;
        self.error = Some(message.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = WorkflowStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Open => write!(f, "open"),
            WorkflowStatus::Executing => write!(f, "executing"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Error => write!(f, "error"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
