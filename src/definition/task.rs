// ABOUTME: Static task definition structures and retry policy declarations
// ABOUTME: Defines the immutable definition tree referenced by every live task

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A static, declarative task definition. Immutable once loaded; live tasks
/// hold an `Arc` reference to their definition, never a copy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskDef {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Treat a failed invocation of this task as successful.
    #[serde(default)]
    pub ignore_error: bool,
    pub retry: Option<RetryDef>,
    /// Plain children (the try body for `try` tasks, grouping otherwise).
    pub tasks: Option<TaskDefs>,
    #[serde(rename = "then")]
    pub then_tasks: Option<TaskDefs>,
    #[serde(rename = "else")]
    pub else_tasks: Option<TaskDefs>,
    pub cases: Option<IndexMap<String, TaskDefs>>,
    pub default_case: Option<TaskDefs>,
    /// Loop body template, instantiated once per iteration.
    pub loop_over: Option<TaskDefs>,
    #[serde(rename = "catch")]
    pub catch_tasks: Option<TaskDefs>,
    #[serde(rename = "finally")]
    pub finally_tasks: Option<TaskDefs>,
}

/// Child definitions come in two shapes: an ordered list (sequential,
/// blocking semantics) or a name-keyed map (parallel semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskDefs {
    List(Vec<Arc<TaskDef>>),
    Map(IndexMap<String, Arc<TaskDef>>),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryDef {
    pub count: Option<u32>,
    pub strategy: Option<RetryStrategy>,
    pub delay_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    Fixed,
    ExponentialBackoff,
    LinearBackoff,
}

impl TaskDef {
    pub fn leaf(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn has_plain_children(&self) -> bool {
        match &self.tasks {
            Some(defs) => !defs.is_empty(),
            None => false,
        }
    }
}

impl TaskDefs {
    pub fn is_empty(&self) -> bool {
        match self {
            TaskDefs::List(defs) => defs.is_empty(),
            TaskDefs::Map(defs) => defs.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TaskDefs::List(defs) => defs.len(),
            TaskDefs::Map(defs) => defs.len(),
        }
    }
}
