// ABOUTME: Hierarchical task identifier scheme with parent lookup by truncation
// ABOUTME: Identifiers are `<parent>/<local counter>`; root tasks carry a bare counter

use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: char = '/';

/// A hierarchical task identifier. The parent identifier is recovered by
/// truncating at the last separator, so the task tree needs no back-pointers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn root(counter: u64) -> Self {
        Self(counter.to_string())
    }

    pub fn child(&self, counter: u64) -> Self {
        Self(format!("{}{}{}", self.0, SEPARATOR, counter))
    }

    /// The parent identifier, or `None` for root tasks.
    pub fn parent(&self) -> Option<TaskId> {
        self.0
            .rfind(SEPARATOR)
            .map(|idx| Self(self.0[..idx].to_string()))
    }

    pub fn is_root(&self) -> bool {
        !self.0.contains(SEPARATOR)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
