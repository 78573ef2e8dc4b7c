// ABOUTME: Workflow definition structures and loading functionality
// ABOUTME: Defines the declarative WorkflowDef handed to the runner by the caller

pub mod error;
pub mod task;

pub use error::{DefinitionError, Result};
pub use task::{RetryDef, RetryStrategy, TaskDef, TaskDefs};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The declarative counterpart of a workflow run. The surrounding loader
/// layer hands this tree in; the engine never reads files on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub tasks: TaskDefs,
    /// Workflow-level retry policy, the last stop before defaults.
    pub retry: Option<RetryDef>,
}

impl WorkflowDef {
    /// Parse a workflow definition from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let def: WorkflowDef = serde_yaml::from_str(content)?;
        def.validate_structure()?;
        Ok(def)
    }

    /// Parse a workflow definition from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let def: WorkflowDef = serde_json::from_str(content)?;
        def.validate_structure()?;
        Ok(def)
    }

    fn validate_structure(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(DefinitionError::EmptyWorkflow);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_from_yaml() {
        let workflow = WorkflowDef::from_yaml(
            r#"
            name: nightly
            variables:
              env: staging
            tasks:
              - name: first
                type: noop
              - name: second
                type: noop
            "#,
        )
        .unwrap();

        assert_eq!(workflow.name, "nightly");
        assert_eq!(workflow.tasks.len(), 2);
        assert_eq!(workflow.variables["env"], "staging");
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let result = WorkflowDef::from_yaml(
            r#"
            name: empty
            tasks: []
            "#,
        );
        assert!(matches!(result, Err(DefinitionError::EmptyWorkflow)));
    }
}
