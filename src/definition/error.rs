// ABOUTME: Error types for workflow definition loading and validation
// ABOUTME: Structural and shape errors that fail fast before the scheduler runs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Task definition in a list must carry a name")]
    MissingName,

    #[error("Duplicate task name: {name}")]
    DuplicateName { name: String },

    #[error("Invalid '{kind}' task '{name}': {reason}")]
    InvalidStructure {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Empty workflow: no tasks defined")]
    EmptyWorkflow,
}

pub type Result<T> = std::result::Result<T, DefinitionError>;
