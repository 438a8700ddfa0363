use thiserror::Error;

use crate::core::task::TaskStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    UnknownTask(String),

    #[error("Task cannot depend on itself: {0}")]
    SelfDependency(String),

    #[error("Dependency would create a cycle: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("Cycle detected in graph: ordered {ordered} of {total} tasks")]
    Cycle { ordered: usize, total: usize },

    #[error("Invalid status transition for {task}: {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Agent not found: {id}")]
    AgentNotFound { id: String },

    #[error("Task is not assigned to any agent: {0}")]
    NotAssigned(String),
}

pub type Result<T> = std::result::Result<T, Error>;
