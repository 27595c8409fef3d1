//! Errors raised while constructing a task graph.

use forge_core::error::{ErrorCode, StructuredError};
use forge_core::graph::GraphError;
use forge_core::identifier::TaskId;
use itertools::Itertools;

/// An error occurred while turning a request into an executable task graph
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("project {0:?} not found")]
    ProjectNotFound(String),
    #[error("project {project:?} has no target {target:?}")]
    TargetNotFound { project: String, target: String },
    #[error("task {0} depends on itself")]
    TaskSelfDep(TaskId),
    #[error("task graph contains a cycle; unsatisfiable tasks: {}", remaining.iter().join(", "))]
    TaskCycle { remaining: Vec<TaskId> },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl StructuredError for ConstructionError {
    fn code(&self) -> ErrorCode {
        match self {
            ConstructionError::ProjectNotFound(_) => ErrorCode::ProjectNotFound,
            ConstructionError::TargetNotFound { .. } => ErrorCode::TargetNotFound,
            ConstructionError::TaskSelfDep(_) => ErrorCode::TaskSelfDep,
            ConstructionError::TaskCycle { .. } => ErrorCode::TaskCycle,
            ConstructionError::Graph(e) => e.code(),
        }
    }

    fn context(&self) -> serde_json::Value {
        match self {
            ConstructionError::ProjectNotFound(project) => {
                serde_json::json!({ "project": project })
            }
            ConstructionError::TargetNotFound { project, target } => {
                serde_json::json!({ "project": project, "target": target })
            }
            ConstructionError::TaskSelfDep(task) => serde_json::json!({ "task": task }),
            ConstructionError::TaskCycle { remaining } => {
                serde_json::json!({ "remaining": remaining })
            }
            ConstructionError::Graph(e) => e.context(),
        }
    }
}

pub type ConstructionResult<T> = Result<T, ConstructionError>;
