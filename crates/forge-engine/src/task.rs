//! Tasks and their results.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use forge_core::error::ErrorCode;
use forge_core::identifier::TaskId;
use forge_core::project::TargetConfiguration;

/// Lifecycle state of a task. Only the scheduler transitions these, and no
/// state ever regresses.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
    Cached,
}

impl TaskState {
    /// Whether this state ends the task's lifecycle
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Skipped | TaskState::Cached
        )
    }

    /// Whether a dependency in this state satisfies its successors
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cached)
    }
}

/// A concrete instance of a target on a project, schedulable and
/// executable.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    /// Snapshot of the effective target configuration at build time
    pub target: TargetConfiguration,
    /// The owning project's root, relative to the workspace root
    pub project_root: PathBuf,
    /// Tasks that must reach a satisfying terminal state first
    pub depends_on: BTreeSet<TaskId>,
    pub cacheable: bool,
    /// Optional soft-barrier hint used to break priority ties
    pub phase_index: Option<usize>,
}

impl Task {
    pub fn project(&self) -> &str {
        self.id.project()
    }

    pub fn target_name(&self) -> &str {
        self.id.target()
    }
}

/// A structured task error, carried into RPC error `data`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
}

impl TaskError {
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "cancelled")
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Represents the result of a task.
///
/// `status == COMPLETED` always pairs with `exit_code == Some(0)`, and
/// `from_cache` is only ever true on a `CACHED` status; the constructors on
/// [`TaskResultBuilder`] enforce both.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task: TaskId,
    pub status: TaskState,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    /// The duration between load time and when a result was received
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Whether either captured stream hit the byte limit
    pub truncated: bool,
    pub error: Option<TaskError>,
    pub from_cache: bool,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.status.satisfies_dependents()
    }
}

/// Accumulates timing and output while a task runs, then freezes into a
/// [`TaskResult`].
pub struct TaskResultBuilder {
    task: TaskId,
    start_time: SystemTime,
    load_time: Instant,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub truncated: bool,
}

impl TaskResultBuilder {
    pub fn new(task: TaskId) -> Self {
        Self {
            task,
            start_time: SystemTime::now(),
            load_time: Instant::now(),
            stdout: vec![],
            stderr: vec![],
            truncated: false,
        }
    }

    fn finish(
        self,
        status: TaskState,
        exit_code: Option<i32>,
        error: Option<TaskError>,
        from_cache: bool,
    ) -> TaskResult {
        TaskResult {
            task: self.task,
            status,
            start_time: self.start_time,
            end_time: SystemTime::now(),
            duration: self.load_time.elapsed(),
            exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            truncated: self.truncated,
            error,
            from_cache,
        }
    }

    /// Finish from a process exit code: 0 is COMPLETED, anything else
    /// FAILED with a `TASK_FAILED` error.
    pub fn from_exit_code(self, code: i32) -> TaskResult {
        if code == 0 {
            self.finish(TaskState::Completed, Some(0), None, false)
        } else {
            let error = TaskError::new(
                ErrorCode::TaskFailed,
                format!("command exited with code {}", code),
            );
            self.finish(TaskState::Failed, Some(code), Some(error), false)
        }
    }

    /// Finish as failed with an explicit error.
    pub fn failed(self, error: TaskError, exit_code: Option<i32>) -> TaskResult {
        self.finish(TaskState::Failed, exit_code, Some(error), false)
    }

    /// Finish as a cache hit.
    pub fn cached(self) -> TaskResult {
        self.finish(TaskState::Cached, Some(0), None, true)
    }

    /// Finish as skipped, optionally recording why.
    pub fn skipped(self, error: Option<TaskError>) -> TaskResult {
        self.finish(TaskState::Skipped, None, error, false)
    }
}
