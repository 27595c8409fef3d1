//! The local executor: spawns tasks as shell commands and captures output.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use forge_core::config::ExecutionDefaults;
use forge_core::error::ErrorCode;

use crate::executor::{CancellationToken, TaskExecutor};
use crate::task::{Task, TaskError, TaskResult, TaskResultBuilder};

/// How long a process gets between SIGTERM and the hard kill.
const TERM_GRACE: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Runs tasks as processes under the platform shell.
pub struct LocalExecutor {
    workspace_root: PathBuf,
    defaults: ExecutionDefaults,
}

impl LocalExecutor {
    pub fn new(workspace_root: PathBuf, defaults: ExecutionDefaults) -> Self {
        Self {
            workspace_root,
            defaults,
        }
    }

    /// The command line a task resolves to: `options.commands` joined with
    /// `&&`, falling back to the raw `command`.
    fn command_line(task: &Task) -> Option<String> {
        if !task.target.options.commands.is_empty() {
            Some(task.target.options.commands.join(" && "))
        } else {
            task.target.command.clone()
        }
    }

    fn shell_invocation(&self, command_line: &str) -> Command {
        let shell = self.defaults.shell.clone().unwrap_or_else(default_shell);
        let mut command = Command::new(shell);
        if cfg!(windows) {
            command.arg("/C");
        } else {
            command.arg("-c");
        }
        command.arg(command_line);
        command
    }

    fn working_dir(&self, task: &Task) -> PathBuf {
        match &task.target.options.cwd {
            Some(cwd) => self.workspace_root.join(cwd),
            None => self.workspace_root.join(&task.project_root),
        }
    }

    fn timeout(&self, task: &Task) -> Duration {
        Duration::from_secs(
            task.target
                .timeout_seconds
                .unwrap_or(self.defaults.timeout_seconds),
        )
    }
}

fn default_shell() -> String {
    if cfg!(windows) {
        "cmd".to_string()
    } else {
        "/bin/sh".to_string()
    }
}

impl TaskExecutor for LocalExecutor {
    fn execute(&self, task: &Task, cancel: &CancellationToken) -> TaskResult {
        let mut builder = TaskResultBuilder::new(task.id.clone());

        let Some(command_line) = Self::command_line(task) else {
            // a target with no commands has nothing to run
            return builder.from_exit_code(0);
        };

        let mut command = self.shell_invocation(&command_line);
        command
            .current_dir(self.working_dir(task))
            .envs(&task.target.options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning {:?} for {}", command_line, task.id);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return builder.failed(
                    TaskError::new(ErrorCode::TaskFailed, format!("failed to spawn: {}", e)),
                    None,
                );
            }
        };

        let limit = self.defaults.output_byte_limit;
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let stdout_capture = thread::spawn(move || capture_stream(stdout, limit));
        let stderr_capture = thread::spawn(move || capture_stream(stderr, limit));

        let deadline = Instant::now() + self.timeout(task);
        let wait_outcome = loop {
            match child.try_wait() {
                Ok(Some(status)) => break WaitOutcome::Exited(status.code().unwrap_or(-1)),
                Ok(None) => {}
                Err(e) => break WaitOutcome::WaitFailed(e.to_string()),
            }
            if cancel.is_cancelled() {
                terminate(&mut child);
                break WaitOutcome::Cancelled;
            }
            if Instant::now() >= deadline {
                terminate(&mut child);
                break WaitOutcome::TimedOut;
            }
            thread::sleep(POLL_INTERVAL);
        };

        let (stdout, stdout_truncated) = stdout_capture
            .join()
            .unwrap_or_else(|_| (vec![], false));
        let (stderr, stderr_truncated) = stderr_capture
            .join()
            .unwrap_or_else(|_| (vec![], false));
        builder.stdout = stdout;
        builder.stderr = stderr;
        builder.truncated = stdout_truncated || stderr_truncated;

        match wait_outcome {
            WaitOutcome::Exited(code) => builder.from_exit_code(code),
            WaitOutcome::Cancelled => builder.failed(TaskError::cancelled(), None),
            WaitOutcome::TimedOut => builder.failed(
                TaskError::new(
                    ErrorCode::Timeout,
                    format!("timed out after {:?}", self.timeout(task)),
                ),
                None,
            ),
            WaitOutcome::WaitFailed(message) => {
                builder.failed(TaskError::new(ErrorCode::TaskFailed, message), None)
            }
        }
    }
}

enum WaitOutcome {
    Exited(i32),
    Cancelled,
    TimedOut,
    WaitFailed(String),
}

/// Read a stream to EOF, keeping at most `limit` bytes. The remainder is
/// drained so the child never blocks on a full pipe.
fn capture_stream<R: Read>(mut reader: R, limit: usize) -> (Vec<u8>, bool) {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0_u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if buffer.len() < limit {
                    let take = n.min(limit - buffer.len());
                    buffer.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
        }
    }
    (buffer, truncated)
}

/// SIGTERM, a grace period, then the hard kill.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        let deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
