//! The client-side supervisor: spawns the daemon with piped stdio, tracks
//! it through a pid file, and restarts it once when the pipe breaks.

use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::Duration;

use forge_core::FORGE_HOME;
use serde_json::Value;

use crate::rpc::{RpcError, JSONRPC_VERSION};
use crate::{DAEMON_LOG_FILE, DAEMON_PID_FILE};

const KILL_GRACE: Duration = Duration::from_secs(2);

/// The name of the daemon binary (`forged`, or `forged.exe` on Windows).
fn daemon_binary_name() -> &'static str {
    if cfg!(windows) {
        "forged.exe"
    } else {
        "forged"
    }
}

/// An error talking to the daemon
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("couldn't locate the user home directory")]
    NoHome,
    #[error("daemon communication failed: {0}")]
    Io(#[from] io::Error),
    #[error("daemon sent an unusable response: {0}")]
    BadResponse(String),
    #[error("daemon error {code}: {message}")]
    Daemon { code: i64, message: String },
}

impl From<RpcError> for SupervisorError {
    fn from(e: RpcError) -> Self {
        SupervisorError::Daemon {
            code: e.code,
            message: e.message,
        }
    }
}

struct DaemonConnection {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Spawns and talks to a daemon process on behalf of a short-lived client.
pub struct DaemonSupervisor {
    binary: PathBuf,
    home: PathBuf,
    connection: Option<DaemonConnection>,
    next_id: u64,
}

impl DaemonSupervisor {
    /// Supervisor for the `forged` binary next to the current executable,
    /// with state under `~/.forge`.
    pub fn new() -> Result<Self, SupervisorError> {
        let home = FORGE_HOME.clone().ok_or(SupervisorError::NoHome)?;
        let binary = std::env::current_exe()
            .map(|exe| {
                exe.parent()
                    .map(|dir| dir.join(daemon_binary_name()))
                    .unwrap_or_else(|| PathBuf::from(daemon_binary_name()))
            })
            .unwrap_or_else(|_| PathBuf::from(daemon_binary_name()));
        Ok(Self::with_binary(binary, home))
    }

    /// Supervisor for an explicit daemon binary and state directory.
    pub fn with_binary(binary: PathBuf, home: PathBuf) -> Self {
        Self {
            binary,
            home,
            connection: None,
            next_id: 0,
        }
    }

    fn pid_file(&self) -> PathBuf {
        self.home.join(DAEMON_PID_FILE)
    }

    fn log_file(&self) -> PathBuf {
        self.home.join(DAEMON_LOG_FILE)
    }

    /// Send a request, reattaching to the running child or spawning a new
    /// one as needed. A broken pipe tears the child down and respawns once
    /// before the error surfaces.
    pub fn request(&mut self, method: &str, params: Value) -> Result<Value, SupervisorError> {
        match self.request_once(method, params.clone()) {
            Ok(value) => Ok(value),
            Err(SupervisorError::Io(e)) => {
                warn!("daemon connection failed ({}), respawning once", e);
                self.teardown();
                self.request_once(method, params)
            }
            Err(other) => Err(other),
        }
    }

    fn request_once(&mut self, method: &str, params: Value) -> Result<Value, SupervisorError> {
        self.ensure_spawned()?;
        self.next_id += 1;
        let id = self.next_id;
        let request = serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": method,
            "params": params,
        });

        let connection = self.connection.as_mut().expect("spawned above");
        serde_json::to_writer(&mut connection.stdin, &request)
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        connection.stdin.write_all(b"\n")?;
        connection.stdin.flush()?;

        // responses correlate by id; notifications stream in between
        loop {
            let mut line = String::new();
            let read = connection.stdout.read_line(&mut line)?;
            if read == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "daemon closed its output").into());
            }
            let value: Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(e) => return Err(SupervisorError::BadResponse(e.to_string())),
            };
            if value.get("method").is_some() {
                // a $/log or $/progress notification, not our reply
                continue;
            }
            if value.get("id") == Some(&serde_json::json!(id)) {
                if let Some(error) = value.get("error") {
                    let rpc: RpcError = serde_json::from_value(error.clone())
                        .map_err(|e| SupervisorError::BadResponse(e.to_string()))?;
                    return Err(rpc.into());
                }
                return Ok(value.get("result").cloned().unwrap_or(Value::Null));
            }
        }
    }

    /// Ask the daemon to shut down and wait for it to exit.
    pub fn shutdown(&mut self) -> Result<(), SupervisorError> {
        if self.connection.is_none() {
            return Ok(());
        }
        let _ = self.request_once("shutdown", Value::Null)?;
        if let Some(mut connection) = self.connection.take() {
            drop(connection.stdin);
            let _ = connection.child.wait();
        }
        let _ = std::fs::remove_file(self.pid_file());
        Ok(())
    }

    fn ensure_spawned(&mut self) -> Result<(), SupervisorError> {
        if let Some(connection) = self.connection.as_mut() {
            if matches!(connection.child.try_wait(), Ok(None)) {
                return Ok(());
            }
            self.teardown();
        }

        std::fs::create_dir_all(&self.home)?;
        cleanup_stale_pid(&self.pid_file());

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file())?;

        let mut child = Command::new(&self.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log))
            .spawn()?;

        // create-or-replace; concurrent clients may race and the last
        // writer wins, a stale value is ignored by the next reader
        std::fs::write(self.pid_file(), child.id().to_string())?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));
        self.connection = Some(DaemonConnection {
            child,
            stdin,
            stdout,
        });
        Ok(())
    }

    /// SIGTERM, grace, SIGKILL, then drop the pid file.
    fn teardown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            drop(connection.stdin);
            #[cfg(unix)]
            unsafe {
                libc::kill(connection.child.id() as libc::pid_t, libc::SIGTERM);
            }
            let deadline = std::time::Instant::now() + KILL_GRACE;
            while std::time::Instant::now() < deadline {
                if let Ok(Some(_)) = connection.child.try_wait() {
                    break;
                }
                thread::sleep(Duration::from_millis(25));
            }
            let _ = connection.child.kill();
            let _ = connection.child.wait();
        }
        let _ = std::fs::remove_file(self.pid_file());
    }
}

impl Drop for DaemonSupervisor {
    fn drop(&mut self) {
        // leave a healthy daemon running for the next client; only clean
        // up when the pipe is already gone
        if let Some(connection) = self.connection.as_mut() {
            if !matches!(connection.child.try_wait(), Ok(None)) {
                self.teardown();
            }
        }
    }
}

/// Drop a pid file whose process is no longer alive. A live foreign pid is
/// left in place.
fn cleanup_stale_pid(pid_file: &Path) {
    let Ok(contents) = std::fs::read_to_string(pid_file) else {
        return;
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        let _ = std::fs::remove_file(pid_file);
        return;
    };
    if !process_alive(pid) {
        debug!("removing stale pid file for {}", pid);
        let _ = std::fs::remove_file(pid_file);
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}
