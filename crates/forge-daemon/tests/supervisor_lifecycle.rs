//! Supervisor tests against the real `forged` binary.

use std::path::PathBuf;

use forge_daemon::{DaemonSupervisor, DAEMON_PID_FILE};
use serde_json::{json, Value};

fn supervisor(home: &std::path::Path) -> DaemonSupervisor {
    DaemonSupervisor::with_binary(PathBuf::from(env!("CARGO_BIN_EXE_forged")), home.to_path_buf())
}

#[test]
fn spawns_writes_pid_and_answers_ping() {
    let home = tempfile::tempdir().unwrap();
    let mut supervisor = supervisor(home.path());

    let result = supervisor.request("ping", Value::Null).unwrap();
    assert_eq!(result, json!("pong"));

    let pid_file = home.path().join(DAEMON_PID_FILE);
    assert!(pid_file.exists());
    let pid: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(pid > 0);

    supervisor.shutdown().unwrap();
    assert!(!pid_file.exists(), "shutdown removes the pid file");
}

#[test]
fn requests_reuse_the_same_daemon() {
    let home = tempfile::tempdir().unwrap();
    let mut supervisor = supervisor(home.path());

    supervisor.request("ping", Value::Null).unwrap();
    let first_pid = std::fs::read_to_string(home.path().join(DAEMON_PID_FILE)).unwrap();
    supervisor.request("ping", Value::Null).unwrap();
    let second_pid = std::fs::read_to_string(home.path().join(DAEMON_PID_FILE)).unwrap();
    assert_eq!(first_pid, second_pid);

    supervisor.shutdown().unwrap();
}

#[test]
fn daemon_errors_surface_without_respawning() {
    let home = tempfile::tempdir().unwrap();
    let mut supervisor = supervisor(home.path());

    let error = supervisor.request("no/such-method", Value::Null).unwrap_err();
    match error {
        forge_daemon::supervisor::SupervisorError::Daemon { code, .. } => {
            assert_eq!(code, -32601);
        }
        other => panic!("unexpected error: {other}"),
    }

    // the daemon is still healthy
    assert_eq!(supervisor.request("ping", Value::Null).unwrap(), json!("pong"));
    supervisor.shutdown().unwrap();
}

#[test]
fn runs_tasks_end_to_end_through_the_daemon() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(workspace.path().join("libs/app")).unwrap();
    std::fs::write(
        workspace.path().join("libs/app/project.json"),
        r#"{"name": "app", "targets": {"build": {"command": "echo built"}}}"#,
    )
    .unwrap();

    let home = tempfile::tempdir().unwrap();
    let mut supervisor = supervisor(home.path());
    let result = supervisor
        .request(
            "run/task",
            json!({
                "workspaceRoot": workspace.path(),
                "projectName": "app",
                "target": "build",
                "verbose": true
            }),
        )
        .unwrap();
    assert_eq!(result["exitCode"], json!(0));
    assert!(result["output"].as_str().unwrap().contains("built"));

    supervisor.shutdown().unwrap();
}
