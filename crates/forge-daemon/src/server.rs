//! The daemon: discovery caching, request dispatch, and execution.

use std::collections::HashMap;
use std::io::BufRead;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use forge_core::config::WorkspaceConfig;
use forge_core::discovery::ProjectDiscoverer;
use forge_core::graph::ProjectGraph;
use forge_core::plugins::{PluginHost, PluginRegistry};
use forge_engine::executor::CancellationToken;
use forge_engine::scheduler::{ExecutionReport, Scheduler, SchedulerOptions};
use forge_engine::task::TaskResult;
use forge_engine::{TaskGraph, TaskGraphBuilder, TaskState};
use forge_remote::RemoteExecutor;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use crate::rpc::{response_line, OutputSink, RpcError, RpcRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Format {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceParams {
    workspace_root: PathBuf,
    #[serde(default)]
    format: Format,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShowProjectParams {
    workspace_root: PathBuf,
    project_name: String,
    #[serde(default)]
    format: Format,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTaskParams {
    workspace_root: PathBuf,
    project_name: String,
    target: String,
    #[serde(default)]
    verbose: bool,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    keep_going: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunManyParams {
    workspace_root: PathBuf,
    target: String,
    #[serde(default)]
    projects: Option<Vec<String>>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    all: bool,
    #[serde(default)]
    verbose: bool,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    keep_going: bool,
    #[serde(default)]
    parallelism: Option<usize>,
    /// Restrict to projects affected by changes relative to `base`
    #[serde(default)]
    affected: bool,
    #[serde(default)]
    base: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidChangeParams {
    workspace_root: PathBuf,
}

/// One cached discovery, with the mtimes of the configuration files it
/// depends on for the best-effort freshness probe.
struct CachedDiscovery {
    config: WorkspaceConfig,
    graph: Arc<ProjectGraph>,
    probes: Vec<(PathBuf, Option<SystemTime>)>,
}

impl CachedDiscovery {
    fn is_fresh(&self) -> bool {
        self.probes
            .iter()
            .all(|(path, recorded)| mtime_of(path) == *recorded)
    }
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

struct DaemonState {
    registry: PluginRegistry,
    discoveries: RwLock<HashMap<PathBuf, Arc<CachedDiscovery>>>,
    /// Requests dispatched but not yet answered, the shutdown barrier
    active_requests: AtomicUsize,
    run_tokens: Mutex<Vec<CancellationToken>>,
    shutting_down: AtomicBool,
}

/// The long-lived daemon. All state is per-instance and injected at
/// construction; nothing process-wide.
pub struct Daemon {
    state: Arc<DaemonState>,
}

impl Daemon {
    pub fn new(registry: PluginRegistry) -> Self {
        Self {
            state: Arc::new(DaemonState {
                registry,
                discoveries: RwLock::new(HashMap::new()),
                active_requests: AtomicUsize::new(0),
                run_tokens: Mutex::new(Vec::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Serve requests line by line until `shutdown` or EOF. Each request
    /// runs on its own thread; the output stream is mutex-serialised.
    pub fn run<R, W>(&self, reader: R, writer: W) -> std::io::Result<()>
    where
        R: BufRead,
        W: std::io::Write + Send + 'static,
    {
        let sink = Arc::new(OutputSink::new(writer));
        let mut handles: Vec<thread::JoinHandle<()>> = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let request: RpcRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    sink.write_line(&response_line(&Value::Null, Err(RpcError::parse_error(e))))?;
                    continue;
                }
            };

            if request.jsonrpc.as_deref() != Some(crate::rpc::JSONRPC_VERSION) {
                let id = request.id.clone().unwrap_or(Value::Null);
                sink.write_line(&response_line(&id, Err(RpcError::invalid_request())))?;
                continue;
            }

            if request.is_notification() {
                self.state.handle_notification(&request);
                continue;
            }

            let is_shutdown = request.method == "shutdown";
            // counted on the read thread so the shutdown barrier can never
            // run ahead of a request that arrived before it
            self.state.active_requests.fetch_add(1, Ordering::SeqCst);

            let state = self.state.clone();
            let sink_handle = sink.clone();
            handles.push(thread::spawn(move || {
                let id = request.id.clone().unwrap_or(Value::Null);
                let outcome = state.handle_request(&request, &sink_handle);
                let _ = sink_handle.write_line(&response_line(&id, outcome));
                state.active_requests.fetch_sub(1, Ordering::SeqCst);
            }));

            if is_shutdown {
                break;
            }
        }

        for handle in handles {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl DaemonState {
    fn handle_notification(&self, request: &RpcRequest) {
        match request.method.as_str() {
            "workspace/didChange" => {
                if let Ok(params) = params_of::<DidChangeParams>(request) {
                    debug!("invalidating discovery for {}", params.workspace_root.display());
                    self.discoveries.write().remove(&params.workspace_root);
                }
            }
            other => debug!("ignoring unknown notification {:?}", other),
        }
    }

    fn handle_request(&self, request: &RpcRequest, sink: &OutputSink) -> Result<Value, RpcError> {
        match request.method.as_str() {
            "ping" => Ok(json!("pong")),
            "shutdown" => self.shutdown(),
            "show/projects" => self.show_projects(params_of(request)?),
            "show/project" => self.show_project(params_of(request)?),
            "project/graph" => self.project_graph(params_of(request)?),
            "run/task" => self.run_task(params_of(request)?, sink),
            "run/many" => self.run_many(params_of(request)?, sink),
            other => Err(RpcError::method_not_found(other)),
        }
    }

    fn shutdown(&self) -> Result<Value, RpcError> {
        info!("shutdown requested, cancelling in-flight runs");
        self.shutting_down.store(true, Ordering::SeqCst);
        for token in self.run_tokens.lock().iter() {
            token.cancel();
        }
        // wait for every other request to answer before replying
        while self.active_requests.load(Ordering::SeqCst) > 1 {
            thread::sleep(Duration::from_millis(10));
        }
        Ok(json!("shutting down"))
    }

    fn discover(&self, workspace_root: &Path) -> Result<Arc<CachedDiscovery>, RpcError> {
        if let Some(cached) = self.discoveries.read().get(workspace_root) {
            if cached.is_fresh() {
                return Ok(cached.clone());
            }
        }

        let config = WorkspaceConfig::load(workspace_root).map_err(|e| RpcError::domain(&e))?;
        let host = PluginHost::load(&self.registry, &config.plugins);
        let discovered = ProjectDiscoverer::new(workspace_root, &config, &host)
            .discover()
            .map_err(|e| RpcError::domain(&e))?;

        let probes = discovered
            .config_files(workspace_root)
            .into_iter()
            .map(|path| {
                let mtime = mtime_of(&path);
                (path, mtime)
            })
            .collect();

        let cached = Arc::new(CachedDiscovery {
            config,
            graph: Arc::new(discovered.graph),
            probes,
        });
        self.discoveries
            .write()
            .insert(workspace_root.to_path_buf(), cached.clone());
        Ok(cached)
    }

    fn show_projects(&self, params: WorkspaceParams) -> Result<Value, RpcError> {
        let discovery = self.discover(&params.workspace_root)?;
        match params.format {
            Format::Json => {
                let projects: Vec<&forge_core::Project> = discovery.graph.all().collect();
                serde_json::to_value(projects).map_err(RpcError::internal)
            }
            Format::Text => {
                let lines: Vec<String> =
                    discovery.graph.all().map(|p| p.name.clone()).collect();
                Ok(json!(lines.join("\n")))
            }
        }
    }

    fn show_project(&self, params: ShowProjectParams) -> Result<Value, RpcError> {
        let discovery = self.discover(&params.workspace_root)?;
        let project = discovery
            .graph
            .get(&params.project_name)
            .ok_or_else(|| {
                RpcError::domain(&forge_core::graph::GraphError::ProjectNotFound(
                    params.project_name.clone(),
                ))
            })?;
        match params.format {
            Format::Json => serde_json::to_value(project).map_err(RpcError::internal),
            Format::Text => {
                let mut lines = vec![
                    format!("name: {}", project.name),
                    format!("root: {}", project.root.display()),
                    format!("type: {:?}", project.project_type),
                ];
                if !project.tags.is_empty() {
                    lines.push(format!(
                        "tags: {}",
                        project.tags.iter().cloned().collect::<Vec<_>>().join(", ")
                    ));
                }
                lines.push(format!(
                    "targets: {}",
                    project.targets.keys().cloned().collect::<Vec<_>>().join(", ")
                ));
                Ok(json!(lines.join("\n")))
            }
        }
    }

    fn project_graph(&self, params: WorkspaceParams) -> Result<Value, RpcError> {
        let discovery = self.discover(&params.workspace_root)?;
        match params.format {
            Format::Json => {
                let adjacency: serde_json::Map<String, Value> = discovery
                    .graph
                    .all()
                    .map(|project| {
                        let deps: Vec<&str> = discovery
                            .graph
                            .deps_of(&project.name)
                            .iter()
                            .map(|d| d.target.as_str())
                            .collect();
                        (project.name.clone(), json!(deps))
                    })
                    .collect();
                Ok(Value::Object(adjacency))
            }
            Format::Text => {
                let lines: Vec<String> = discovery
                    .graph
                    .all()
                    .map(|project| {
                        let deps: Vec<&str> = discovery
                            .graph
                            .deps_of(&project.name)
                            .iter()
                            .map(|d| d.target.as_str())
                            .collect();
                        if deps.is_empty() {
                            project.name.clone()
                        } else {
                            format!("{} -> {}", project.name, deps.join(", "))
                        }
                    })
                    .collect();
                Ok(json!(lines.join("\n")))
            }
        }
    }

    fn run_task(&self, params: RunTaskParams, sink: &OutputSink) -> Result<Value, RpcError> {
        let discovery = self.discover(&params.workspace_root)?;
        let builder = TaskGraphBuilder::new(&discovery.graph);
        let graph = builder
            .build_single(&params.project_name, &params.target)
            .map_err(|e| RpcError::domain(&e))?;

        if params.dry_run {
            let plan = graph.execution_plan().map_err(|e| RpcError::domain(&e))?;
            return Ok(json!({
                "message": plan.render_text(),
                "exitCode": 0,
                "dryRun": true,
            }));
        }

        let report = self.execute(
            &params.workspace_root,
            &discovery,
            &graph,
            RunOptions {
                force: params.force,
                keep_going: params.keep_going,
                parallelism: None,
            },
            sink,
        )?;

        let task_id = format!("{}:{}", params.project_name, params.target);
        let output = report
            .results
            .iter()
            .find(|r| r.task.to_string() == task_id)
            .map(|r| captured_output(r))
            .unwrap_or_default();
        let exit_code = report.exit_code();
        let message = if exit_code == 0 {
            format!("{} succeeded", task_id)
        } else {
            format!("{} failed", task_id)
        };
        let mut response = json!({ "message": message, "exitCode": exit_code });
        if params.verbose || exit_code != 0 {
            response["output"] = json!(output);
        }
        Ok(response)
    }

    fn run_many(&self, params: RunManyParams, sink: &OutputSink) -> Result<Value, RpcError> {
        let discovery = self.discover(&params.workspace_root)?;
        let selection: Vec<String> = if params.all {
            discovery.graph.all().map(|p| p.name.clone()).collect()
        } else if let Some(projects) = &params.projects {
            projects.clone()
        } else if let Some(tags) = &params.tags {
            let mut selected = Vec::new();
            for tag in tags {
                for project in discovery.graph.by_tag(tag) {
                    if !selected.contains(&project.name) {
                        selected.push(project.name.clone());
                    }
                }
            }
            selected
        } else {
            Vec::new()
        };

        let builder = TaskGraphBuilder::new(&discovery.graph);
        let graph = if params.affected {
            let base = params
                .base
                .clone()
                .unwrap_or_else(|| discovery.config.affected.default_base.clone());
            let changed =
                forge_core::discovery::changed_files(&params.workspace_root, &base)
                    .map_err(RpcError::internal)?;
            builder.build_affected(&params.target, &changed)
        } else {
            builder.build(&params.target, &selection)
        }
        .map_err(|e| RpcError::domain(&e))?;
        let plan = graph.execution_plan().map_err(|e| RpcError::domain(&e))?;

        if params.dry_run {
            return Ok(json!({
                "message": plan.render_text(),
                "taskCount": graph.len(),
                "exitCode": 0,
                "dryRun": true,
            }));
        }

        let report = self.execute(
            &params.workspace_root,
            &discovery,
            &graph,
            RunOptions {
                force: params.force,
                keep_going: params.keep_going,
                parallelism: params.parallelism,
            },
            sink,
        )?;

        let failed: Vec<Value> = report
            .failed()
            .map(|r| {
                json!({
                    "taskId": r.task,
                    "exitCode": r.exit_code,
                    "error": r.error,
                    "output": captured_output(r),
                })
            })
            .collect();
        let mut tasks: Vec<Value> = Vec::new();
        for result in &report.results {
            let mut entry = json!({
                "taskId": result.task,
                "status": result.status,
                "durationMs": result.duration.as_millis() as u64,
                "fromCache": result.from_cache,
            });
            if params.verbose {
                entry["output"] = json!(captured_output(result));
            }
            tasks.push(entry);
        }

        Ok(json!({
            "successCount": report.success_count(),
            "failureCount": report.failure_count(),
            "skippedCount": report.skipped_count(),
            "cachedCount": report.cached_count(),
            "failed": failed,
            "tasks": tasks,
            "exitCode": report.exit_code(),
        }))
    }

    fn execute(
        &self,
        workspace_root: &Path,
        discovery: &CachedDiscovery,
        graph: &TaskGraph,
        options: RunOptions,
        sink: &OutputSink,
    ) -> Result<ExecutionReport, RpcError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(RpcError::internal("daemon is shutting down"));
        }

        let executor = RemoteExecutor::new(
            workspace_root.to_path_buf(),
            discovery.graph.clone(),
            discovery.config.clone(),
            options.force,
        )
        .map_err(|e| RpcError::domain(&e))?;

        let cancel = CancellationToken::new();
        self.run_tokens.lock().push(cancel.clone());

        let workers = options
            .parallelism
            .and_then(NonZeroUsize::new)
            .unwrap_or_else(|| {
                NonZeroUsize::new(num_cpus::get().max(1)).expect("cpu count is never 0")
            });
        let scheduler = Scheduler::new(SchedulerOptions {
            workers,
            keep_going: options.keep_going,
        });

        let progress = |result: &TaskResult, current: usize, total: usize| {
            let status = match result.status {
                TaskState::Completed => "completed",
                TaskState::Cached => "cached",
                TaskState::Failed => "failed",
                TaskState::Skipped => "skipped",
                _ => "finished",
            };
            sink.progress(current, total, &format!("{} {}", result.task, status));
            if result.status == TaskState::Failed {
                let reason = result
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "task failed".to_string());
                sink.log("error", &format!("{}: {}", result.task, reason));
            }
        };

        let report = scheduler
            .execute(graph, &executor, &cancel, Some(&progress))
            .map_err(|e| RpcError::domain(&e));

        self.run_tokens.lock().retain(|t| !t.same(&cancel));

        report
    }
}

struct RunOptions {
    force: bool,
    keep_going: bool,
    parallelism: Option<usize>,
}

fn captured_output(result: &TaskResult) -> String {
    let mut output = String::from_utf8_lossy(&result.stdout).into_owned();
    if !result.stderr.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&String::from_utf8_lossy(&result.stderr));
    }
    if result.truncated {
        output.push_str("\n[output truncated]");
    }
    output
}

fn params_of<T: serde::de::DeserializeOwned>(request: &RpcRequest) -> Result<T, RpcError> {
    let params = request.params.clone().unwrap_or(Value::Null);
    serde_json::from_value(params).map_err(RpcError::invalid_params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_text() {
        let params: WorkspaceParams =
            serde_json::from_str(r#"{"workspaceRoot": "/tmp/ws"}"#).unwrap();
        assert_eq!(params.format, Format::Text);
    }

    #[test]
    fn run_many_params_accept_selection_modes() {
        let params: RunManyParams = serde_json::from_str(
            r#"{"workspaceRoot": "/ws", "target": "build", "tags": ["scope:shared"], "keepGoing": true}"#,
        )
        .unwrap();
        assert_eq!(params.tags.unwrap(), vec!["scope:shared"]);
        assert!(params.keep_going);
        assert!(!params.all);
    }
}
