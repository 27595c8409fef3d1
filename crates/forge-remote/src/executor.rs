//! The remote executor: turns tasks into REv2 actions and drives them
//! through the Action Cache, the CAS, and the Execution service.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use forge_core::config::WorkspaceConfig;
use forge_core::error::{ErrorCode, StructuredError};
use forge_core::files::{substitute_tokens, InputResolver};
use forge_core::graph::ProjectGraph;
use forge_core::project::Project;
use forge_engine::executor::{CancellationToken, TaskExecutor};
use forge_engine::local::LocalExecutor;
use forge_engine::task::{Task, TaskError, TaskResult, TaskResultBuilder};
use futures::StreamExt;
use itertools::Itertools;
use parking_lot::Mutex;
use prost::Message;

use crate::client::{GrpcRev2Client, Rev2Services};
use crate::digest::digest_message;
use crate::endpoint::{self, ResolvedEndpoint};
use crate::error::{RemoteError, RemoteResult};
use crate::merkle::{build_input_tree, MerkleTree};
use crate::proto::google::longrunning::operation;
use crate::proto::{rev2, EXECUTE_RESPONSE_TYPE_URL};

type SharedServices = Arc<dyn Rev2Services>;
type Connector = Box<dyn Fn(&ResolvedEndpoint) -> RemoteResult<SharedServices> + Send + Sync>;

/// Executes tasks against REv2 endpoints, falling back to the local
/// executor for targets that resolve to no endpoint.
pub struct RemoteExecutor {
    workspace_root: PathBuf,
    graph: Arc<ProjectGraph>,
    config: WorkspaceConfig,
    runtime: tokio::runtime::Runtime,
    clients: Mutex<HashMap<String, SharedServices>>,
    connector: Connector,
    fallback: LocalExecutor,
    /// Skip the Action Cache lookup, forcing a fresh execution
    force: bool,
}

impl RemoteExecutor {
    /// Executor using real gRPC channels.
    pub fn new(
        workspace_root: PathBuf,
        graph: Arc<ProjectGraph>,
        config: WorkspaceConfig,
        force: bool,
    ) -> RemoteResult<Self> {
        Self::with_connector(
            workspace_root,
            graph,
            config,
            force,
            Box::new(|endpoint| {
                GrpcRev2Client::connect(endpoint).map(|client| Arc::new(client) as SharedServices)
            }),
        )
    }

    /// Executor with a custom service connector. Tests plug an in-memory
    /// implementation in here.
    pub fn with_connector(
        workspace_root: PathBuf,
        graph: Arc<ProjectGraph>,
        config: WorkspaceConfig,
        force: bool,
        connector: Connector,
    ) -> RemoteResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let fallback = LocalExecutor::new(
            workspace_root.clone(),
            config.execution_defaults.clone(),
        );
        Ok(Self {
            workspace_root,
            graph,
            config,
            runtime,
            clients: Mutex::new(HashMap::new()),
            connector,
            fallback,
            force,
        })
    }

    fn services_for(&self, endpoint: &ResolvedEndpoint) -> RemoteResult<SharedServices> {
        let key = endpoint.connect_uri();
        if let Some(existing) = self.clients.lock().get(&key) {
            return Ok(existing.clone());
        }
        let services = (self.connector)(endpoint)?;
        self.probe_capabilities(services.as_ref(), endpoint)?;
        self.clients.lock().insert(key, services.clone());
        Ok(services)
    }

    /// One `GetCapabilities` per endpoint. Servers that advertise digest
    /// functions must include SHA-256, the only one forge computes.
    fn probe_capabilities(
        &self,
        services: &dyn Rev2Services,
        endpoint: &ResolvedEndpoint,
    ) -> RemoteResult<()> {
        let capabilities = self
            .runtime
            .block_on(services.get_capabilities(rev2::GetCapabilitiesRequest {
                instance_name: endpoint.instance_name.clone(),
            }))?;
        if let Some(cache) = &capabilities.cache_capabilities {
            let sha256 = rev2::digest_function::Value::Sha256 as i32;
            if !cache.digest_functions.is_empty() && !cache.digest_functions.contains(&sha256) {
                return Err(RemoteError::Protocol(
                    "server does not accept SHA-256 digests".to_string(),
                ));
            }
        }
        debug!("capability probe ok for {}", endpoint.connect_uri());
        Ok(())
    }

    /// Build the Command message for a task. Environment variables and
    /// output paths are sorted so the digest is stable.
    fn build_command(&self, task: &Task, project: &Project) -> Option<rev2::Command> {
        let command_line = if !task.target.options.commands.is_empty() {
            task.target.options.commands.join(" && ")
        } else {
            task.target.command.clone()?
        };

        let shell = self
            .config
            .execution_defaults
            .shell
            .clone()
            .unwrap_or_else(|| {
                if cfg!(windows) {
                    "cmd".to_string()
                } else {
                    "/bin/sh".to_string()
                }
            });
        let flag = if cfg!(windows) { "/C" } else { "-c" };

        let environment_variables = task
            .target
            .options
            .env
            .iter()
            .map(|(name, value)| rev2::command::EnvironmentVariable {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();

        let working_directory = task
            .target
            .options
            .cwd
            .clone()
            .unwrap_or_else(|| task.project_root.to_string_lossy().to_string());

        let output_paths = task
            .target
            .outputs
            .iter()
            .map(|pattern| substitute_tokens(pattern, project))
            .sorted()
            .dedup()
            .collect();

        Some(rev2::Command {
            arguments: vec![shell, flag.to_string(), command_line],
            environment_variables,
            working_directory,
            output_paths,
        })
    }

    fn build_action(
        &self,
        endpoint: &ResolvedEndpoint,
        command_digest: rev2::Digest,
        input_root_digest: rev2::Digest,
        cacheable: bool,
    ) -> rev2::Action {
        let platform = rev2::Platform {
            properties: endpoint
                .platform
                .iter()
                .map(|(name, value)| rev2::platform::Property {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        };
        rev2::Action {
            command_digest: Some(command_digest),
            input_root_digest: Some(input_root_digest),
            timeout: Some(prost_types::Duration {
                seconds: endpoint.timeout.as_secs() as i64,
                nanos: 0,
            }),
            do_not_cache: !cacheable,
            platform: Some(platform),
        }
    }

    fn resolve_inputs(&self, task: &Task, project: &Project) -> RemoteResult<MerkleTree> {
        let resolver = InputResolver::new(
            &self.workspace_root,
            &self.graph,
            &self.config.named_inputs,
        );
        let default_inputs = vec!["default".to_string()];
        let patterns = if task.target.inputs.is_empty() {
            &default_inputs
        } else {
            &task.target.inputs
        };
        let files = resolver.resolve(project, patterns)?;
        build_input_tree(&self.workspace_root, &files)
    }

    fn execute_remote(
        &self,
        task: &Task,
        cancel: &CancellationToken,
        endpoint: &ResolvedEndpoint,
    ) -> TaskResult {
        let mut builder = TaskResultBuilder::new(task.id.clone());

        let Some(project) = self.graph.get(task.project()) else {
            return builder.failed(
                TaskError::new(
                    ErrorCode::RemoteProtocol,
                    format!("project {:?} is not in the graph", task.project()),
                ),
                None,
            );
        };

        let Some(command) = self.build_command(task, project) else {
            // nothing to run remotely
            return builder.from_exit_code(0);
        };

        let prepared = self.resolve_inputs(task, project).map(|tree| {
            let (command_digest, command_bytes) = digest_message(&command);
            let action = self.build_action(
                endpoint,
                command_digest.clone(),
                tree.root_digest.clone(),
                task.cacheable,
            );
            let (action_digest, action_bytes) = digest_message(&action);
            PreparedAction {
                tree,
                command_digest,
                command_bytes,
                action_digest,
                action_bytes,
            }
        });
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return builder.failed(TaskError::new(e.code(), e.to_string()), None),
        };

        debug!(
            "executing {} remotely, action digest {}",
            task.id, prepared.action_digest.hash
        );

        let services = match self.services_for(endpoint) {
            Ok(services) => services,
            Err(e) => return builder.failed(TaskError::new(e.code(), e.to_string()), None),
        };

        let limit = self.config.execution_defaults.output_byte_limit;
        let outcome = self.runtime.block_on(run_protocol(
            services.as_ref(),
            endpoint,
            &prepared,
            task.cacheable,
            self.force,
            cancel,
            limit,
        ));

        match outcome {
            Ok(ProtocolOutcome::CacheHit(result)) => {
                builder.stdout = result.stdout;
                builder.stderr = result.stderr;
                builder.truncated = result.truncated;
                builder.cached()
            }
            Ok(ProtocolOutcome::Executed(result)) => {
                builder.stdout = result.stdout;
                builder.stderr = result.stderr;
                builder.truncated = result.truncated;
                builder.from_exit_code(result.exit_code)
            }
            Ok(ProtocolOutcome::Cancelled) => builder.failed(TaskError::cancelled(), None),
            Err(e) => builder.failed(TaskError::new(e.code(), e.to_string()), None),
        }
    }
}

impl TaskExecutor for RemoteExecutor {
    fn execute(&self, task: &Task, cancel: &CancellationToken) -> TaskResult {
        match endpoint::resolve(
            &self.config.remote_execution,
            task.target.remote_execution.as_ref(),
        ) {
            Some(endpoint) => self.execute_remote(task, cancel, &endpoint),
            None => self.fallback.execute(task, cancel),
        }
    }
}

struct PreparedAction {
    tree: MerkleTree,
    command_digest: rev2::Digest,
    command_bytes: Vec<u8>,
    action_digest: rev2::Digest,
    action_bytes: Vec<u8>,
}

enum ProtocolOutcome {
    CacheHit(CollectedOutput),
    Executed(CollectedOutput),
    Cancelled,
}

struct CollectedOutput {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

async fn run_protocol(
    services: &dyn Rev2Services,
    endpoint: &ResolvedEndpoint,
    prepared: &PreparedAction,
    cacheable: bool,
    force: bool,
    cancel: &CancellationToken,
    output_limit: usize,
) -> RemoteResult<ProtocolOutcome> {
    // 1. consult the action cache
    if cacheable && !force {
        let hit = services
            .get_action_result(rev2::GetActionResultRequest {
                instance_name: endpoint.instance_name.clone(),
                action_digest: Some(prepared.action_digest.clone()),
                inline_stdout: true,
                inline_stderr: true,
            })
            .await?;
        if let Some(result) = hit {
            debug!("action cache hit for {}", prepared.action_digest.hash);
            let output =
                collect_output(services, endpoint, &result, output_limit).await?;
            return Ok(ProtocolOutcome::CacheHit(output));
        }
    }
    if cancel.is_cancelled() {
        return Ok(ProtocolOutcome::Cancelled);
    }

    // 2. upload the action, command, and input tree
    upload_blobs(services, endpoint, prepared).await?;
    if cancel.is_cancelled() {
        return Ok(ProtocolOutcome::Cancelled);
    }

    // 3. execute and consume the operation stream, resuming a dropped
    // stream through WaitExecution a bounded number of times
    let mut stream = services
        .execute(rev2::ExecuteRequest {
            instance_name: endpoint.instance_name.clone(),
            skip_cache_lookup: force,
            action_digest: Some(prepared.action_digest.clone()),
        })
        .await?;

    let mut final_operation = None;
    let mut operation_name = String::new();
    let mut resumes_left = 3_u8;
    'consume: loop {
        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                return Ok(ProtocolOutcome::Cancelled);
            }
            let operation = item?;
            if !operation.name.is_empty() {
                operation_name = operation.name.clone();
            }
            if operation.done {
                final_operation = Some(operation);
                break 'consume;
            }
        }
        if operation_name.is_empty() || resumes_left == 0 {
            break;
        }
        resumes_left -= 1;
        debug!("operation stream ended early, resuming {}", operation_name);
        stream = services
            .wait_execution(rev2::WaitExecutionRequest {
                name: operation_name.clone(),
            })
            .await?;
    }
    let operation = final_operation.ok_or_else(|| {
        RemoteError::Protocol("operation stream ended before completion".to_string())
    })?;

    let response = match operation.result {
        Some(operation::Result::Error(status)) => {
            return Err(RemoteError::Protocol(format!(
                "execution failed ({}): {}",
                status.code, status.message
            )));
        }
        Some(operation::Result::Response(any)) => {
            if !any.type_url.is_empty() && any.type_url != EXECUTE_RESPONSE_TYPE_URL {
                return Err(RemoteError::Protocol(format!(
                    "unexpected operation response type {:?}",
                    any.type_url
                )));
            }
            rev2::ExecuteResponse::decode(any.value.as_slice())
                .map_err(|e| RemoteError::Protocol(format!("undecodable ExecuteResponse: {e}")))?
        }
        None => {
            return Err(RemoteError::Protocol(
                "completed operation carried no result".to_string(),
            ));
        }
    };

    if let Some(status) = &response.status {
        if status.code != 0 {
            return Err(RemoteError::Protocol(format!(
                "execution rejected ({}): {}",
                status.code, status.message
            )));
        }
    }
    let result = response
        .result
        .ok_or_else(|| RemoteError::Protocol("response carried no ActionResult".to_string()))?;

    // 4. write back to the action cache on success
    if result.exit_code == 0 && cacheable && !response.cached_result {
        let update = services
            .update_action_result(rev2::UpdateActionResultRequest {
                instance_name: endpoint.instance_name.clone(),
                action_digest: Some(prepared.action_digest.clone()),
                action_result: Some(result.clone()),
            })
            .await;
        if let Err(e) = update {
            warn!("action cache write failed for {}: {}", prepared.action_digest.hash, e);
        }
    }

    let output = collect_output(services, endpoint, &result, output_limit).await?;
    Ok(ProtocolOutcome::Executed(output))
}

/// Find what the CAS is missing and upload only that. A server without
/// `FindMissingBlobs` gets everything.
async fn upload_blobs(
    services: &dyn Rev2Services,
    endpoint: &ResolvedEndpoint,
    prepared: &PreparedAction,
) -> RemoteResult<()> {
    let mut all: Vec<(rev2::Digest, Vec<u8>)> = prepared.tree.blobs.clone();
    all.push((prepared.command_digest.clone(), prepared.command_bytes.clone()));
    all.push((prepared.action_digest.clone(), prepared.action_bytes.clone()));

    let wanted: Vec<(rev2::Digest, Vec<u8>)> = match services
        .find_missing_blobs(rev2::FindMissingBlobsRequest {
            instance_name: endpoint.instance_name.clone(),
            blob_digests: all.iter().map(|(digest, _)| digest.clone()).collect(),
        })
        .await
    {
        Ok(response) => {
            let missing: Vec<&rev2::Digest> = response.missing_blob_digests.iter().collect();
            all.iter()
                .filter(|(digest, _)| missing.contains(&digest))
                .cloned()
                .collect()
        }
        Err(e) => {
            debug!("FindMissingBlobs unavailable ({}), uploading everything", e);
            all.clone()
        }
    };

    if wanted.is_empty() {
        return Ok(());
    }

    let response = services
        .batch_update_blobs(rev2::BatchUpdateBlobsRequest {
            instance_name: endpoint.instance_name.clone(),
            requests: wanted
                .into_iter()
                .map(|(digest, data)| rev2::batch_update_blobs_request::Request {
                    digest: Some(digest),
                    data,
                })
                .collect(),
        })
        .await?;

    // partial failures fail the task
    for entry in &response.responses {
        if let Some(status) = &entry.status {
            if status.code != 0 {
                let hash = entry
                    .digest
                    .as_ref()
                    .map(|d| d.hash.clone())
                    .unwrap_or_default();
                return Err(RemoteError::CasUpload(format!(
                    "blob {} rejected ({}): {}",
                    hash, status.code, status.message
                )));
            }
        }
    }
    Ok(())
}

/// Pull captured output out of an ActionResult: inline bytes when present,
/// bounded `BatchReadBlobs` for digests, a truncation note otherwise.
async fn collect_output(
    services: &dyn Rev2Services,
    endpoint: &ResolvedEndpoint,
    result: &rev2::ActionResult,
    limit: usize,
) -> RemoteResult<CollectedOutput> {
    let mut wanted = Vec::new();
    for (raw, digest) in [
        (&result.stdout_raw, &result.stdout_digest),
        (&result.stderr_raw, &result.stderr_digest),
    ] {
        if raw.is_empty() {
            if let Some(digest) = digest {
                if digest.size_bytes > 0 && digest.size_bytes <= limit as i64 {
                    wanted.push(digest.clone());
                }
            }
        }
    }

    let mut fetched: HashMap<String, Vec<u8>> = HashMap::new();
    if !wanted.is_empty() {
        let response = services
            .batch_read_blobs(rev2::BatchReadBlobsRequest {
                instance_name: endpoint.instance_name.clone(),
                digests: wanted,
            })
            .await?;
        for entry in response.responses {
            let ok = entry
                .status
                .as_ref()
                .map(|status| status.code == 0)
                .unwrap_or(true);
            if let (true, Some(digest)) = (ok, entry.digest) {
                fetched.insert(digest.hash, entry.data);
            }
        }
    }

    let mut truncated = false;
    let mut pick = |raw: &[u8], digest: &Option<rev2::Digest>| -> Vec<u8> {
        if !raw.is_empty() {
            if raw.len() > limit {
                truncated = true;
                return raw[..limit].to_vec();
            }
            return raw.to_vec();
        }
        if let Some(digest) = digest {
            if let Some(data) = fetched.get(&digest.hash) {
                return data.clone();
            }
            if digest.size_bytes > limit as i64 {
                truncated = true;
            }
        }
        Vec::new()
    };

    let stdout = pick(&result.stdout_raw, &result.stdout_digest);
    let stderr = pick(&result.stderr_raw, &result.stderr_digest);

    Ok(CollectedOutput {
        exit_code: result.exit_code,
        stdout,
        stderr,
        truncated,
    })
}
