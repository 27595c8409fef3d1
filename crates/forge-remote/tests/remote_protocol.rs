//! Protocol-sequence tests against an in-memory REv2 implementation.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use forge_core::config::WorkspaceConfig;
use forge_core::graph::{ProjectGraph, ProjectGraphBuilder};
use forge_core::project::Project;
use forge_engine::executor::{CancellationToken, TaskExecutor};
use forge_engine::task::Task;
use forge_engine::TaskState;
use forge_remote::client::{OperationStream, Rev2Services};
use forge_remote::error::{RemoteError, RemoteResult};
use forge_remote::proto::google::longrunning::{operation, Operation};
use forge_remote::proto::google::rpc::Status;
use forge_remote::proto::{rev2, EXECUTE_RESPONSE_TYPE_URL};
use forge_remote::RemoteExecutor;
use parking_lot::Mutex;
use prost::Message;

#[derive(Default)]
struct FakeRemote {
    cas: Mutex<HashMap<String, Vec<u8>>>,
    action_cache: Mutex<HashMap<String, rev2::ActionResult>>,
    execute_calls: AtomicUsize,
    executed_digests: Mutex<Vec<String>>,
    exit_code: i32,
    reject_first_upload: bool,
    error_operation: bool,
}

#[async_trait]
impl Rev2Services for FakeRemote {
    async fn get_capabilities(
        &self,
        _request: rev2::GetCapabilitiesRequest,
    ) -> RemoteResult<rev2::ServerCapabilities> {
        Ok(rev2::ServerCapabilities::default())
    }

    async fn get_action_result(
        &self,
        request: rev2::GetActionResultRequest,
    ) -> RemoteResult<Option<rev2::ActionResult>> {
        let hash = request.action_digest.unwrap().hash;
        Ok(self.action_cache.lock().get(&hash).cloned())
    }

    async fn update_action_result(
        &self,
        request: rev2::UpdateActionResultRequest,
    ) -> RemoteResult<rev2::ActionResult> {
        let hash = request.action_digest.unwrap().hash;
        let result = request.action_result.unwrap();
        self.action_cache.lock().insert(hash, result.clone());
        Ok(result)
    }

    async fn find_missing_blobs(
        &self,
        request: rev2::FindMissingBlobsRequest,
    ) -> RemoteResult<rev2::FindMissingBlobsResponse> {
        let cas = self.cas.lock();
        Ok(rev2::FindMissingBlobsResponse {
            missing_blob_digests: request
                .blob_digests
                .into_iter()
                .filter(|digest| !cas.contains_key(&digest.hash))
                .collect(),
        })
    }

    async fn batch_update_blobs(
        &self,
        request: rev2::BatchUpdateBlobsRequest,
    ) -> RemoteResult<rev2::BatchUpdateBlobsResponse> {
        let mut responses = Vec::new();
        let mut first = true;
        for blob in request.requests {
            let digest = blob.digest.unwrap();
            let status = if self.reject_first_upload && first {
                Status {
                    code: 8, // RESOURCE_EXHAUSTED
                    message: "quota exceeded".into(),
                    details: vec![],
                }
            } else {
                self.cas.lock().insert(digest.hash.clone(), blob.data);
                Status::default()
            };
            first = false;
            responses.push(rev2::batch_update_blobs_response::Response {
                digest: Some(digest),
                status: Some(status),
            });
        }
        Ok(rev2::BatchUpdateBlobsResponse { responses })
    }

    async fn batch_read_blobs(
        &self,
        request: rev2::BatchReadBlobsRequest,
    ) -> RemoteResult<rev2::BatchReadBlobsResponse> {
        let cas = self.cas.lock();
        Ok(rev2::BatchReadBlobsResponse {
            responses: request
                .digests
                .into_iter()
                .map(|digest| {
                    let data = cas.get(&digest.hash).cloned().unwrap_or_default();
                    rev2::batch_read_blobs_response::Response {
                        digest: Some(digest),
                        data,
                        status: Some(Status::default()),
                    }
                })
                .collect(),
        })
    }

    async fn get_tree(
        &self,
        _request: rev2::GetTreeRequest,
    ) -> RemoteResult<Vec<rev2::Directory>> {
        Ok(vec![])
    }

    async fn execute(&self, request: rev2::ExecuteRequest) -> RemoteResult<OperationStream> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let digest = request.action_digest.unwrap();
        self.executed_digests.lock().push(digest.hash.clone());

        if self.error_operation {
            let failed = Operation {
                name: "operations/failed".into(),
                metadata: None,
                done: true,
                result: Some(operation::Result::Error(Status {
                    code: 14, // UNAVAILABLE
                    message: "no workers".into(),
                    details: vec![],
                })),
            };
            return Ok(Box::pin(futures::stream::iter(vec![Ok(failed)])));
        }

        let response = rev2::ExecuteResponse {
            result: Some(rev2::ActionResult {
                exit_code: self.exit_code,
                stdout_raw: b"remote stdout".to_vec(),
                ..Default::default()
            }),
            cached_result: false,
            status: None,
            message: String::new(),
        };
        let queued = Operation {
            name: "operations/1".into(),
            metadata: None,
            done: false,
            result: None,
        };
        let done = Operation {
            name: "operations/1".into(),
            metadata: None,
            done: true,
            result: Some(operation::Result::Response(prost_types::Any {
                type_url: EXECUTE_RESPONSE_TYPE_URL.to_string(),
                value: response.encode_to_vec(),
            })),
        };
        Ok(Box::pin(futures::stream::iter(vec![Ok(queued), Ok(done)])))
    }

    async fn wait_execution(
        &self,
        _request: rev2::WaitExecutionRequest,
    ) -> RemoteResult<OperationStream> {
        Err(RemoteError::Protocol("not used by these tests".into()))
    }
}

fn workspace_graph(dir: &Path) -> ProjectGraph {
    std::fs::create_dir_all(dir.join("libs/app/src")).unwrap();
    std::fs::write(dir.join("libs/app/src/main.rs"), "fn main() {}").unwrap();
    let mut builder = ProjectGraphBuilder::new();
    builder.add_project(Project::new("app", "libs/app"));
    builder.build()
}

fn remote_config() -> WorkspaceConfig {
    serde_json::from_str(
        r#"{"remoteExecution": {"enabled": true, "endpoint": "fake.example:8980"}}"#,
    )
    .unwrap()
}

fn build_task(cacheable: bool) -> Task {
    let target: forge_core::project::TargetConfiguration = serde_json::from_str(&format!(
        r#"{{"command": "cargo build", "cache": {}, "inputs": ["default"]}}"#,
        cacheable
    ))
    .unwrap();
    Task {
        id: "app:build".parse().unwrap(),
        target,
        project_root: "libs/app".into(),
        depends_on: BTreeSet::new(),
        cacheable,
        phase_index: None,
    }
}

fn executor_with(
    dir: &Path,
    fake: Arc<FakeRemote>,
    force: bool,
) -> RemoteExecutor {
    let graph = Arc::new(workspace_graph(dir));
    RemoteExecutor::with_connector(
        dir.to_path_buf(),
        graph,
        remote_config(),
        force,
        Box::new(move |_endpoint| Ok(fake.clone() as Arc<dyn Rev2Services>)),
    )
    .unwrap()
}

#[test]
fn first_run_executes_and_second_hits_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRemote::default());
    let executor = executor_with(dir.path(), fake.clone(), false);
    let cancel = CancellationToken::new();

    let first = executor.execute(&build_task(true), &cancel);
    assert_eq!(first.status, TaskState::Completed);
    assert!(!first.from_cache);
    assert_eq!(String::from_utf8_lossy(&first.stdout), "remote stdout");
    assert_eq!(fake.execute_calls.load(Ordering::SeqCst), 1);

    let second = executor.execute(&build_task(true), &cancel);
    assert_eq!(second.status, TaskState::Cached);
    assert!(second.from_cache);
    assert_eq!(second.exit_code, Some(0));
    assert_eq!(
        fake.execute_calls.load(Ordering::SeqCst),
        1,
        "cache hit must not dispatch Execute"
    );

    // the same request computes the same action digest
    let digests = fake.executed_digests.lock();
    assert_eq!(digests.len(), 1);
}

#[test]
fn identical_requests_compute_identical_action_digests() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRemote::default());
    // force = true skips the cache and always dispatches Execute
    let executor = executor_with(dir.path(), fake.clone(), true);
    let cancel = CancellationToken::new();

    executor.execute(&build_task(true), &cancel);
    executor.execute(&build_task(true), &cancel);

    let digests = fake.executed_digests.lock();
    assert_eq!(digests.len(), 2);
    assert_eq!(digests[0], digests[1]);
}

#[test]
fn uploads_deduplicate_against_the_cas() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRemote::default());
    let executor = executor_with(dir.path(), fake.clone(), true);
    let cancel = CancellationToken::new();

    executor.execute(&build_task(true), &cancel);
    let after_first = fake.cas.lock().len();
    executor.execute(&build_task(true), &cancel);
    assert_eq!(
        fake.cas.lock().len(),
        after_first,
        "second run found every blob already present"
    );
}

#[test]
fn partial_upload_failure_fails_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRemote {
        reject_first_upload: true,
        ..Default::default()
    });
    let executor = executor_with(dir.path(), fake, false);
    let result = executor.execute(&build_task(true), &CancellationToken::new());

    assert_eq!(result.status, TaskState::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.code, forge_core::error::ErrorCode::CasUpload);
}

#[test]
fn operation_error_maps_to_failed_with_protocol_code() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRemote {
        error_operation: true,
        ..Default::default()
    });
    let executor = executor_with(dir.path(), fake, false);
    let result = executor.execute(&build_task(false), &CancellationToken::new());

    assert_eq!(result.status, TaskState::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.code, forge_core::error::ErrorCode::RemoteProtocol);
    assert!(error.message.contains("no workers"));
}

#[test]
fn nonzero_remote_exit_is_task_failed_and_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRemote {
        exit_code: 2,
        ..Default::default()
    });
    let executor = executor_with(dir.path(), fake.clone(), false);
    let result = executor.execute(&build_task(true), &CancellationToken::new());

    assert_eq!(result.status, TaskState::Failed);
    assert_eq!(result.exit_code, Some(2));
    assert!(
        fake.action_cache.lock().is_empty(),
        "failed executions never update the action cache"
    );
}

#[test]
fn successful_cacheable_execution_updates_the_action_cache() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRemote::default());
    let executor = executor_with(dir.path(), fake.clone(), false);
    executor.execute(&build_task(true), &CancellationToken::new());
    assert_eq!(fake.action_cache.lock().len(), 1);
}

#[test]
fn uncacheable_targets_skip_the_action_cache_entirely() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRemote::default());
    let executor = executor_with(dir.path(), fake.clone(), false);
    let result = executor.execute(&build_task(false), &CancellationToken::new());
    assert_eq!(result.status, TaskState::Completed);
    assert!(fake.action_cache.lock().is_empty());
}
