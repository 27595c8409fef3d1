//! The gRPC client for the three REv2 services.
//!
//! The service surface is a trait so the executor's protocol sequence can
//! run against an in-memory implementation in tests.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint as TonicEndpoint};

use crate::endpoint::ResolvedEndpoint;
use crate::error::{RemoteError, RemoteResult};
use crate::proto::google::longrunning::Operation;
use crate::proto::{methods, rev2};

/// A lazy, cancellable sequence of operation updates from `Execute` or
/// `WaitExecution`. Dropping the stream abandons the operation.
pub type OperationStream = Pin<Box<dyn Stream<Item = RemoteResult<Operation>> + Send>>;

/// The REv2 operations the executor consumes.
#[async_trait]
pub trait Rev2Services: Send + Sync {
    async fn get_capabilities(
        &self,
        request: rev2::GetCapabilitiesRequest,
    ) -> RemoteResult<rev2::ServerCapabilities>;

    /// `Ok(None)` is the cache miss, surfaced as `NOT_FOUND` on the wire.
    async fn get_action_result(
        &self,
        request: rev2::GetActionResultRequest,
    ) -> RemoteResult<Option<rev2::ActionResult>>;

    async fn update_action_result(
        &self,
        request: rev2::UpdateActionResultRequest,
    ) -> RemoteResult<rev2::ActionResult>;

    async fn find_missing_blobs(
        &self,
        request: rev2::FindMissingBlobsRequest,
    ) -> RemoteResult<rev2::FindMissingBlobsResponse>;

    async fn batch_update_blobs(
        &self,
        request: rev2::BatchUpdateBlobsRequest,
    ) -> RemoteResult<rev2::BatchUpdateBlobsResponse>;

    async fn batch_read_blobs(
        &self,
        request: rev2::BatchReadBlobsRequest,
    ) -> RemoteResult<rev2::BatchReadBlobsResponse>;

    /// Drains the paged stream into the full directory list.
    async fn get_tree(&self, request: rev2::GetTreeRequest)
        -> RemoteResult<Vec<rev2::Directory>>;

    async fn execute(&self, request: rev2::ExecuteRequest) -> RemoteResult<OperationStream>;

    async fn wait_execution(
        &self,
        request: rev2::WaitExecutionRequest,
    ) -> RemoteResult<OperationStream>;
}

/// [`Rev2Services`] over a tonic channel.
pub struct GrpcRev2Client {
    channel: Channel,
}

impl GrpcRev2Client {
    /// Create a client for an endpoint. The connection is established
    /// lazily on the first RPC.
    pub fn connect(endpoint: &ResolvedEndpoint) -> RemoteResult<Self> {
        let uri = endpoint.connect_uri();
        let channel = TonicEndpoint::from_shared(uri.clone())
            .map_err(|e| RemoteError::InvalidEndpoint {
                endpoint: uri,
                reason: e.to_string(),
            })?
            .timeout(endpoint.timeout)
            .connect_timeout(Duration::from_secs(10))
            .concurrency_limit(endpoint.max_connections)
            .connect_lazy();
        Ok(Self { channel })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, tonic::Status>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("channel not ready: {e}")))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        grpc.unary(
            tonic::Request::new(request),
            PathAndQuery::from_static(path),
            codec,
        )
        .await
        .map(tonic::Response::into_inner)
    }

    async fn server_streaming<Req, Resp>(
        &self,
        path: &'static str,
        request: Req,
    ) -> Result<tonic::Streaming<Resp>, tonic::Status>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("channel not ready: {e}")))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        grpc.server_streaming(
            tonic::Request::new(request),
            PathAndQuery::from_static(path),
            codec,
        )
        .await
        .map(tonic::Response::into_inner)
    }

    fn boxed_operations(streaming: tonic::Streaming<Operation>) -> OperationStream {
        Box::pin(streaming.map(|item| item.map_err(RemoteError::from_status)))
    }
}

#[async_trait]
impl Rev2Services for GrpcRev2Client {
    async fn get_capabilities(
        &self,
        request: rev2::GetCapabilitiesRequest,
    ) -> RemoteResult<rev2::ServerCapabilities> {
        self.unary(methods::GET_CAPABILITIES, request)
            .await
            .map_err(RemoteError::from_status)
    }

    async fn get_action_result(
        &self,
        request: rev2::GetActionResultRequest,
    ) -> RemoteResult<Option<rev2::ActionResult>> {
        match self
            .unary::<_, rev2::ActionResult>(methods::GET_ACTION_RESULT, request)
            .await
        {
            Ok(result) => Ok(Some(result)),
            Err(status) if status.code() == tonic::Code::NotFound => Ok(None),
            Err(status) => Err(RemoteError::from_status(status)),
        }
    }

    async fn update_action_result(
        &self,
        request: rev2::UpdateActionResultRequest,
    ) -> RemoteResult<rev2::ActionResult> {
        self.unary(methods::UPDATE_ACTION_RESULT, request)
            .await
            .map_err(RemoteError::from_status)
    }

    async fn find_missing_blobs(
        &self,
        request: rev2::FindMissingBlobsRequest,
    ) -> RemoteResult<rev2::FindMissingBlobsResponse> {
        self.unary(methods::FIND_MISSING_BLOBS, request)
            .await
            .map_err(RemoteError::from_status)
    }

    async fn batch_update_blobs(
        &self,
        request: rev2::BatchUpdateBlobsRequest,
    ) -> RemoteResult<rev2::BatchUpdateBlobsResponse> {
        self.unary(methods::BATCH_UPDATE_BLOBS, request)
            .await
            .map_err(|status| RemoteError::CasUpload(status.message().to_string()))
    }

    async fn batch_read_blobs(
        &self,
        request: rev2::BatchReadBlobsRequest,
    ) -> RemoteResult<rev2::BatchReadBlobsResponse> {
        self.unary(methods::BATCH_READ_BLOBS, request)
            .await
            .map_err(|status| RemoteError::CasDownload(status.message().to_string()))
    }

    async fn get_tree(
        &self,
        mut request: rev2::GetTreeRequest,
    ) -> RemoteResult<Vec<rev2::Directory>> {
        let mut directories = Vec::new();
        loop {
            let mut stream: tonic::Streaming<rev2::GetTreeResponse> = self
                .server_streaming(methods::GET_TREE, request.clone())
                .await
                .map_err(RemoteError::from_status)?;
            let mut next_page_token = String::new();
            while let Some(page) = stream.next().await {
                let page = page.map_err(RemoteError::from_status)?;
                directories.extend(page.directories);
                next_page_token = page.next_page_token;
            }
            if next_page_token.is_empty() {
                return Ok(directories);
            }
            request.page_token = next_page_token;
        }
    }

    async fn execute(&self, request: rev2::ExecuteRequest) -> RemoteResult<OperationStream> {
        let streaming = self
            .server_streaming(methods::EXECUTE, request)
            .await
            .map_err(RemoteError::from_status)?;
        Ok(Self::boxed_operations(streaming))
    }

    async fn wait_execution(
        &self,
        request: rev2::WaitExecutionRequest,
    ) -> RemoteResult<OperationStream> {
        let streaming = self
            .server_streaming(methods::WAIT_EXECUTION, request)
            .await
            .map_err(RemoteError::from_status)?;
        Ok(Self::boxed_operations(streaming))
    }
}
