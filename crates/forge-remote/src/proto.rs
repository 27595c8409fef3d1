//! Hand-maintained message definitions for the REv2 subset forge speaks.
//!
//! Field tags match the published `remote_execution.proto` exactly: the
//! Action digest is the SHA-256 of these serialized bytes, so any drift
//! here would change every cache key. Deprecated fields forge never sets
//! are omitted (unknown fields are skipped on decode), which does not
//! affect the bytes of the messages forge produces.

pub mod google {
    //! The `google.rpc` and `google.longrunning` types REv2 leans on.

    pub mod rpc {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Status {
            #[prost(int32, tag = "1")]
            pub code: i32,
            #[prost(string, tag = "2")]
            pub message: ::prost::alloc::string::String,
            #[prost(message, repeated, tag = "3")]
            pub details: ::prost::alloc::vec::Vec<::prost_types::Any>,
        }
    }

    pub mod longrunning {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Operation {
            #[prost(string, tag = "1")]
            pub name: ::prost::alloc::string::String,
            #[prost(message, optional, tag = "2")]
            pub metadata: ::core::option::Option<::prost_types::Any>,
            #[prost(bool, tag = "3")]
            pub done: bool,
            #[prost(oneof = "operation::Result", tags = "4, 5")]
            pub result: ::core::option::Option<operation::Result>,
        }

        pub mod operation {
            #[derive(Clone, PartialEq, ::prost::Oneof)]
            pub enum Result {
                #[prost(message, tag = "4")]
                Error(super::super::rpc::Status),
                #[prost(message, tag = "5")]
                Response(::prost_types::Any),
            }
        }
    }
}

pub mod rev2 {
    //! `build.bazel.remote.execution.v2`

    /// A content digest: lowercase-hex SHA-256 plus the byte count.
    #[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
    pub struct Digest {
        #[prost(string, tag = "1")]
        pub hash: ::prost::alloc::string::String,
        #[prost(int64, tag = "2")]
        pub size_bytes: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FileNode {
        #[prost(string, tag = "1")]
        pub name: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "2")]
        pub digest: ::core::option::Option<Digest>,
        #[prost(bool, tag = "4")]
        pub is_executable: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DirectoryNode {
        #[prost(string, tag = "1")]
        pub name: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "2")]
        pub digest: ::core::option::Option<Digest>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SymlinkNode {
        #[prost(string, tag = "1")]
        pub name: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub target: ::prost::alloc::string::String,
    }

    /// One directory level of the input tree. Children are sorted by name,
    /// as the protocol requires, so equal trees serialize identically.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Directory {
        #[prost(message, repeated, tag = "1")]
        pub files: ::prost::alloc::vec::Vec<FileNode>,
        #[prost(message, repeated, tag = "2")]
        pub directories: ::prost::alloc::vec::Vec<DirectoryNode>,
        #[prost(message, repeated, tag = "3")]
        pub symlinks: ::prost::alloc::vec::Vec<SymlinkNode>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Platform {
        #[prost(message, repeated, tag = "1")]
        pub properties: ::prost::alloc::vec::Vec<platform::Property>,
    }

    pub mod platform {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Property {
            #[prost(string, tag = "1")]
            pub name: ::prost::alloc::string::String,
            #[prost(string, tag = "2")]
            pub value: ::prost::alloc::string::String,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Command {
        #[prost(string, repeated, tag = "1")]
        pub arguments: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
        #[prost(message, repeated, tag = "2")]
        pub environment_variables: ::prost::alloc::vec::Vec<command::EnvironmentVariable>,
        #[prost(string, tag = "6")]
        pub working_directory: ::prost::alloc::string::String,
        #[prost(string, repeated, tag = "7")]
        pub output_paths: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    }

    pub mod command {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct EnvironmentVariable {
            #[prost(string, tag = "1")]
            pub name: ::prost::alloc::string::String,
            #[prost(string, tag = "2")]
            pub value: ::prost::alloc::string::String,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Action {
        #[prost(message, optional, tag = "1")]
        pub command_digest: ::core::option::Option<Digest>,
        #[prost(message, optional, tag = "2")]
        pub input_root_digest: ::core::option::Option<Digest>,
        #[prost(message, optional, tag = "6")]
        pub timeout: ::core::option::Option<::prost_types::Duration>,
        #[prost(bool, tag = "7")]
        pub do_not_cache: bool,
        #[prost(message, optional, tag = "10")]
        pub platform: ::core::option::Option<Platform>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct OutputFile {
        #[prost(string, tag = "1")]
        pub path: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "2")]
        pub digest: ::core::option::Option<Digest>,
        #[prost(bool, tag = "4")]
        pub is_executable: bool,
        #[prost(bytes = "vec", tag = "5")]
        pub contents: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct OutputDirectory {
        #[prost(string, tag = "1")]
        pub path: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "3")]
        pub tree_digest: ::core::option::Option<Digest>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct OutputSymlink {
        #[prost(string, tag = "1")]
        pub path: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub target: ::prost::alloc::string::String,
    }

    /// A merkle tree of output directories, stored whole in the CAS.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Tree {
        #[prost(message, optional, tag = "1")]
        pub root: ::core::option::Option<Directory>,
        #[prost(message, repeated, tag = "2")]
        pub children: ::prost::alloc::vec::Vec<Directory>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ActionResult {
        #[prost(message, repeated, tag = "2")]
        pub output_files: ::prost::alloc::vec::Vec<OutputFile>,
        #[prost(message, repeated, tag = "3")]
        pub output_directories: ::prost::alloc::vec::Vec<OutputDirectory>,
        #[prost(int32, tag = "4")]
        pub exit_code: i32,
        #[prost(bytes = "vec", tag = "5")]
        pub stdout_raw: ::prost::alloc::vec::Vec<u8>,
        #[prost(message, optional, tag = "6")]
        pub stdout_digest: ::core::option::Option<Digest>,
        #[prost(bytes = "vec", tag = "7")]
        pub stderr_raw: ::prost::alloc::vec::Vec<u8>,
        #[prost(message, optional, tag = "8")]
        pub stderr_digest: ::core::option::Option<Digest>,
        #[prost(message, repeated, tag = "10")]
        pub output_file_symlinks: ::prost::alloc::vec::Vec<OutputSymlink>,
        #[prost(message, repeated, tag = "12")]
        pub output_symlinks: ::prost::alloc::vec::Vec<OutputSymlink>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ExecuteRequest {
        #[prost(string, tag = "1")]
        pub instance_name: ::prost::alloc::string::String,
        #[prost(bool, tag = "3")]
        pub skip_cache_lookup: bool,
        #[prost(message, optional, tag = "6")]
        pub action_digest: ::core::option::Option<Digest>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ExecuteResponse {
        #[prost(message, optional, tag = "1")]
        pub result: ::core::option::Option<ActionResult>,
        #[prost(bool, tag = "2")]
        pub cached_result: bool,
        #[prost(message, optional, tag = "3")]
        pub status: ::core::option::Option<super::google::rpc::Status>,
        #[prost(string, tag = "5")]
        pub message: ::prost::alloc::string::String,
    }

    pub mod execution_stage {
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
        )]
        #[repr(i32)]
        pub enum Value {
            Unknown = 0,
            CacheCheck = 1,
            Queued = 2,
            Executing = 3,
            Completed = 4,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ExecuteOperationMetadata {
        #[prost(enumeration = "execution_stage::Value", tag = "1")]
        pub stage: i32,
        #[prost(message, optional, tag = "2")]
        pub action_digest: ::core::option::Option<Digest>,
        #[prost(string, tag = "3")]
        pub stdout_stream_name: ::prost::alloc::string::String,
        #[prost(string, tag = "4")]
        pub stderr_stream_name: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct WaitExecutionRequest {
        #[prost(string, tag = "1")]
        pub name: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GetActionResultRequest {
        #[prost(string, tag = "1")]
        pub instance_name: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "2")]
        pub action_digest: ::core::option::Option<Digest>,
        #[prost(bool, tag = "3")]
        pub inline_stdout: bool,
        #[prost(bool, tag = "4")]
        pub inline_stderr: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UpdateActionResultRequest {
        #[prost(string, tag = "1")]
        pub instance_name: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "2")]
        pub action_digest: ::core::option::Option<Digest>,
        #[prost(message, optional, tag = "3")]
        pub action_result: ::core::option::Option<ActionResult>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FindMissingBlobsRequest {
        #[prost(string, tag = "1")]
        pub instance_name: ::prost::alloc::string::String,
        #[prost(message, repeated, tag = "2")]
        pub blob_digests: ::prost::alloc::vec::Vec<Digest>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FindMissingBlobsResponse {
        #[prost(message, repeated, tag = "2")]
        pub missing_blob_digests: ::prost::alloc::vec::Vec<Digest>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BatchUpdateBlobsRequest {
        #[prost(string, tag = "1")]
        pub instance_name: ::prost::alloc::string::String,
        #[prost(message, repeated, tag = "2")]
        pub requests: ::prost::alloc::vec::Vec<batch_update_blobs_request::Request>,
    }

    pub mod batch_update_blobs_request {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Request {
            #[prost(message, optional, tag = "1")]
            pub digest: ::core::option::Option<super::Digest>,
            #[prost(bytes = "vec", tag = "2")]
            pub data: ::prost::alloc::vec::Vec<u8>,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BatchUpdateBlobsResponse {
        #[prost(message, repeated, tag = "1")]
        pub responses: ::prost::alloc::vec::Vec<batch_update_blobs_response::Response>,
    }

    pub mod batch_update_blobs_response {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Response {
            #[prost(message, optional, tag = "1")]
            pub digest: ::core::option::Option<super::Digest>,
            #[prost(message, optional, tag = "2")]
            pub status: ::core::option::Option<super::super::google::rpc::Status>,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BatchReadBlobsRequest {
        #[prost(string, tag = "1")]
        pub instance_name: ::prost::alloc::string::String,
        #[prost(message, repeated, tag = "2")]
        pub digests: ::prost::alloc::vec::Vec<Digest>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BatchReadBlobsResponse {
        #[prost(message, repeated, tag = "1")]
        pub responses: ::prost::alloc::vec::Vec<batch_read_blobs_response::Response>,
    }

    pub mod batch_read_blobs_response {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Response {
            #[prost(message, optional, tag = "1")]
            pub digest: ::core::option::Option<super::Digest>,
            #[prost(bytes = "vec", tag = "2")]
            pub data: ::prost::alloc::vec::Vec<u8>,
            #[prost(message, optional, tag = "3")]
            pub status: ::core::option::Option<super::super::google::rpc::Status>,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GetTreeRequest {
        #[prost(string, tag = "1")]
        pub instance_name: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "2")]
        pub root_digest: ::core::option::Option<Digest>,
        #[prost(int32, tag = "3")]
        pub page_size: i32,
        #[prost(string, tag = "4")]
        pub page_token: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GetTreeResponse {
        #[prost(message, repeated, tag = "1")]
        pub directories: ::prost::alloc::vec::Vec<Directory>,
        #[prost(string, tag = "2")]
        pub next_page_token: ::prost::alloc::string::String,
    }

    pub mod digest_function {
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
        )]
        #[repr(i32)]
        pub enum Value {
            Unknown = 0,
            Sha256 = 1,
            Sha1 = 2,
            Md5 = 3,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GetCapabilitiesRequest {
        #[prost(string, tag = "1")]
        pub instance_name: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CacheCapabilities {
        #[prost(enumeration = "digest_function::Value", repeated, tag = "1")]
        pub digest_functions: ::prost::alloc::vec::Vec<i32>,
        #[prost(int64, tag = "4")]
        pub max_batch_total_size_bytes: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ExecutionCapabilities {
        #[prost(enumeration = "digest_function::Value", tag = "1")]
        pub digest_function: i32,
        #[prost(bool, tag = "2")]
        pub exec_enabled: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ServerCapabilities {
        #[prost(message, optional, tag = "1")]
        pub cache_capabilities: ::core::option::Option<CacheCapabilities>,
        #[prost(message, optional, tag = "2")]
        pub execution_capabilities: ::core::option::Option<ExecutionCapabilities>,
    }
}

/// Full gRPC method paths for the consumed services.
pub mod methods {
    pub const EXECUTE: &str = "/build.bazel.remote.execution.v2.Execution/Execute";
    pub const WAIT_EXECUTION: &str = "/build.bazel.remote.execution.v2.Execution/WaitExecution";
    pub const GET_ACTION_RESULT: &str =
        "/build.bazel.remote.execution.v2.ActionCache/GetActionResult";
    pub const UPDATE_ACTION_RESULT: &str =
        "/build.bazel.remote.execution.v2.ActionCache/UpdateActionResult";
    pub const FIND_MISSING_BLOBS: &str =
        "/build.bazel.remote.execution.v2.ContentAddressableStorage/FindMissingBlobs";
    pub const BATCH_UPDATE_BLOBS: &str =
        "/build.bazel.remote.execution.v2.ContentAddressableStorage/BatchUpdateBlobs";
    pub const BATCH_READ_BLOBS: &str =
        "/build.bazel.remote.execution.v2.ContentAddressableStorage/BatchReadBlobs";
    pub const GET_TREE: &str =
        "/build.bazel.remote.execution.v2.ContentAddressableStorage/GetTree";
    pub const GET_CAPABILITIES: &str =
        "/build.bazel.remote.execution.v2.Capabilities/GetCapabilities";
}

/// The `type_url` carried by the Any wrapping an [`rev2::ExecuteResponse`].
pub const EXECUTE_RESPONSE_TYPE_URL: &str =
    "type.googleapis.com/build.bazel.remote.execution.v2.ExecuteResponse";
