//! Remote execution failure kinds.

use forge_core::error::{ErrorCode, StructuredError};

/// An error talking to or interpreting a remote execution service
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("remote protocol error: {0}")]
    Protocol(String),
    #[error("CAS upload failed: {0}")]
    CasUpload(String),
    #[error("CAS download failed: {0}")]
    CasDownload(String),
    #[error("invalid remote endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("no remote endpoint is configured")]
    NotConfigured,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Classify a gRPC status from a unary call.
    pub fn from_status(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => {
                RemoteError::Unavailable(status.message().to_string())
            }
            _ => RemoteError::Protocol(format!("{}: {}", status.code(), status.message())),
        }
    }
}

impl StructuredError for RemoteError {
    fn code(&self) -> ErrorCode {
        match self {
            RemoteError::Unavailable(_) => ErrorCode::RemoteUnavailable,
            RemoteError::Protocol(_) => ErrorCode::RemoteProtocol,
            RemoteError::CasUpload(_) => ErrorCode::CasUpload,
            RemoteError::CasDownload(_) => ErrorCode::CasDownload,
            RemoteError::InvalidEndpoint { .. } | RemoteError::NotConfigured => {
                ErrorCode::RemoteUnavailable
            }
            RemoteError::Io(_) => ErrorCode::CasUpload,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;
