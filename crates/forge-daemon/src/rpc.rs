//! JSON-RPC 2.0 message types and the line-oriented codec.
//!
//! One object per line, UTF-8, responses correlated by `id`. Requests
//! missing an `id` are notifications and never get a reply.

use std::io::Write;

use forge_core::error::StructuredError;
use parking_lot::Mutex;
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// An incoming request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// An error object of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn parse_error<E: std::fmt::Display>(e: E) -> Self {
        Self {
            code: -32700,
            message: format!("Parse error: {}", e),
            data: None,
        }
    }

    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "Invalid request".to_string(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }

    pub fn invalid_params<E: std::fmt::Display>(e: E) -> Self {
        Self {
            code: -32602,
            message: format!("Invalid params: {}", e),
            data: None,
        }
    }

    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self {
            code: -32603,
            message: format!("Internal error: {}", e),
            data: None,
        }
    }

    /// A domain error: positive code, structured kind and context in `data`.
    pub fn domain<E: StructuredError>(error: &E) -> Self {
        let code = error.code();
        Self {
            code: code.rpc_code(),
            message: error.to_string(),
            data: Some(serde_json::json!({
                "kind": code,
                "context": error.context(),
            })),
        }
    }
}

/// A serialized response line.
pub fn response_line(id: &Value, outcome: Result<Value, RpcError>) -> Value {
    match outcome {
        Ok(result) => serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "result": result,
        }),
        Err(error) => serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "error": error,
        }),
    }
}

/// A serialized notification line.
pub fn notification_line(method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

/// The daemon's output stream: line-granular writes under a mutex, so a
/// response is never interleaved with a notification.
pub struct OutputSink {
    inner: Mutex<Box<dyn Write + Send>>,
}

impl OutputSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Mutex::new(Box::new(writer)),
        }
    }

    /// Write one JSON value as a line and flush it.
    pub fn write_line(&self, value: &Value) -> std::io::Result<()> {
        let mut inner = self.inner.lock();
        serde_json::to_writer(&mut *inner, value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        inner.write_all(b"\n")?;
        inner.flush()
    }

    /// Send a `$/log` notification.
    pub fn log(&self, level: &str, message: &str) {
        let _ = self.write_line(&notification_line(
            "$/log",
            serde_json::json!({ "level": level, "message": message }),
        ));
    }

    /// Send a `$/progress` notification.
    pub fn progress(&self, current: usize, total: usize, message: &str) {
        let _ = self.write_line(&notification_line(
            "$/progress",
            serde_json::json!({ "current": current, "total": total, "message": message }),
        ));
    }
}
