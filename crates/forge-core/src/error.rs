//! Structured error kinds shared across the daemon boundary.
//!
//! Every error surfaced over JSON-RPC carries one of these kinds; crates
//! define their own `thiserror` enums and implement [`StructuredError`] so
//! the daemon can attach `{code, message, data}` uniformly.

use std::fmt::Display;

/// The structured kind of a forge error.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigParse,
    PluginLoad,
    PluginInvalidOptions,
    PluginRuntime,
    ProjectNotFound,
    TargetNotFound,
    GraphCycle,
    TaskCycle,
    TaskSelfDep,
    TaskFailed,
    Timeout,
    Cancelled,
    RemoteUnavailable,
    RemoteProtocol,
    CasUpload,
    CasDownload,
    /// Informational only, never surfaced as an error
    ActionCacheMiss,
    RpcParse,
    RpcInvalidParams,
    RpcMethodNotFound,
    RpcInternal,
}

impl ErrorCode {
    /// The numeric code used at the JSON-RPC boundary.
    ///
    /// The transport-level codes are the reserved negative JSON-RPC values;
    /// domain errors use positive integers grouped by component.
    pub fn rpc_code(self) -> i64 {
        use ErrorCode::*;
        match self {
            RpcParse => -32700,
            RpcInvalidParams => -32602,
            RpcMethodNotFound => -32601,
            RpcInternal => -32603,

            ConfigParse => 1000,
            PluginLoad => 1100,
            PluginInvalidOptions => 1101,
            PluginRuntime => 1102,
            ProjectNotFound => 1200,
            TargetNotFound => 1201,
            GraphCycle => 1300,
            TaskCycle => 1301,
            TaskSelfDep => 1302,
            TaskFailed => 1400,
            Timeout => 1401,
            Cancelled => 1402,
            RemoteUnavailable => 1500,
            RemoteProtocol => 1501,
            CasUpload => 1502,
            CasDownload => 1503,
            ActionCacheMiss => 1504,
        }
    }
}

/// An error that knows its structured kind.
pub trait StructuredError: Display {
    /// The structured kind of this error
    fn code(&self) -> ErrorCode;

    /// Context identifiers (project, task id) attached as RPC error `data`
    fn context(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::ConfigParse).unwrap();
        assert_eq!(json, "\"CONFIG_PARSE\"");
        let back: ErrorCode = serde_json::from_str("\"TASK_SELF_DEP\"").unwrap();
        assert_eq!(back, ErrorCode::TaskSelfDep);
    }

    #[test]
    fn rpc_codes_are_grouped() {
        assert_eq!(ErrorCode::RpcParse.rpc_code(), -32700);
        assert!(ErrorCode::TaskFailed.rpc_code() > 0);
    }
}
