//! Collaborators that execute work on a client.
//!
//! The flow engine never talks to an endpoint directly. It emits
//! [`RemoteOperation`]s and file batches which the runner hands to a
//! [`RemoteTransport`] and a [`BulkTransfer`] implementation. The crate ships
//! local implementations that act on the machine the collector runs on.

pub mod bulk;
pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use bulk::LocalBulkTransfer;
pub use local::LocalTransport;

/// One unit of remote work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteOperation {
    ExecuteCommand { cmd: String, args: Vec<String> },
    Glob { pattern: String },
    ListDirectory { path: String },
    Grep { paths: Vec<String>, patterns: Vec<String> },
    ReadRegistryKey { key: String },
    ReadRegistryValue { key: String, value: String },
    WmiQuery { query: String },
    ListProcesses,
}

impl RemoteOperation {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteOperation::ExecuteCommand { .. } => "ExecuteCommand",
            RemoteOperation::Glob { .. } => "Glob",
            RemoteOperation::ListDirectory { .. } => "ListDirectory",
            RemoteOperation::Grep { .. } => "Grep",
            RemoteOperation::ReadRegistryKey { .. } => "ReadRegistryKey",
            RemoteOperation::ReadRegistryValue { .. } => "ReadRegistryValue",
            RemoteOperation::WmiQuery { .. } => "WmiQuery",
            RemoteOperation::ListProcesses => "ListProcesses",
        }
    }
}

/// Executes remote operations against a client.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Run `operation` on `client_id` and return its response records.
    async fn invoke(&self, client_id: &str, operation: &RemoteOperation) -> anyhow::Result<Vec<Value>>;
}

/// A file to fetch from a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathSpec {
    pub path: String,
}

impl PathSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Outcome of fetching one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferResult {
    pub path: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileTransferResult {
    pub fn failed(path: impl Into<String>, error: impl ToString) -> Self {
        Self {
            path: path.into(),
            success: false,
            size: None,
            sha256: None,
            stored_at: None,
            error: Some(error.to_string()),
        }
    }
}

/// Fetches many files from one client in a single call.
#[async_trait]
pub trait BulkTransfer: Send + Sync {
    async fn start(&self, client_id: &str, pathspecs: &[PathSpec]) -> anyhow::Result<Vec<FileTransferResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_wire_shape() {
        let op = RemoteOperation::ExecuteCommand {
            cmd: "/usr/bin/dpkg".into(),
            args: vec!["--list".into()],
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value, json!({"kind": "execute_command", "cmd": "/usr/bin/dpkg", "args": ["--list"]}));
        assert_eq!(op.name(), "ExecuteCommand");

        let back: RemoteOperation = serde_json::from_value(json!({"kind": "list_processes"})).unwrap();
        assert_eq!(back, RemoteOperation::ListProcesses);
    }
}
