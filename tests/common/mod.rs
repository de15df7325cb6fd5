//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use artifact_collector::config::ArtifactDefinition;
use artifact_collector::knowledge_base::{KnowledgeBase, KnowledgeBaseUser};
use artifact_collector::registry::{DefinitionStore, InMemoryDefinitionStore};
use artifact_collector::transport::{BulkTransfer, FileTransferResult, PathSpec, RemoteOperation, RemoteTransport};

type Responder = dyn Fn(&RemoteOperation) -> Result<Vec<Value>> + Send + Sync;

/// Transport answering from a closure and recording every call.
pub struct FakeTransport {
    responder: Box<Responder>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RemoteOperation>>,
}

impl FakeTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RemoteOperation) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers every operation with no records.
    pub fn empty() -> Self {
        Self::new(|_| Ok(Vec::new()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RemoteOperation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteTransport for FakeTransport {
    async fn invoke(&self, _client_id: &str, operation: &RemoteOperation) -> Result<Vec<Value>> {
        self.calls.lock().unwrap().push(operation.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(operation)
    }
}

/// Bulk transfer that succeeds for every path and records each call.
#[derive(Default)]
pub struct RecordingBulkTransfer {
    calls: Mutex<Vec<Vec<PathSpec>>>,
    fail: AtomicBool,
}

impl RecordingBulkTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let bulk = Self::default();
        bulk.fail.store(true, Ordering::SeqCst);
        bulk
    }

    pub fn calls(&self) -> Vec<Vec<PathSpec>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BulkTransfer for RecordingBulkTransfer {
    async fn start(&self, _client_id: &str, pathspecs: &[PathSpec]) -> Result<Vec<FileTransferResult>> {
        self.calls.lock().unwrap().push(pathspecs.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            bail!("file store offline");
        }
        Ok(pathspecs
            .iter()
            .map(|spec| FileTransferResult {
                path: spec.path.clone(),
                success: true,
                size: Some(4),
                sha256: None,
                stored_at: Some(format!("files/{}", spec.path)),
                error: None,
            })
            .collect())
    }
}

/// In-memory store that counts listings and can be switched off.
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryDefinitionStore,
    lists: AtomicUsize,
    offline: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl DefinitionStore for CountingStore {
    async fn list(&self) -> Result<Vec<ArtifactDefinition>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        self.inner.list().await
    }

    async fn put(&self, definition: ArtifactDefinition) -> Result<()> {
        self.inner.put(definition).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name).await
    }
}

/// Windows 8 client with one profiled user.
pub fn windows_kb() -> KnowledgeBase {
    let mut user = KnowledgeBaseUser::new("jim");
    user.sid = Some("S-1-5-21-1234-1001".to_string());
    user.homedir = Some("C:\\Users\\jim".to_string());

    KnowledgeBase::new("Windows")
        .with_version(6, 2)
        .with_environ("systemroot", "C:\\Windows")
        .with_environ("windir", "C:\\Windows")
        .with_user(user)
}

/// Registry reads as a Windows client would answer them: one Run entry
/// under HKLM, nothing anywhere else.
pub fn run_key_responder(operation: &RemoteOperation) -> Result<Vec<Value>> {
    match operation {
        RemoteOperation::ReadRegistryKey { key }
            if key.starts_with("HKEY_LOCAL_MACHINE") && key.ends_with("\\Run\\*") =>
        {
            Ok(vec![json!({
                "key": key.trim_end_matches("\\*"),
                "name": "A",
                "data": "C:\\Windows\\TEMP\\A.exe",
            })])
        }
        _ => Ok(Vec::new()),
    }
}

pub fn test_artifacts_path() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/test_artifacts.yaml")
}
