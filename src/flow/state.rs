//! Serializable state of a collection flow and the messages it exchanges.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::collectors::ResultRoute;
use crate::constants::DEFAULT_OUTPUT_TEMPLATE;
use crate::error::ArtifactError;
use crate::knowledge_base::KnowledgeBase;
use crate::transport::{FileTransferResult, PathSpec, RemoteOperation};

pub type RequestId = u64;

/// Fine-grained position of a flow in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowPhase {
    Init,
    Resolving,
    Dispatching,
    Awaiting,
    Aggregating,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Running,
    Done,
    Error,
}

impl FlowPhase {
    pub fn status(self) -> FlowStatus {
        match self {
            FlowPhase::Done => FlowStatus::Done,
            FlowPhase::Error => FlowStatus::Error,
            _ => FlowStatus::Running,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FlowPhase::Done | FlowPhase::Error)
    }
}

/// Caller-supplied parameters of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowArgs {
    pub artifact_list: Vec<String>,
    pub client_id: String,
    pub output_template: String,
    pub split_output_by_artifact: bool,
    pub user: String,
}

impl FlowArgs {
    pub fn new<I, S>(client_id: impl Into<String>, artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            artifact_list: artifacts.into_iter().map(Into::into).collect(),
            client_id: client_id.into(),
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            split_output_by_artifact: false,
            user: "unknown".to_string(),
        }
    }

    pub fn with_output_template(mut self, template: impl Into<String>) -> Self {
        self.output_template = template.into();
        self
    }

    pub fn with_split_output(mut self, split: bool) -> Self {
        self.split_output_by_artifact = split;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }
}

/// One collected record as handed to the output sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Artifact whose source produced the record.
    pub artifact: String,
    pub source_index: usize,
    pub source_type: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotState {
    Pending,
    Filled,
    Failed,
}

/// Place reserved for the output of one dispatch, in dispatch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSlot {
    pub origin: String,
    pub source_index: usize,
    pub source_type: String,
    pub state: SlotState,
    pub records: Vec<Value>,
}

/// A remote operation awaiting its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub request_id: RequestId,
    /// Requested artifact the results belong to.
    pub artifact: String,
    /// Artifact whose source produced the operation, differs from
    /// `artifact` inside groups.
    pub origin: String,
    pub source_index: usize,
    pub source_type: String,
    pub operation: RemoteOperation,
    pub route: ResultRoute,
    pub slot: Option<usize>,
}

/// Where a file in the batch came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOrigin {
    pub artifact: String,
    pub origin: String,
    pub source_index: usize,
    pub source_type: String,
    /// Slot of `artifact` reserved for the fetched file.
    #[serde(default)]
    pub slot: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBatchEntry {
    pub path: String,
    pub origins: Vec<FileOrigin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub request_id: RequestId,
    pub pathspecs: Vec<PathSpec>,
    pub settled: bool,
}

/// A failure that affected one artifact but not the flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactFailure {
    pub artifact: String,
    pub error: ArtifactError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelMode {
    /// Stop and write what has been aggregated so far.
    Keep,
    /// Stop and write nothing.
    Discard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationOutcome {
    Success(Vec<Value>),
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BulkOutcome {
    Success(Vec<FileTransferResult>),
    Failed(String),
    TimedOut,
}

/// Input to [`CollectionFlow::resume`](crate::flow::CollectionFlow::resume).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlowEvent {
    OperationCompleted {
        request_id: RequestId,
        outcome: OperationOutcome,
    },
    BulkTransferCompleted {
        request_id: RequestId,
        outcome: BulkOutcome,
    },
    Cancel(CancelMode),
}

/// Side effect requested by the flow. The caller executes it and reports
/// back with a [`FlowEvent`] where one is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlowEffect {
    Invoke {
        request_id: RequestId,
        client_id: String,
        operation: RemoteOperation,
    },
    BulkTransfer {
        request_id: RequestId,
        client_id: String,
        pathspecs: Vec<PathSpec>,
    },
    WriteOutput {
        path: String,
        records: Vec<ResultRecord>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub flow_id: Uuid,
    pub client_id: String,
    pub user: String,
    pub created_at: DateTime<Utc>,
    pub requested_artifacts: Vec<String>,
    pub output_template: String,
    pub split_output_by_artifact: bool,
    pub knowledge_base: KnowledgeBase,
    pub phase: FlowPhase,
    pub next_request_id: RequestId,
    pub pending_requests: BTreeMap<RequestId, PendingRequest>,
    pub collected_results: BTreeMap<String, Vec<ResultSlot>>,
    pub file_batch: Vec<FileBatchEntry>,
    pub bulk_request: Option<BulkRequest>,
    pub failures: Vec<ArtifactFailure>,
    pub skipped: Vec<String>,
    pub cancelled: Option<CancelMode>,
    pub error: Option<ArtifactError>,
    pub outputs: Vec<String>,
}

impl FlowState {
    pub fn new(args: &FlowArgs, knowledge_base: KnowledgeBase) -> Self {
        Self {
            flow_id: Uuid::new_v4(),
            client_id: args.client_id.clone(),
            user: args.user.clone(),
            created_at: Utc::now(),
            requested_artifacts: Vec::new(),
            output_template: args.output_template.clone(),
            split_output_by_artifact: args.split_output_by_artifact,
            knowledge_base,
            phase: FlowPhase::Init,
            next_request_id: 1,
            pending_requests: BTreeMap::new(),
            collected_results: BTreeMap::new(),
            file_batch: Vec::new(),
            bulk_request: None,
            failures: Vec::new(),
            skipped: Vec::new(),
            cancelled: None,
            error: None,
            outputs: Vec::new(),
        }
    }

    pub fn status(&self) -> FlowStatus {
        self.phase.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub(crate) fn allocate_request_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    pub(crate) fn record_failure(&mut self, artifact: &str, error: ArtifactError) {
        log::warn!("Artifact {} in flow {}: {}", artifact, self.flow_id, error);
        self.failures.push(ArtifactFailure {
            artifact: artifact.to_string(),
            error,
        });
    }

    pub(crate) fn add_to_batch(&mut self, path: String, origin: FileOrigin) {
        match self.file_batch.iter_mut().find(|entry| entry.path == path) {
            Some(entry) => {
                if !entry.origins.contains(&origin) {
                    entry.origins.push(origin);
                }
            }
            None => self.file_batch.push(FileBatchEntry {
                path,
                origins: vec![origin],
            }),
        }
    }

    /// Effects needed to continue this flow after it was restored from
    /// storage: every unanswered request is issued again.
    pub fn outstanding_effects(&self) -> Vec<FlowEffect> {
        if self.is_terminal() {
            return Vec::new();
        }

        let mut effects: Vec<FlowEffect> = self
            .pending_requests
            .values()
            .map(|pending| FlowEffect::Invoke {
                request_id: pending.request_id,
                client_id: self.client_id.clone(),
                operation: pending.operation.clone(),
            })
            .collect();

        if let Some(bulk) = self.bulk_request.as_ref().filter(|b| !b.settled) {
            effects.push(FlowEffect::BulkTransfer {
                request_id: bulk.request_id,
                client_id: self.client_id.clone(),
                pathspecs: bulk.pathspecs.clone(),
            });
        }
        effects
    }

    /// Filled records of `artifact`, in dispatch order.
    pub fn results_for(&self, artifact: &str) -> Vec<ResultRecord> {
        self.collected_results
            .get(artifact)
            .map(|slots| {
                slots
                    .iter()
                    .filter(|slot| slot.state == SlotState::Filled)
                    .flat_map(|slot| {
                        slot.records.iter().map(move |payload| ResultRecord {
                            artifact: slot.origin.clone(),
                            source_index: slot.source_index,
                            source_type: slot.source_type.clone(),
                            payload: payload.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Failures recorded against `artifact`.
    pub fn failures_for(&self, artifact: &str) -> Vec<&ArtifactError> {
        self.failures
            .iter()
            .filter(|f| f.artifact == artifact)
            .map(|f| &f.error)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_status() {
        assert_eq!(FlowPhase::Awaiting.status(), FlowStatus::Running);
        assert_eq!(FlowPhase::Done.status(), FlowStatus::Done);
        assert_eq!(FlowPhase::Error.status(), FlowStatus::Error);
        assert!(!FlowPhase::Aggregating.is_terminal());
    }

    #[test]
    fn test_batch_merges_origins() {
        let mut state = FlowState::new(&FlowArgs::new("C.1", ["A"]), KnowledgeBase::new("Linux"));
        let origin = |artifact: &str| FileOrigin {
            artifact: artifact.into(),
            origin: artifact.into(),
            source_index: 0,
            source_type: "FILE".into(),
            slot: None,
        };

        state.add_to_batch("/etc/hosts".into(), origin("A"));
        state.add_to_batch("/etc/hosts".into(), origin("A"));
        state.add_to_batch("/etc/hosts".into(), origin("B"));
        state.add_to_batch("/etc/passwd".into(), origin("B"));

        assert_eq!(state.file_batch.len(), 2);
        assert_eq!(state.file_batch[0].origins.len(), 2);
    }

    #[test]
    fn test_outstanding_effects_reissue_pending() {
        let mut state = FlowState::new(&FlowArgs::new("C.1", ["A"]), KnowledgeBase::new("Linux"));
        state.phase = FlowPhase::Awaiting;
        let id = state.allocate_request_id();
        state.pending_requests.insert(
            id,
            PendingRequest {
                request_id: id,
                artifact: "A".into(),
                origin: "A".into(),
                source_index: 0,
                source_type: "LIST_PROCESSES".into(),
                operation: RemoteOperation::ListProcesses,
                route: ResultRoute::Collect,
                slot: Some(0),
            },
        );

        let effects = state.outstanding_effects();
        assert_eq!(
            effects,
            vec![FlowEffect::Invoke {
                request_id: id,
                client_id: "C.1".into(),
                operation: RemoteOperation::ListProcesses,
            }]
        );

        state.phase = FlowPhase::Done;
        assert!(state.outstanding_effects().is_empty());
    }

    #[test]
    fn test_state_survives_json() {
        let state = FlowState::new(
            &FlowArgs::new("C.1", ["A"]).with_user("alice").with_split_output(true),
            KnowledgeBase::new("Windows"),
        );
        let json = serde_json::to_string(&state).unwrap();
        let back: FlowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
