//! The collection state machine.
//!
//! [`CollectionFlow::start`] resolves the requested artifacts through the
//! registry, runs the source collectors and returns the first batch of side
//! effects. Everything after that is [`CollectionFlow::resume`], a pure step
//! function over [`FlowState`]: it never performs I/O, so a flow can be
//! driven by any executor and restored from a serialized state.
//!
//! ```text
//! INIT ─► RESOLVING ─► DISPATCHING ─► AWAITING ─► AGGREGATING ─► DONE
//!              │                          │
//!              └──────── ERROR ◄──────────┘  (cycles, unavailable store)
//! ```

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use log::{debug, error, info};
use serde_json::Value;

use crate::collectors::path_detection::paths_from_record;
use crate::collectors::{CollectContext, CollectorTable, Dispatch, ResultRoute};
use crate::config::conditions::all_hold;
use crate::config::definition::ArtifactDefinition;
use crate::constants::{BULK_TRANSFER, DEFAULT_MAX_GROUP_DEPTH};
use crate::error::ArtifactError;
use crate::flow::output::output_path;
use crate::flow::state::*;
use crate::knowledge_base::KnowledgeBase;
use crate::registry::ArtifactRegistry;
use crate::transport::{FileTransferResult, PathSpec, RemoteOperation};

/// Builds flows. Holds the collector table and recursion limit; the state
/// of each flow lives in its [`FlowState`].
pub struct CollectionFlow {
    collectors: CollectorTable,
    max_group_depth: usize,
}

impl Default for CollectionFlow {
    fn default() -> Self {
        Self::new(CollectorTable::default())
    }
}

/// Where the output of a dispatch should go while expanding one requested
/// artifact.
struct Target<'a> {
    artifact: &'a str,
    route: ResultRoute,
}

enum Resolution {
    Collect(Arc<ArtifactDefinition>),
    Skip,
}

impl CollectionFlow {
    pub fn new(collectors: CollectorTable) -> Self {
        Self {
            collectors,
            max_group_depth: DEFAULT_MAX_GROUP_DEPTH,
        }
    }

    pub fn with_max_group_depth(mut self, depth: usize) -> Self {
        self.max_group_depth = depth;
        self
    }

    /// Resolve, dispatch and return the initial side effects.
    ///
    /// The returned state is `AWAITING` when remote work is outstanding,
    /// `DONE` when everything completed immediately and `ERROR` on a
    /// flow-fatal condition.
    pub async fn start(
        &self,
        registry: &ArtifactRegistry,
        args: &FlowArgs,
        kb: KnowledgeBase,
    ) -> (FlowState, Vec<FlowEffect>) {
        let mut state = FlowState::new(args, kb);
        info!(
            "Starting flow {} for {} ({} artifact(s))",
            state.flow_id,
            state.client_id,
            args.artifact_list.len()
        );

        for name in &args.artifact_list {
            if !state.requested_artifacts.contains(name) {
                state.requested_artifacts.push(name.clone());
            }
        }

        state.phase = FlowPhase::Resolving;
        let mut effects = Vec::new();
        let requested = state.requested_artifacts.clone();

        for name in &requested {
            state.collected_results.entry(name.clone()).or_default();
            let mut stack = Vec::new();
            let target = Target {
                artifact: name,
                route: ResultRoute::Collect,
            };

            if let Err(fatal) = self
                .expand(registry, &mut state, &mut effects, &target, name, &mut stack)
                .await
            {
                return (fail(state, fatal), Vec::new());
            }
        }

        state.phase = FlowPhase::Awaiting;
        let mut more = advance(&mut state);
        effects.append(&mut more);
        (state, effects)
    }

    /// Resolve `name` and dispatch its sources for `target`.
    ///
    /// Only flow-fatal errors are returned; everything else is recorded in
    /// the state.
    fn expand<'a>(
        &'a self,
        registry: &'a ArtifactRegistry,
        state: &'a mut FlowState,
        effects: &'a mut Vec<FlowEffect>,
        target: &'a Target<'a>,
        name: &'a str,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<(), ArtifactError>> {
        async move {
            if stack.iter().any(|n| n == name) || stack.len() > self.max_group_depth {
                let mut chain = stack.clone();
                chain.push(name.to_string());
                return Err(ArtifactError::Cyclic { chain });
            }

            let definition = match self.resolve(registry, state, target.artifact, name, stack.is_empty()).await? {
                Resolution::Collect(definition) => definition,
                Resolution::Skip => return Ok(()),
            };

            state.phase = FlowPhase::Dispatching;
            stack.push(name.to_string());
            for (index, source) in definition.sources.iter().enumerate() {
                if !state.knowledge_base.os_matches(&source.supported_os) {
                    debug!("Source {} of {} does not apply to {}", index, name, state.knowledge_base.os);
                    continue;
                }
                match all_hold(&source.conditions, &state.knowledge_base) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        state.record_failure(
                            target.artifact,
                            ArtifactError::InvalidSource {
                                artifact: name.to_string(),
                                index,
                                source_type: source.source_type.to_string(),
                                reason: e.to_string(),
                            },
                        );
                        continue;
                    }
                }

                let ctx = CollectContext::new(&state.knowledge_base, &state.client_id);
                let dispatches = match self.collectors.collect(name, index, source, &ctx) {
                    Ok(dispatches) => dispatches,
                    Err(e) => {
                        state.record_failure(target.artifact, e);
                        continue;
                    }
                };

                let source_type = source.source_type.to_string();
                let from = SourceRef {
                    origin: name,
                    index,
                    source_type: &source_type,
                };
                for dispatch in dispatches {
                    match dispatch {
                        Dispatch::Expand { names, route } => {
                            let nested = Target {
                                artifact: target.artifact,
                                route: combine(target.route, route),
                            };
                            for member in &names {
                                self.expand(registry, state, effects, &nested, member, stack).await?;
                            }
                        }
                        Dispatch::Immediate(value) => dispatch_immediate(state, target, &from, value),
                        Dispatch::Retrieve(path) => batch_files(state, target, &from, vec![path]),
                        Dispatch::Remote { operation, route } => {
                            dispatch_remote(state, effects, target, &from, operation, combine(target.route, route))
                        }
                    }
                }
            }
            stack.pop();
            Ok(())
        }
        .boxed()
    }

    async fn resolve(
        &self,
        registry: &ArtifactRegistry,
        state: &mut FlowState,
        artifact: &str,
        name: &str,
        top_level: bool,
    ) -> Result<Resolution, ArtifactError> {
        let definition = match registry.get_artifact(name).await {
            Ok(definition) => definition,
            Err(e) if e.is_flow_fatal() => return Err(e),
            Err(e) => {
                state.record_failure(artifact, e);
                return Ok(Resolution::Skip);
            }
        };

        let applicable = state.knowledge_base.os_matches(&definition.supported_os)
            && match all_hold(&definition.conditions, &state.knowledge_base) {
                Ok(holds) => holds,
                Err(e) => {
                    state.record_failure(artifact, ArtifactError::parse(name, e));
                    return Ok(Resolution::Skip);
                }
            };

        if !applicable {
            debug!("Artifact {} does not apply to {}", name, state.client_id);
            if top_level {
                state.skipped.push(name.to_string());
            }
            return Ok(Resolution::Skip);
        }
        Ok(Resolution::Collect(definition))
    }

    /// Apply one event. Pure: the only output is the new state and the side
    /// effects the caller must perform.
    pub fn resume(mut state: FlowState, event: FlowEvent) -> (FlowState, Vec<FlowEffect>) {
        if state.is_terminal() {
            debug!("Flow {} is finished, ignoring {:?}", state.flow_id, event_name(&event));
            return (state, Vec::new());
        }

        match event {
            FlowEvent::OperationCompleted { request_id, outcome } => {
                let Some(pending) = state.pending_requests.remove(&request_id) else {
                    debug!("Flow {}: ignoring response for unknown request {}", state.flow_id, request_id);
                    return (state, Vec::new());
                };
                apply_operation(&mut state, pending, outcome);
            }
            FlowEvent::BulkTransferCompleted { request_id, outcome } => {
                let matches = state
                    .bulk_request
                    .as_ref()
                    .map(|bulk| bulk.request_id == request_id && !bulk.settled)
                    .unwrap_or(false);
                if !matches {
                    debug!("Flow {}: ignoring bulk response {}", state.flow_id, request_id);
                    return (state, Vec::new());
                }
                apply_bulk(&mut state, request_id, outcome);
            }
            FlowEvent::Cancel(mode) => {
                info!("Flow {} cancelled ({:?})", state.flow_id, mode);
                state.cancelled = Some(mode);
                state.pending_requests.clear();
                if let Some(bulk) = state.bulk_request.as_mut() {
                    bulk.settled = true;
                }
                let effects = match mode {
                    CancelMode::Keep => aggregate(&mut state),
                    CancelMode::Discard => {
                        state.phase = FlowPhase::Done;
                        Vec::new()
                    }
                };
                return (state, effects);
            }
        }

        let effects = advance(&mut state);
        (state, effects)
    }
}

fn event_name(event: &FlowEvent) -> &'static str {
    match event {
        FlowEvent::OperationCompleted { .. } => "OperationCompleted",
        FlowEvent::BulkTransferCompleted { .. } => "BulkTransferCompleted",
        FlowEvent::Cancel(_) => "Cancel",
    }
}

/// Inside an ARTIFACT_FILES expansion everything is scanned for paths.
fn combine(outer: ResultRoute, inner: ResultRoute) -> ResultRoute {
    match (outer, inner) {
        (ResultRoute::DetectPaths, ResultRoute::Collect) => ResultRoute::DetectPaths,
        (_, inner) => inner,
    }
}

fn fail(mut state: FlowState, error: ArtifactError) -> FlowState {
    error!("Flow {} failed: {}", state.flow_id, error);
    state.pending_requests.clear();
    state.error = Some(error);
    state.phase = FlowPhase::Error;
    state
}

/// The source a dispatch came from.
struct SourceRef<'a> {
    origin: &'a str,
    index: usize,
    source_type: &'a str,
}

fn dispatch_immediate(state: &mut FlowState, target: &Target<'_>, from: &SourceRef<'_>, value: Value) {
    match target.route {
        ResultRoute::Collect => {
            push_slot(state, target.artifact, from, SlotState::Filled, vec![value]);
        }
        ResultRoute::Retrieve => batch_files(state, target, from, record_path(&value).into_iter().collect()),
        ResultRoute::DetectPaths => {
            let paths = paths_from_record(&value, &state.knowledge_base);
            batch_files(state, target, from, paths);
        }
    }
}

/// Queue files for the bulk transfer behind one slot reserved now, so the
/// fetched files keep their place among the artifact's results.
fn batch_files(state: &mut FlowState, target: &Target<'_>, from: &SourceRef<'_>, paths: Vec<String>) {
    if paths.is_empty() {
        return;
    }
    let slot = push_slot(state, target.artifact, from, SlotState::Pending, Vec::new());
    for path in paths {
        state.add_to_batch(
            path,
            FileOrigin {
                artifact: target.artifact.to_string(),
                origin: from.origin.to_string(),
                source_index: from.index,
                source_type: from.source_type.to_string(),
                slot: Some(slot),
            },
        );
    }
}

fn dispatch_remote(
    state: &mut FlowState,
    effects: &mut Vec<FlowEffect>,
    target: &Target<'_>,
    from: &SourceRef<'_>,
    operation: RemoteOperation,
    route: ResultRoute,
) {
    let slot = push_slot(state, target.artifact, from, SlotState::Pending, Vec::new());
    let request_id = state.allocate_request_id();
    state.pending_requests.insert(
        request_id,
        PendingRequest {
            request_id,
            artifact: target.artifact.to_string(),
            origin: from.origin.to_string(),
            source_index: from.index,
            source_type: from.source_type.to_string(),
            operation: operation.clone(),
            route,
            slot: Some(slot),
        },
    );
    effects.push(FlowEffect::Invoke {
        request_id,
        client_id: state.client_id.clone(),
        operation,
    });
}

fn push_slot(
    state: &mut FlowState,
    artifact: &str,
    from: &SourceRef<'_>,
    slot_state: SlotState,
    records: Vec<Value>,
) -> usize {
    let slots = state.collected_results.entry(artifact.to_string()).or_default();
    slots.push(ResultSlot {
        origin: from.origin.to_string(),
        source_index: from.index,
        source_type: from.source_type.to_string(),
        state: slot_state,
        records,
    });
    slots.len() - 1
}

/// A path named by a record: a bare string or the `path` field.
fn record_path(record: &Value) -> Option<String> {
    match record {
        Value::String(path) => Some(path.clone()),
        Value::Object(map) => map.get("path").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn apply_operation(state: &mut FlowState, pending: PendingRequest, outcome: OperationOutcome) {
    let records = match outcome {
        OperationOutcome::Success(records) => records,
        OperationOutcome::Failed(reason) => return fail_request(state, &pending, reason),
        OperationOutcome::TimedOut => return fail_request(state, &pending, "timed out".to_string()),
    };

    debug!(
        "Flow {}: request {} ({}) returned {} record(s)",
        state.flow_id,
        pending.request_id,
        pending.operation.name(),
        records.len()
    );

    let paths: Vec<String> = match pending.route {
        ResultRoute::Collect => {
            if let Some(slot) = slot_mut(state, &pending) {
                slot.records = records;
                slot.state = SlotState::Filled;
            }
            return;
        }
        ResultRoute::Retrieve => records.iter().filter_map(record_path).collect(),
        ResultRoute::DetectPaths => records
            .iter()
            .flat_map(|record| paths_from_record(record, &state.knowledge_base))
            .collect(),
    };

    if paths.is_empty() {
        if let Some(slot) = slot_mut(state, &pending) {
            slot.state = SlotState::Filled;
        }
        return;
    }
    for path in paths {
        state.add_to_batch(
            path,
            FileOrigin {
                artifact: pending.artifact.clone(),
                origin: pending.origin.clone(),
                source_index: pending.source_index,
                source_type: pending.source_type.clone(),
                slot: pending.slot,
            },
        );
    }
}

fn file_slot_mut<'a>(state: &'a mut FlowState, origin: &FileOrigin) -> Option<&'a mut ResultSlot> {
    let index = origin.slot?;
    state
        .collected_results
        .get_mut(&origin.artifact)
        .and_then(|slots| slots.get_mut(index))
}

fn slot_mut<'a>(state: &'a mut FlowState, pending: &PendingRequest) -> Option<&'a mut ResultSlot> {
    let index = pending.slot?;
    state
        .collected_results
        .get_mut(&pending.artifact)
        .and_then(|slots| slots.get_mut(index))
}

fn fail_request(state: &mut FlowState, pending: &PendingRequest, reason: String) {
    if let Some(slot) = slot_mut(state, pending) {
        slot.state = SlotState::Failed;
    }
    state.record_failure(
        &pending.artifact,
        ArtifactError::RemoteOperation {
            artifact: pending.origin.clone(),
            request_id: pending.request_id,
            reason: format!("{}: {}", pending.operation.name(), reason),
        },
    );
}

fn apply_bulk(state: &mut FlowState, request_id: RequestId, outcome: BulkOutcome) {
    if let Some(bulk) = state.bulk_request.as_mut() {
        bulk.settled = true;
    }

    let results: Vec<FileTransferResult> = match outcome {
        BulkOutcome::Success(results) => results,
        BulkOutcome::Failed(reason) => return fail_batch(state, request_id, &reason),
        BulkOutcome::TimedOut => return fail_batch(state, request_id, "timed out"),
    };

    let batch = state.file_batch.clone();
    for entry in &batch {
        let result = results.iter().find(|r| r.path == entry.path);
        for origin in &entry.origins {
            match result {
                Some(result) if result.success => {
                    let payload = serde_json::to_value(result).unwrap_or(Value::Null);
                    match file_slot_mut(state, origin) {
                        Some(slot) => {
                            slot.records.push(payload);
                            slot.state = SlotState::Filled;
                        }
                        None => {
                            let from = SourceRef {
                                origin: &origin.origin,
                                index: origin.source_index,
                                source_type: &origin.source_type,
                            };
                            push_slot(state, &origin.artifact, &from, SlotState::Filled, vec![payload]);
                        }
                    }
                }
                Some(result) => state.record_failure(
                    &origin.artifact,
                    ArtifactError::RemoteOperation {
                        artifact: origin.origin.clone(),
                        request_id,
                        reason: format!(
                            "fetching {}: {}",
                            entry.path,
                            result.error.as_deref().unwrap_or("unknown error")
                        ),
                    },
                ),
                None => state.record_failure(
                    &origin.artifact,
                    ArtifactError::RemoteOperation {
                        artifact: origin.origin.clone(),
                        request_id,
                        reason: format!("no transfer result for {}", entry.path),
                    },
                ),
            }
        }
    }

    // Slots whose files all failed.
    for entry in &batch {
        for origin in &entry.origins {
            if let Some(slot) = file_slot_mut(state, origin) {
                if slot.state == SlotState::Pending {
                    slot.state = SlotState::Failed;
                }
            }
        }
    }
}

fn fail_batch(state: &mut FlowState, request_id: RequestId, reason: &str) {
    let batch = state.file_batch.clone();
    let mut affected: Vec<(String, String)> = Vec::new();
    for entry in &batch {
        for origin in &entry.origins {
            if let Some(slot) = file_slot_mut(state, origin) {
                slot.state = SlotState::Failed;
            }
            let key = (origin.artifact.clone(), origin.origin.clone());
            if !affected.contains(&key) {
                affected.push(key);
            }
        }
    }
    for (artifact, origin) in affected {
        state.record_failure(
            &artifact,
            ArtifactError::RemoteOperation {
                artifact: origin,
                request_id,
                reason: format!("{}: {}", BULK_TRANSFER, reason),
            },
        );
    }
}

/// Move the flow forward once direct requests have settled: submit the
/// single bulk transfer if files were found, otherwise aggregate.
fn advance(state: &mut FlowState) -> Vec<FlowEffect> {
    if state.is_terminal() || !state.pending_requests.is_empty() {
        return Vec::new();
    }

    match state.bulk_request.as_ref().map(|bulk| bulk.settled) {
        None if !state.file_batch.is_empty() => {
            let request_id = state.allocate_request_id();
            let pathspecs: Vec<PathSpec> = state.file_batch.iter().map(|e| PathSpec::new(&e.path)).collect();
            info!(
                "Flow {}: requesting {} file(s) from {}",
                state.flow_id,
                pathspecs.len(),
                state.client_id
            );
            state.bulk_request = Some(BulkRequest {
                request_id,
                pathspecs: pathspecs.clone(),
                settled: false,
            });
            vec![FlowEffect::BulkTransfer {
                request_id,
                client_id: state.client_id.clone(),
                pathspecs,
            }]
        }
        Some(false) => Vec::new(),
        _ => aggregate(state),
    }
}

fn aggregate(state: &mut FlowState) -> Vec<FlowEffect> {
    state.phase = FlowPhase::Aggregating;

    let mut effects = Vec::new();
    if state.split_output_by_artifact {
        for artifact in state.requested_artifacts.clone() {
            let records = state.results_for(&artifact);
            if records.is_empty() {
                continue;
            }
            let path = output_path(state, Some(&artifact));
            state.outputs.push(path.clone());
            effects.push(FlowEffect::WriteOutput { path, records });
        }
    } else {
        let records: Vec<ResultRecord> = state
            .requested_artifacts
            .iter()
            .flat_map(|artifact| state.results_for(artifact))
            .collect();
        if !records.is_empty() {
            let path = output_path(state, None);
            state.outputs.push(path.clone());
            effects.push(FlowEffect::WriteOutput { path, records });
        }
    }

    state.phase = FlowPhase::Done;
    info!(
        "Flow {} done: {} output(s), {} failure(s), {} skipped",
        state.flow_id,
        state.outputs.len(),
        state.failures.len(),
        state.skipped.len()
    );
    effects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::artifact_types::SourceType;
    use crate::config::definition::ArtifactSource;
    use crate::registry::ArtifactOrigin;
    use serde_json::json;

    async fn registry_with(defs: Vec<ArtifactDefinition>) -> ArtifactRegistry {
        let registry = ArtifactRegistry::new();
        for def in defs {
            registry.register_artifact(def, ArtifactOrigin::FileSource, true).await;
        }
        registry
    }

    fn path_artifact(name: &str, path: &str) -> ArtifactDefinition {
        ArtifactDefinition::new(name)
            .with_source(ArtifactSource::new(SourceType::Path).with_attribute("paths", json!([path])))
    }

    fn group(name: &str, members: &[&str]) -> ArtifactDefinition {
        ArtifactDefinition::new(name)
            .with_source(ArtifactSource::new(SourceType::ArtifactGroup).with_attribute("names", json!(members)))
    }

    #[tokio::test]
    async fn test_immediate_only_flow_finishes_in_start() {
        let registry = registry_with(vec![path_artifact("A", "/etc")]).await;
        let (state, effects) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["A", "A"]), KnowledgeBase::new("Linux"))
            .await;

        assert_eq!(state.phase, FlowPhase::Done);
        assert_eq!(state.requested_artifacts, vec!["A"]);
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            FlowEffect::WriteOutput { records, .. } => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].payload, json!({"path": "/etc"}));
            }
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unregistered_is_local_failure() {
        let registry = registry_with(vec![path_artifact("A", "/etc")]).await;
        let (state, _) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["Missing", "A"]), KnowledgeBase::new("Linux"))
            .await;

        assert_eq!(state.phase, FlowPhase::Done);
        assert_eq!(
            state.failures_for("Missing"),
            vec![&ArtifactError::NotRegistered("Missing".into())]
        );
        assert_eq!(state.results_for("A").len(), 1);
    }

    #[tokio::test]
    async fn test_not_applicable_is_skipped() {
        let registry = registry_with(vec![path_artifact("WinOnly", "C:\\").with_supported_os("Windows")]).await;
        let (state, effects) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["WinOnly"]), KnowledgeBase::new("Linux"))
            .await;

        assert_eq!(state.phase, FlowPhase::Done);
        assert_eq!(state.skipped, vec!["WinOnly"]);
        assert!(state.failures.is_empty());
        assert!(effects.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_is_fatal() {
        let registry = registry_with(vec![group("GroupA", &["GroupB"]), group("GroupB", &["GroupA"])]).await;
        let (state, effects) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["GroupA"]), KnowledgeBase::new("Linux"))
            .await;

        assert_eq!(state.phase, FlowPhase::Error);
        assert_eq!(state.status(), FlowStatus::Error);
        assert!(effects.is_empty());
        assert_eq!(
            state.error,
            Some(ArtifactError::Cyclic {
                chain: vec!["GroupA".into(), "GroupB".into(), "GroupA".into()]
            })
        );
    }

    #[tokio::test]
    async fn test_depth_limit_is_fatal() {
        let registry = registry_with(vec![
            group("L0", &["L1"]),
            group("L1", &["L2"]),
            group("L2", &["Leaf"]),
            path_artifact("Leaf", "/tmp"),
        ])
        .await;

        let (deep, _) = CollectionFlow::default()
            .with_max_group_depth(1)
            .start(&registry, &FlowArgs::new("C.1", ["L0"]), KnowledgeBase::new("Linux"))
            .await;
        assert!(matches!(deep.error, Some(ArtifactError::Cyclic { .. })));

        let (ok, _) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["L0"]), KnowledgeBase::new("Linux"))
            .await;
        assert_eq!(ok.phase, FlowPhase::Done);
        assert_eq!(ok.results_for("L0")[0].artifact, "Leaf");
    }

    #[tokio::test]
    async fn test_remote_response_fills_slot_in_order() {
        let registry = registry_with(vec![ArtifactDefinition::new("Mixed")
            .with_source(ArtifactSource::new(SourceType::ListProcesses))
            .with_source(ArtifactSource::new(SourceType::Path).with_attribute("paths", json!(["/proc"])))])
        .await;

        let (state, effects) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["Mixed"]), KnowledgeBase::new("Linux"))
            .await;
        assert_eq!(state.phase, FlowPhase::Awaiting);
        let request_id = match &effects[..] {
            [FlowEffect::Invoke { request_id, operation: RemoteOperation::ListProcesses, .. }] => *request_id,
            other => panic!("unexpected effects {:?}", other),
        };

        let (state, effects) = CollectionFlow::resume(
            state,
            FlowEvent::OperationCompleted {
                request_id,
                outcome: OperationOutcome::Success(vec![json!({"pid": 1})]),
            },
        );
        assert_eq!(state.phase, FlowPhase::Done);
        let FlowEffect::WriteOutput { records, .. } = &effects[0] else {
            panic!("expected output");
        };
        assert_eq!(records[0].payload, json!({"pid": 1}));
        assert_eq!(records[0].source_index, 0);
        assert_eq!(records[1].payload, json!({"path": "/proc"}));
    }

    #[tokio::test]
    async fn test_timeout_and_duplicates() {
        let registry = registry_with(vec![ArtifactDefinition::new("Procs")
            .with_source(ArtifactSource::new(SourceType::ListProcesses))])
        .await;
        let (state, effects) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["Procs"]), KnowledgeBase::new("Linux"))
            .await;
        let FlowEffect::Invoke { request_id, .. } = effects[0] else {
            panic!("expected invoke");
        };

        let (state, effects) = CollectionFlow::resume(
            state,
            FlowEvent::OperationCompleted { request_id, outcome: OperationOutcome::TimedOut },
        );
        assert_eq!(state.phase, FlowPhase::Done);
        assert!(effects.is_empty());
        assert_eq!(state.failures_for("Procs").len(), 1);

        let (again, effects) = CollectionFlow::resume(
            state.clone(),
            FlowEvent::OperationCompleted {
                request_id,
                outcome: OperationOutcome::Success(vec![json!({"pid": 1})]),
            },
        );
        assert_eq!(again, state);
        assert!(effects.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_modes() {
        let registry = registry_with(vec![ArtifactDefinition::new("Both")
            .with_source(ArtifactSource::new(SourceType::Path).with_attribute("paths", json!(["/a"])))
            .with_source(ArtifactSource::new(SourceType::ListProcesses))])
        .await;
        let flow = CollectionFlow::default();
        let args = FlowArgs::new("C.1", ["Both"]);

        let (state, _) = flow.start(&registry, &args, KnowledgeBase::new("Linux")).await;
        let (kept, effects) = CollectionFlow::resume(state, FlowEvent::Cancel(CancelMode::Keep));
        assert_eq!(kept.phase, FlowPhase::Done);
        assert_eq!(kept.cancelled, Some(CancelMode::Keep));
        assert!(kept.pending_requests.is_empty());
        let FlowEffect::WriteOutput { records, .. } = &effects[0] else {
            panic!("expected partial output");
        };
        assert_eq!(records.len(), 1);

        let (state, _) = flow.start(&registry, &args, KnowledgeBase::new("Linux")).await;
        let (discarded, effects) = CollectionFlow::resume(state, FlowEvent::Cancel(CancelMode::Discard));
        assert_eq!(discarded.phase, FlowPhase::Done);
        assert!(effects.is_empty());
    }

    #[tokio::test]
    async fn test_glob_matches_join_single_bulk_request() {
        let registry = registry_with(vec![ArtifactDefinition::new("Cron").with_source(
            ArtifactSource::new(SourceType::File)
                .with_attribute("paths", json!(["/etc/crontab", "/etc/cron.d/*"])),
        )])
        .await;
        let (state, effects) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["Cron"]), KnowledgeBase::new("Linux"))
            .await;

        assert_eq!(effects.len(), 1, "bulk waits for the glob");
        let FlowEffect::Invoke { request_id, .. } = effects[0] else {
            panic!("expected glob");
        };

        let (state, effects) = CollectionFlow::resume(
            state,
            FlowEvent::OperationCompleted {
                request_id,
                outcome: OperationOutcome::Success(vec![json!({"path": "/etc/cron.d/daily"})]),
            },
        );
        let FlowEffect::BulkTransfer { request_id, pathspecs, .. } = &effects[0] else {
            panic!("expected bulk transfer");
        };
        assert_eq!(
            pathspecs,
            &vec![PathSpec::new("/etc/crontab"), PathSpec::new("/etc/cron.d/daily")]
        );

        let ok = |path: &str| FileTransferResult {
            path: path.into(),
            success: true,
            size: Some(1),
            sha256: None,
            stored_at: None,
            error: None,
        };
        let (state, effects) = CollectionFlow::resume(
            state,
            FlowEvent::BulkTransferCompleted {
                request_id: *request_id,
                outcome: BulkOutcome::Success(vec![
                    ok("/etc/crontab"),
                    FileTransferResult::failed("/etc/cron.d/daily", "permission denied"),
                ]),
            },
        );
        assert_eq!(state.phase, FlowPhase::Done);
        assert_eq!(state.results_for("Cron").len(), 1);
        assert_eq!(state.failures_for("Cron").len(), 1);
        assert_eq!(effects.len(), 1);
    }

    #[tokio::test]
    async fn test_fetched_files_keep_dispatch_order() {
        let registry = registry_with(vec![ArtifactDefinition::new("Mixed")
            .with_source(ArtifactSource::new(SourceType::File).with_attribute("paths", json!(["/etc/hosts"])))
            .with_source(ArtifactSource::new(SourceType::Path).with_attribute("paths", json!(["/proc"])))])
        .await;

        let (state, effects) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["Mixed"]), KnowledgeBase::new("Linux"))
            .await;
        let FlowEffect::BulkTransfer { request_id, .. } = &effects[0] else {
            panic!("expected bulk transfer");
        };

        let (state, _) = CollectionFlow::resume(
            state,
            FlowEvent::BulkTransferCompleted {
                request_id: *request_id,
                outcome: BulkOutcome::Success(vec![FileTransferResult {
                    path: "/etc/hosts".into(),
                    success: true,
                    size: Some(12),
                    sha256: None,
                    stored_at: None,
                    error: None,
                }]),
            },
        );

        assert_eq!(state.phase, FlowPhase::Done);
        let records = state.results_for("Mixed");
        let order: Vec<usize> = records.iter().map(|r| r.source_index).collect();
        assert_eq!(order, vec![0, 1]);
        assert_eq!(records[0].payload["path"], "/etc/hosts");
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_no_result() {
        let registry = registry_with(vec![ArtifactDefinition::new("Hosts")
            .with_source(ArtifactSource::new(SourceType::File).with_attribute("paths", json!(["/etc/hosts"])))])
        .await;

        let (state, effects) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["Hosts"]), KnowledgeBase::new("Linux"))
            .await;
        let FlowEffect::BulkTransfer { request_id, .. } = &effects[0] else {
            panic!("expected bulk transfer");
        };

        let (state, effects) = CollectionFlow::resume(
            state,
            FlowEvent::BulkTransferCompleted {
                request_id: *request_id,
                outcome: BulkOutcome::Failed("file store offline".into()),
            },
        );
        assert_eq!(state.phase, FlowPhase::Done);
        assert!(effects.is_empty());
        assert_eq!(state.collected_results["Hosts"][0].state, SlotState::Failed);
        assert_eq!(state.failures_for("Hosts").len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_source_does_not_drop_artifact() {
        let text = "name: TwoSources\nsources:\n- type: PATH\n  attributes:\n    paths: ['/etc']\n- attributes:\n    paths: ['/tmp']\n";
        let registry = registry_with(crate::config::definition::artifacts_from_yaml(text).unwrap()).await;

        let (state, effects) = CollectionFlow::default()
            .start(&registry, &FlowArgs::new("C.1", ["TwoSources"]), KnowledgeBase::new("Linux"))
            .await;

        assert_eq!(state.phase, FlowPhase::Done);
        assert_eq!(effects.len(), 1);
        assert_eq!(state.results_for("TwoSources")[0].payload, json!({"path": "/etc"}));
        assert!(matches!(
            state.failures_for("TwoSources").as_slice(),
            [ArtifactError::InvalidSource { index: 1, .. }]
        ));
    }
}
