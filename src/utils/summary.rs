use anyhow::{Context, Result};
use serde_json::json;

use crate::flow::state::FlowState;

/// Create a JSON summary of a finished flow.
///
/// The summary records what was requested, what was collected for each
/// artifact, what was skipped or failed and where the output was written.
/// It is written next to the flow output for chain of custody.
///
/// # Example Output
///
/// ```json
/// {
///   "flow_id": "550e8400-e29b-41d4-a716-446655440000",
///   "client_id": "C.1000",
///   "status": "DONE",
///   "artifacts": [{"name": "WindowsRunKeys", "record_count": 3, "failures": []}],
///   "outputs": ["analysis/C.1000/alice-2024-01-15T14-30-52Z"]
/// }
/// ```
pub fn create_flow_summary(state: &FlowState, hostname: &str) -> Result<String> {
    let artifacts: Vec<_> = state
        .requested_artifacts
        .iter()
        .map(|name| {
            let failures: Vec<String> = state.failures_for(name).iter().map(|e| e.to_string()).collect();
            json!({
                "name": name,
                "record_count": state.results_for(name).len(),
                "skipped": state.skipped.contains(name),
                "failures": failures,
            })
        })
        .collect();

    let summary = json!({
        "flow_id": state.flow_id.to_string(),
        "client_id": state.client_id,
        "user": state.user,
        "collector_host": hostname,
        "created_at": state.created_at.to_rfc3339(),
        "phase": state.phase,
        "status": state.status(),
        "cancelled": state.cancelled,
        "error": state.error.as_ref().map(|e| e.to_string()),
        "collector_version": env!("CARGO_PKG_VERSION"),
        "artifacts": artifacts,
        "skipped": state.skipped,
        "failure_count": state.failures.len(),
        "outputs": state.outputs,
    });

    serde_json::to_string_pretty(&summary).context("Failed to serialize flow summary to JSON")
}
