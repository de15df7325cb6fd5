//! Output path templates and result sinks.
//!
//! Templates may use `{c}`/`{p}` (client id), `{u}` (user), `{t}` (flow
//! creation time) and `{a}` (artifact). With split output every artifact
//! gets its own path: `{a}` becomes the artifact name, or `/<artifact>` is
//! appended if the template has no `{a}`. Merged output uses `all` for `{a}`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::constants::{MERGED_OUTPUT_NAME, OUTPUT_FILE_EXTENSION, OUTPUT_TIMESTAMP_FORMAT};
use crate::flow::state::{FlowState, ResultRecord};
use crate::utils::paths::resolve_within;

/// Substitute every placeholder in `template`.
pub fn expand_template(
    template: &str,
    client_id: &str,
    user: &str,
    created_at: &DateTime<Utc>,
    artifact: &str,
) -> String {
    template
        .replace("{c}", client_id)
        .replace("{p}", client_id)
        .replace("{u}", user)
        .replace("{t}", &created_at.format(OUTPUT_TIMESTAMP_FORMAT).to_string())
        .replace("{a}", artifact)
}

/// Output path of `artifact` (split output) or of the merged output (`None`).
pub fn output_path(state: &FlowState, artifact: Option<&str>) -> String {
    let expand = |name: &str| {
        expand_template(
            &state.output_template,
            &state.client_id,
            &state.user,
            &state.created_at,
            name,
        )
    };

    match artifact {
        Some(name) if state.output_template.contains("{a}") => expand(name),
        Some(name) => format!("{}/{}", expand(name).trim_end_matches('/'), name),
        None => expand(MERGED_OUTPUT_NAME),
    }
}

/// Persistence sink for aggregated results.
#[async_trait]
pub trait OutputAggregator: Send + Sync {
    async fn write(&self, path: &str, records: &[ResultRecord]) -> Result<()>;
}

/// Writes each output as a JSON lines file under a base directory.
#[derive(Debug, Clone)]
pub struct FileOutputAggregator {
    base_dir: PathBuf,
}

impl FileOutputAggregator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Local file an output path is written to.
    pub fn file_for(&self, path: &str) -> Result<PathBuf> {
        resolve_within(&self.base_dir, Path::new(&format!("{}.{}", path, OUTPUT_FILE_EXTENSION)))
            .context(format!("Refusing output path {}", path))
    }
}

#[async_trait]
impl OutputAggregator for FileOutputAggregator {
    async fn write(&self, path: &str, records: &[ResultRecord]) -> Result<()> {
        let file_path = self.file_for(path)?;
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record).context("Failed to serialize result record")?;
            buffer.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .await
            .context(format!("Failed to open {}", file_path.display()))?;
        file.write_all(&buffer)
            .await
            .context(format!("Failed to write {}", file_path.display()))?;
        file.flush().await?;

        info!("Wrote {} record(s) to {}", records.len(), file_path.display());
        Ok(())
    }
}

/// Keeps every write in memory.
#[derive(Debug, Default)]
pub struct InMemoryOutputAggregator {
    writes: Mutex<Vec<(String, Vec<ResultRecord>)>>,
}

impl InMemoryOutputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn writes(&self) -> Vec<(String, Vec<ResultRecord>)> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl OutputAggregator for InMemoryOutputAggregator {
    async fn write(&self, path: &str, records: &[ResultRecord]) -> Result<()> {
        debug!("Buffering {} record(s) for {}", records.len(), path);
        self.writes.lock().await.push((path.to_string(), records.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::state::FlowArgs;
    use crate::knowledge_base::KnowledgeBase;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn state(template: &str, split: bool) -> FlowState {
        let args = FlowArgs::new("C.1000", ["A"])
            .with_output_template(template)
            .with_split_output(split)
            .with_user("alice");
        let mut state = FlowState::new(&args, KnowledgeBase::new("Linux"));
        state.created_at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 52).unwrap();
        state
    }

    #[test]
    fn test_expand_all_placeholders() {
        let s = state("analysis/{p}/{u}-{t}/{a}", true);
        assert_eq!(
            output_path(&s, Some("WindowsRunKeys")),
            "analysis/C.1000/alice-2024-01-15T14-30-52Z/WindowsRunKeys"
        );
        assert_eq!(output_path(&s, None), "analysis/C.1000/alice-2024-01-15T14-30-52Z/all");
    }

    #[test]
    fn test_split_without_artifact_placeholder_appends() {
        let s = state("analysis/{c}/{u}-{t}", true);
        assert_eq!(
            output_path(&s, Some("RunningProcesses")),
            "analysis/C.1000/alice-2024-01-15T14-30-52Z/RunningProcesses"
        );
        assert_eq!(output_path(&s, None), "analysis/C.1000/alice-2024-01-15T14-30-52Z");
    }

    #[tokio::test]
    async fn test_file_aggregator_writes_json_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = FileOutputAggregator::new(dir.path());
        let records = vec![
            ResultRecord {
                artifact: "A".into(),
                source_index: 0,
                source_type: "PATH".into(),
                payload: json!({"path": "/etc"}),
            },
            ResultRecord {
                artifact: "A".into(),
                source_index: 1,
                source_type: "PATH".into(),
                payload: json!({"path": "/var"}),
            },
        ];

        sink.write("analysis/C.1/alice/A", &records).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("analysis/C.1/alice/A.jsonl")).unwrap();
        let lines: Vec<ResultRecord> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines, records);

        assert!(sink.write("../escape", &records).await.is_err());
    }

    proptest! {
        #[test]
        fn prop_expanded_paths_have_no_placeholders(
            client in "C\\.[0-9a-f]{4,16}",
            user in "[a-z]{1,12}",
            artifact in "[A-Za-z][A-Za-z0-9]{0,30}",
            with_artifact in any::<bool>(),
        ) {
            let template = if with_artifact { "out/{c}/{u}/{t}/{a}" } else { "out/{p}/{u}-{t}" };
            let args = FlowArgs::new(client.clone(), [artifact.clone()])
                .with_output_template(template)
                .with_split_output(true)
                .with_user(user.clone());
            let s = FlowState::new(&args, KnowledgeBase::new("Linux"));

            let path = output_path(&s, Some(&artifact));
            prop_assert!(!path.contains('{'), "path has placeholder: {}", path);
            prop_assert!(path.starts_with(&format!("out/{}/{}", client, user)), "bad prefix: {}", path);
            prop_assert!(path.ends_with(&format!("/{}", artifact)), "bad suffix: {}", path);
        }
    }
}
