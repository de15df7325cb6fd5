//! Bulk file retrieval from the local host.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use crate::constants::BULK_TRANSFER_CONCURRENCY;
use crate::transport::{BulkTransfer, FileTransferResult, PathSpec};
use crate::utils::hash::calculate_sha256;
use crate::utils::paths::{client_path_to_relative, resolve_within, sanitize_filename};

/// Copies requested files into `<dest_root>/<client_id>/<original path>`
/// and records their size and SHA-256.
#[derive(Debug, Clone)]
pub struct LocalBulkTransfer {
    dest_root: PathBuf,
    max_file_size: u64,
}

impl LocalBulkTransfer {
    pub fn new(dest_root: impl Into<PathBuf>) -> Self {
        Self {
            dest_root: dest_root.into(),
            max_file_size: u64::MAX,
        }
    }

    /// Files larger than `bytes` are reported as failed instead of copied.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    fn fetch_one(source: &Path, dest: &Path, max_file_size: u64) -> Result<(u64, Option<String>)> {
        let metadata = std::fs::metadata(source)
            .context(format!("Source not found: {}", source.display()))?;
        if !metadata.is_file() {
            bail!("Not a regular file: {}", source.display());
        }
        if metadata.len() > max_file_size {
            bail!("File exceeds size limit ({} bytes): {}", metadata.len(), source.display());
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create directory: {}", parent.display()))?;
        }

        let size = std::fs::copy(source, dest).context(format!(
            "Failed to copy {} to {}",
            source.display(),
            dest.display()
        ))?;

        let sha256 = calculate_sha256(dest, u64::MAX)
            .context(format!("Failed to hash {}", dest.display()))?;

        Ok((size, sha256))
    }
}

#[async_trait]
impl BulkTransfer for LocalBulkTransfer {
    async fn start(&self, client_id: &str, pathspecs: &[PathSpec]) -> Result<Vec<FileTransferResult>> {
        let client_dir = resolve_within(&self.dest_root, Path::new(&sanitize_filename(client_id)))?;
        info!("Fetching {} file(s) for {} into {}", pathspecs.len(), client_id, client_dir.display());

        let transfers = pathspecs.iter().cloned().map(|spec| {
            let client_dir = client_dir.clone();
            let max_file_size = self.max_file_size;
            async move {
                let dest = match resolve_within(&client_dir, &client_path_to_relative(&spec.path)) {
                    Ok(dest) => dest,
                    Err(e) => return FileTransferResult::failed(spec.path, e),
                };
                let source = PathBuf::from(&spec.path);
                let dest_clone = dest.clone();

                let outcome = tokio::task::spawn_blocking(move || {
                    Self::fetch_one(&source, &dest_clone, max_file_size)
                })
                .await
                .context("Task join error");

                match outcome {
                    Ok(Ok((size, sha256))) => {
                        debug!("Fetched {} ({} bytes)", spec.path, size);
                        FileTransferResult {
                            path: spec.path,
                            success: true,
                            size: Some(size),
                            sha256,
                            stored_at: Some(dest.to_string_lossy().to_string()),
                            error: None,
                        }
                    }
                    Ok(Err(e)) | Err(e) => {
                        warn!("Failed to fetch {}: {:#}", spec.path, e);
                        FileTransferResult::failed(spec.path, format!("{:#}", e))
                    }
                }
            }
        });

        let results: Vec<FileTransferResult> = stream::iter(transfers)
            .buffered(BULK_TRANSFER_CONCURRENCY)
            .collect()
            .await;

        let fetched = results.iter().filter(|r| r.success).count();
        info!("Fetched {}/{} file(s) for {}", fetched, results.len(), client_id);
        Ok(results)
    }
}
