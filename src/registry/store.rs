//! Persisted artifact definition stores.
//!
//! The registry treats the store as the authoritative source of every
//! definition with DATASTORE origin.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::config::definition::{artifacts_from_yaml, ArtifactDefinition};

/// Durable storage of uploaded artifact definitions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Every persisted definition.
    async fn list(&self) -> Result<Vec<ArtifactDefinition>>;

    /// Persist a definition, replacing one with the same name.
    async fn put(&self, definition: ArtifactDefinition) -> Result<()>;

    /// Remove a definition. Removing an absent name is not an error.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDefinitionStore {
    definitions: RwLock<BTreeMap<String, ArtifactDefinition>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn list(&self) -> Result<Vec<ArtifactDefinition>> {
        Ok(self.definitions.read().await.values().cloned().collect())
    }

    async fn put(&self, definition: ArtifactDefinition) -> Result<()> {
        self.definitions
            .write()
            .await
            .insert(definition.name.clone(), definition);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.definitions.write().await.remove(name);
        Ok(())
    }
}

/// Store that keeps one YAML file per definition in a directory.
#[derive(Debug, Clone)]
pub struct DirectoryDefinitionStore {
    root: PathBuf,
}

impl DirectoryDefinitionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
            || name.chars().any(char::is_control)
        {
            bail!("Artifact name '{}' cannot be stored as a file", name);
        }
        Ok(self.root.join(format!("{}.yaml", name)))
    }
}

#[async_trait]
impl DefinitionStore for DirectoryDefinitionStore {
    async fn list(&self) -> Result<Vec<ArtifactDefinition>> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            debug!("Definition store {} does not exist yet", self.root.display());
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .context(format!("Failed to read definition store: {}", self.root.display()))?;

        let mut definitions = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("Failed to read directory entry")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }

            let text = tokio::fs::read_to_string(&path)
                .await
                .context(format!("Failed to read {}", path.display()))?;

            match artifacts_from_yaml(&text) {
                Ok(mut parsed) => definitions.append(&mut parsed),
                Err(e) => warn!("Ignoring corrupt stored definition {}: {}", path.display(), e),
            }
        }

        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }

    async fn put(&self, definition: ArtifactDefinition) -> Result<()> {
        let path = self.path_for(&definition.name)?;
        let yaml = definition.to_yaml()?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .context(format!("Failed to create definition store: {}", self.root.display()))?;
        tokio::fs::write(&path, yaml)
            .await
            .context(format!("Failed to write {}", path.display()))?;

        info!("Stored artifact definition {} at {}", definition.name, path.display());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted stored artifact definition {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Stored definition {} already absent", name);
                Ok(())
            }
            Err(e) => Err(e).context(format!("Failed to delete {}", path.display())),
        }
    }
}
