//! Artifact registry.
//!
//! Holds every known [`ArtifactDefinition`] together with where it came
//! from. Definitions arrive from two kinds of sources:
//!
//! - **File sources**: bundled or operator-supplied definition files. These
//!   are trusted and may be reloaded at any time.
//! - **The definition store**: definitions uploaded at runtime and persisted.
//!   The in-memory view of these is a projection of the store and is
//!   refreshed lazily.
//!
//! ## Lazy reconciliation
//!
//! A lookup miss triggers one reconciliation pass against the store before
//! the miss is reported: stale DATASTORE entries whose persisted record has
//! gone are evicted and every persisted definition is (re)registered. File
//! source entries never trigger a pass, and a hit never touches the store.
//!
//! Every miss against a registry with a configured store pays for a full
//! store listing. Callers that need high lookup throughput should call
//! [`ArtifactRegistry::reconcile`] up front instead of relying on misses.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use artifact_collector::registry::{ArtifactRegistry, InMemoryDefinitionStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = ArtifactRegistry::with_store(Arc::new(InMemoryDefinitionStore::new()));
//! registry.add_file_source("artifacts/linux.yaml").await?;
//! let definition = registry.get_artifact("DebianPackagesList").await?;
//! println!("{} has {} sources", definition.name, definition.sources.len());
//! # Ok(())
//! # }
//! ```

pub mod store;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use walkdir::WalkDir;

use crate::config::default_definitions::bundled_definitions;
use crate::config::definition::{self, parse_definitions, ArtifactDefinition};
use crate::constants::{DEFINITION_FILE_EXTENSIONS, DEFINITION_STORE};
use crate::error::{ArtifactError, Result};

pub use store::{DefinitionStore, DirectoryDefinitionStore, InMemoryDefinitionStore};

lazy_static! {
    /// Process-wide registry. Tests and embedders that need isolation
    /// construct their own [`ArtifactRegistry`] instead.
    pub static ref REGISTRY: Arc<ArtifactRegistry> = Arc::new(ArtifactRegistry::new());
}

/// Where a registry entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactOrigin {
    FileSource,
    Datastore,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub definition: Arc<ArtifactDefinition>,
    pub origin: ArtifactOrigin,
}

/// Result of loading one definition file.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub path: PathBuf,
    pub loaded: Vec<String>,
    pub errors: Vec<ArtifactError>,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub loaded: Vec<String>,
    pub evicted: Vec<String>,
}

pub struct ArtifactRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    store: RwLock<Option<Arc<dyn DefinitionStore>>>,
    reconcile_lock: Mutex<()>,
    /// Tickets of reconciliation passes, taken under `reconcile_lock` right
    /// before the store is listed.
    passes_started: AtomicU64,
    /// Ticket of the last pass whose listing succeeded.
    last_listed: AtomicU64,
    dirty: AtomicBool,
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactRegistry {
    /// An empty registry without a definition store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store: RwLock::new(None),
            reconcile_lock: Mutex::new(()),
            passes_started: AtomicU64::new(0),
            last_listed: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    /// An empty registry reconciled against `store`.
    pub fn with_store(store: Arc<dyn DefinitionStore>) -> Self {
        Self {
            store: RwLock::new(Some(store)),
            ..Self::new()
        }
    }

    /// Attach, replace or detach (`None`) the definition store.
    pub async fn set_store(&self, store: Option<Arc<dyn DefinitionStore>>) {
        *self.store.write().await = store;
    }

    pub async fn store(&self) -> Option<Arc<dyn DefinitionStore>> {
        self.store.read().await.clone()
    }

    /// Insert or replace a definition.
    ///
    /// With `overwrite_if_exists == false` an existing entry of the same name
    /// is kept and the call does nothing.
    pub async fn register_artifact(
        &self,
        definition: ArtifactDefinition,
        origin: ArtifactOrigin,
        overwrite_if_exists: bool,
    ) {
        let mut entries = self.entries.write().await;
        if self.insert_locked(&mut entries, definition, origin, overwrite_if_exists) {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    fn insert_locked(
        &self,
        entries: &mut HashMap<String, RegistryEntry>,
        definition: ArtifactDefinition,
        origin: ArtifactOrigin,
        overwrite_if_exists: bool,
    ) -> bool {
        if !overwrite_if_exists && entries.contains_key(&definition.name) {
            debug!("Artifact {} already registered, keeping existing entry", definition.name);
            return false;
        }
        entries.insert(
            definition.name.clone(),
            RegistryEntry {
                definition: Arc::new(definition),
                origin,
            },
        );
        true
    }

    /// Look up a definition, reconciling with the store once on a miss.
    pub async fn get_artifact(&self, name: &str) -> Result<Arc<ArtifactDefinition>> {
        if let Some(definition) = self.lookup(name).await {
            return Ok(definition);
        }

        if self.store.read().await.is_none() {
            return Err(ArtifactError::NotRegistered(name.to_string()));
        }

        debug!("Artifact {} not in registry, reconciling with {}", name, DEFINITION_STORE);
        let seen = self.passes_started.load(Ordering::SeqCst);
        self.reconcile_pass(Some(seen)).await?;

        self.lookup(name)
            .await
            .ok_or_else(|| ArtifactError::NotRegistered(name.to_string()))
    }

    async fn lookup(&self, name: &str) -> Option<Arc<ArtifactDefinition>> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|entry| Arc::clone(&entry.definition))
    }

    /// Refresh DATASTORE entries from the store.
    ///
    /// Names held with DATASTORE origin that the store no longer lists are
    /// evicted, then every stored definition is registered with overwrite.
    /// Without a store this does nothing.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconcile_pass(None).await
    }

    /// Run one pass. With `Some(seen)` the pass is skipped when a pass that
    /// took its ticket after `seen` was read has already listed the store
    /// successfully.
    async fn reconcile_pass(&self, seen: Option<u64>) -> Result<ReconcileReport> {
        let Some(store) = self.store.read().await.clone() else {
            return Ok(ReconcileReport::default());
        };

        let _guard = self.reconcile_lock.lock().await;
        if let Some(seen) = seen {
            if self.last_listed.load(Ordering::SeqCst) > seen {
                debug!("Reconciliation completed while waiting, skipping pass");
                return Ok(ReconcileReport::default());
            }
        }
        let ticket = self.passes_started.fetch_add(1, Ordering::SeqCst) + 1;

        let authoritative = store
            .list()
            .await
            .map_err(|e| ArtifactError::unavailable(DEFINITION_STORE, format!("{:#}", e)))?;
        self.last_listed.store(ticket, Ordering::SeqCst);

        let mut entries = self.entries.write().await;

        let wanted: HashSet<&str> = authoritative.iter().map(|d| d.name.as_str()).collect();
        let mut evicted: Vec<String> = entries
            .iter()
            .filter(|(name, entry)| {
                entry.origin == ArtifactOrigin::Datastore && !wanted.contains(name.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();
        evicted.sort();

        for name in &evicted {
            entries.remove(name);
        }

        let mut loaded = Vec::with_capacity(authoritative.len());
        for definition in authoritative {
            loaded.push(definition.name.clone());
            self.insert_locked(&mut entries, definition, ArtifactOrigin::Datastore, true);
        }

        self.dirty.store(false, Ordering::SeqCst);

        if !evicted.is_empty() {
            info!("Evicted {} stale datastore artifact(s): {}", evicted.len(), evicted.join(", "));
        }
        info!("Reconciled {} artifact(s) from {}", loaded.len(), DEFINITION_STORE);

        Ok(ReconcileReport { loaded, evicted })
    }

    /// Load every definition in a file as a FILE_SOURCE entry.
    ///
    /// An unreadable file or a YAML syntax error fails the call. A malformed
    /// definition is reported in the returned [`LoadReport`] and its
    /// siblings still load.
    pub async fn add_file_source(&self, path: impl AsRef<Path>) -> Result<LoadReport> {
        let path = path.as_ref();
        let context = path.display().to_string();

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ArtifactError::parse(&context, e))?;

        let parsed = parse_definitions(&text, &context)?;

        let mut loaded = Vec::with_capacity(parsed.definitions.len());
        {
            let mut entries = self.entries.write().await;
            for definition in parsed.definitions {
                loaded.push(definition.name.clone());
                self.insert_locked(&mut entries, definition, ArtifactOrigin::FileSource, true);
            }
        }
        self.dirty.store(true, Ordering::SeqCst);

        info!("Loaded {} artifact(s) from {}", loaded.len(), context);
        Ok(LoadReport {
            path: path.to_path_buf(),
            loaded,
            errors: parsed.errors,
        })
    }

    /// Load every definition file (`.yaml`, `.yml`, `.json`) under `dir`.
    ///
    /// A file that fails to load is logged and reported; the rest still load.
    pub async fn add_dir_source(&self, dir: impl AsRef<Path>) -> Result<Vec<LoadReport>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ArtifactError::parse(dir.display().to_string(), "not a directory"));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| DEFINITION_FILE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        let mut reports = Vec::with_capacity(files.len());
        for file in files {
            match self.add_file_source(&file).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!("Failed to load definitions from {}: {}", file.display(), e);
                    reports.push(LoadReport {
                        path: file,
                        loaded: Vec::new(),
                        errors: vec![e],
                    });
                }
            }
        }
        Ok(reports)
    }

    /// Register the built-in definitions as FILE_SOURCE entries.
    pub async fn load_bundled(&self) -> Result<usize> {
        let definitions = bundled_definitions()?;
        let count = definitions.len();
        let mut entries = self.entries.write().await;
        for definition in definitions {
            self.insert_locked(&mut entries, definition, ArtifactOrigin::FileSource, true);
        }
        self.dirty.store(true, Ordering::SeqCst);
        debug!("Registered {} bundled artifact(s)", count);
        Ok(count)
    }

    /// Parse definitions without registering them.
    pub fn artifacts_from_yaml(text: &str) -> Result<Vec<ArtifactDefinition>> {
        definition::artifacts_from_yaml(text)
    }

    /// Remove every entry.
    pub async fn clear_registry(&self) {
        self.entries.write().await.clear();
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub async fn origin_of(&self, name: &str) -> Option<ArtifactOrigin> {
        self.entries.read().await.get(name).map(|entry| entry.origin)
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every entry, sorted by name.
    pub async fn entries(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<RegistryEntry> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        entries
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// True after any mutation not yet followed by a reconciliation pass.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}
