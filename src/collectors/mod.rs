//! Source collectors.
//!
//! Every [`SourceType`] has one [`SourceCollector`] that turns an
//! [`ArtifactSource`] plus the client's knowledge base into a list of
//! [`Dispatch`] instructions. Collectors are pure: they never touch the
//! network or the disk, so the flow engine can run them inside its step
//! function and stay replayable.
//!
//! ```text
//! ArtifactSource ──► CollectorTable ──► SourceCollector ──► Vec<Dispatch>
//!                         │                                    │
//!                    unknown type                  Immediate / Remote /
//!                         ▼                        Retrieve / Expand
//!                 InvalidSource error
//! ```
//!
//! ## Usage Example
//!
//! ```no_run
//! use artifact_collector::collectors::{CollectContext, CollectorTable};
//! use artifact_collector::config::bundled_definitions;
//! use artifact_collector::knowledge_base::KnowledgeBase;
//!
//! # fn example() -> anyhow::Result<()> {
//! let table = CollectorTable::default();
//! let kb = KnowledgeBase::new("Linux");
//! let ctx = CollectContext::new(&kb, "C.1000");
//!
//! for def in bundled_definitions()? {
//!     for (index, source) in def.sources.iter().enumerate() {
//!         let dispatches = table.collect(&def.name, index, source, &ctx)?;
//!         println!("{}[{}]: {} dispatch(es)", def.name, index, dispatches.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod path_detection;
pub mod sources;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::artifact_types::SourceType;
use crate::config::definition::ArtifactSource;
use crate::error::{ArtifactError, Result};
use crate::knowledge_base::KnowledgeBase;
use crate::transport::RemoteOperation;

/// What to do with the results of a remote operation or expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultRoute {
    /// Store the records as collected results.
    Collect,
    /// Each record names a file to add to the bulk transfer batch.
    Retrieve,
    /// Scan the records for file paths and add those to the batch.
    DetectPaths,
}

/// One instruction produced by a source collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Dispatch {
    /// A result that needs no remote work.
    Immediate(Value),
    /// Work to run on the client.
    Remote {
        operation: RemoteOperation,
        route: ResultRoute,
    },
    /// A file to fetch through bulk transfer.
    Retrieve(String),
    /// Other artifacts to resolve and collect recursively.
    Expand { names: Vec<String>, route: ResultRoute },
}

/// Per-client inputs available to collectors.
#[derive(Debug, Clone, Copy)]
pub struct CollectContext<'a> {
    pub kb: &'a KnowledgeBase,
    pub client_id: &'a str,
}

impl<'a> CollectContext<'a> {
    pub fn new(kb: &'a KnowledgeBase, client_id: &'a str) -> Self {
        Self { kb, client_id }
    }
}

/// Strategy for one source type.
pub trait SourceCollector: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Translate `source` into dispatches. An `Err` is the reason the source
    /// is invalid.
    fn collect(&self, source: &ArtifactSource, ctx: &CollectContext<'_>) -> std::result::Result<Vec<Dispatch>, String>;
}

/// Maps each source type to its collector.
pub struct CollectorTable {
    collectors: HashMap<SourceType, Box<dyn SourceCollector>>,
}

impl CollectorTable {
    /// A table with no collectors.
    pub fn empty() -> Self {
        Self {
            collectors: HashMap::new(),
        }
    }

    /// Add or replace the collector for its source type.
    pub fn register(&mut self, collector: Box<dyn SourceCollector>) {
        self.collectors.insert(collector.source_type(), collector);
    }

    pub fn supports(&self, source_type: &SourceType) -> bool {
        self.collectors.contains_key(source_type)
    }

    /// Run the collector for `source`, which is source `index` of `artifact`.
    pub fn collect(
        &self,
        artifact: &str,
        index: usize,
        source: &ArtifactSource,
        ctx: &CollectContext<'_>,
    ) -> Result<Vec<Dispatch>> {
        let invalid = |reason: String| ArtifactError::InvalidSource {
            artifact: artifact.to_string(),
            index,
            source_type: source.source_type.to_string(),
            reason,
        };

        if let Some(reason) = &source.invalid {
            return Err(invalid(reason.clone()));
        }

        let collector = self
            .collectors
            .get(&source.source_type)
            .ok_or_else(|| invalid("unsupported source type".to_string()))?;

        collector.collect(source, ctx).map_err(invalid)
    }
}

impl Default for CollectorTable {
    /// A table with every built-in collector.
    fn default() -> Self {
        let mut table = Self::empty();
        for collector in sources::builtin_collectors() {
            table.register(collector);
        }
        table
    }
}
