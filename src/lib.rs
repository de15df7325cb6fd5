//! # artifact_collector
//!
//! Declarative forensic artifact collection: an artifact registry fed by
//! definition files and a persisted definition store, and a resumable flow
//! engine that turns a list of artifact names into collected results for
//! one endpoint.
//!
//! ## Overview
//!
//! Artifacts are described in YAML rather than code. A definition lists
//! sources (commands to run, files to fetch, registry keys to read, other
//! artifacts to include) and the operating systems and conditions under
//! which it applies. The flow engine resolves those definitions against a
//! client's knowledge base, dispatches the remote operations they need,
//! batches every file fetch into one bulk transfer and hands the aggregated
//! results to an output sink.
//!
//! ## Features
//!
//! - **Lazy registry reconciliation**: uploaded definitions are picked up on
//!   the first lookup miss, stale ones are evicted
//! - **Resumable flows**: the whole flow state is serializable and the
//!   transition function is pure
//! - **Fault isolation**: a malformed or inapplicable artifact never aborts
//!   the rest of the collection
//! - **Local collaborators**: run collections against the local host out of
//!   the box
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use artifact_collector::flow::{FlowArgs, FlowRunner, InMemoryOutputAggregator};
//! use artifact_collector::knowledge_base::KnowledgeBase;
//! use artifact_collector::registry::ArtifactRegistry;
//! use artifact_collector::transport::{LocalBulkTransfer, LocalTransport};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = Arc::new(ArtifactRegistry::new());
//! registry.load_bundled().await?;
//!
//! let runner = FlowRunner::new(
//!     registry,
//!     Arc::new(LocalTransport::new()),
//!     Arc::new(LocalBulkTransfer::new("/tmp/files")),
//!     Arc::new(InMemoryOutputAggregator::new()),
//! );
//! let state = runner
//!     .run(FlowArgs::new("local", ["UnixHostsFile"]), KnowledgeBase::from_local_host())
//!     .await?;
//!
//! println!("{:?}: {} failure(s)", state.status(), state.failures.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: Artifact definition model and collector configuration
//! - [`registry`]: Artifact registry and definition stores
//! - [`collectors`]: Per-source-type collection strategies
//! - [`flow`]: Collection flow state machine and its tokio runner
//! - [`transport`]: Remote operation and bulk transfer collaborators
//! - [`knowledge_base`]: Per-client facts used for applicability and
//!   interpolation
//! - [`error`]: Error taxonomy
//! - [`utils`]: Hashing, path handling and flow summaries
//! - [`constants`]: Application-wide constants

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Artifact definitions, interpolation and collector configuration
pub mod config;

/// Application constants and configuration values
pub mod constants;

/// Error types shared by the registry and the flow engine
pub mod error;

/// Per-client facts
pub mod knowledge_base;

/// Artifact registry
pub mod registry;

/// Source collectors
pub mod collectors;

/// Collection flows
pub mod flow;

/// Remote transport and bulk transfer collaborators
pub mod transport;

/// Utility functions for hashing, paths and summaries
pub mod utils;
