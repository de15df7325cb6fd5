//! Resumable artifact collection flows.
//!
//! - [`state`]: the serializable [`FlowState`] and the events and effects
//!   exchanged with the outside world
//! - [`engine`]: [`CollectionFlow`], the state machine itself
//! - [`output`]: output path templates and [`OutputAggregator`] sinks
//! - [`runner`]: [`FlowRunner`], which executes effects on tokio
//!
//! ## Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use artifact_collector::flow::{FileOutputAggregator, FlowArgs, FlowRunner};
//! use artifact_collector::knowledge_base::KnowledgeBase;
//! use artifact_collector::registry::REGISTRY;
//! use artifact_collector::transport::{LocalBulkTransfer, LocalTransport};
//!
//! # async fn example() -> anyhow::Result<()> {
//! REGISTRY.load_bundled().await?;
//! let runner = FlowRunner::new(
//!     REGISTRY.clone(),
//!     Arc::new(LocalTransport::new()),
//!     Arc::new(LocalBulkTransfer::new("/tmp/collection/files")),
//!     Arc::new(FileOutputAggregator::new("/tmp/collection")),
//! );
//!
//! let args = FlowArgs::new("C.1000", ["RunningProcesses", "UnixHostsFile"]).with_split_output(true);
//! let state = runner.run(args, KnowledgeBase::from_local_host()).await?;
//! println!("Flow {} finished as {:?}", state.flow_id, state.status());
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod output;
pub mod runner;
pub mod state;

pub use engine::CollectionFlow;
pub use output::{expand_template, output_path, FileOutputAggregator, InMemoryOutputAggregator, OutputAggregator};
pub use runner::{FlowHandle, FlowRunner};
pub use state::{
    ArtifactFailure, BulkOutcome, CancelMode, FlowArgs, FlowEffect, FlowEvent, FlowPhase, FlowState, FlowStatus,
    OperationOutcome, ResultRecord,
};
