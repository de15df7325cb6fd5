//! Tokio driver for collection flows.
//!
//! Each flow gets one task that owns its [`FlowState`] and one channel
//! carrying responses into it. Remote operations and the bulk transfer run
//! as separate tasks, bounded by a semaphore and a per-operation timeout,
//! and report back over the channel. When the flow reaches a terminal phase
//! its cancellation token stops whatever is still running.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collectors::CollectorTable;
use crate::config::CollectorConfig;
use crate::constants::{DEFAULT_OPERATION_TIMEOUT_SECS, MAX_CONCURRENT_OPERATIONS_CAP, OUTPUT_AGGREGATOR};
use crate::error::ArtifactError;
use crate::flow::engine::CollectionFlow;
use crate::flow::output::OutputAggregator;
use crate::flow::state::{
    BulkOutcome, CancelMode, FlowArgs, FlowEffect, FlowEvent, FlowPhase, FlowState, OperationOutcome,
};
use crate::knowledge_base::KnowledgeBase;
use crate::registry::ArtifactRegistry;
use crate::transport::{BulkTransfer, RemoteTransport};

/// Runs flows against a set of collaborators.
#[derive(Clone)]
pub struct FlowRunner {
    registry: Arc<ArtifactRegistry>,
    transport: Arc<dyn RemoteTransport>,
    bulk: Arc<dyn BulkTransfer>,
    output: Arc<dyn OutputAggregator>,
    flow: Arc<CollectionFlow>,
    operation_timeout: Duration,
    max_concurrent_operations: usize,
}

/// Handle to a running flow.
pub struct FlowHandle {
    events: mpsc::UnboundedSender<FlowEvent>,
    task: JoinHandle<FlowState>,
}

impl FlowHandle {
    /// Ask the flow to stop at its next suspension point. Has no effect on a
    /// flow that already finished.
    pub fn cancel(&self, mode: CancelMode) {
        if self.events.send(FlowEvent::Cancel(mode)).is_err() {
            debug!("Cancel requested for a finished flow");
        }
    }

    /// Wait for the flow to reach `DONE` or `ERROR`.
    pub async fn wait(self) -> Result<FlowState> {
        self.task.await.context("Flow task failed")
    }
}

impl FlowRunner {
    pub fn new(
        registry: Arc<ArtifactRegistry>,
        transport: Arc<dyn RemoteTransport>,
        bulk: Arc<dyn BulkTransfer>,
        output: Arc<dyn OutputAggregator>,
    ) -> Self {
        Self {
            registry,
            transport,
            bulk,
            output,
            flow: Arc::new(CollectionFlow::default()),
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            max_concurrent_operations: std::cmp::min(num_cpus::get() * 2, MAX_CONCURRENT_OPERATIONS_CAP),
        }
    }

    /// Apply timeout, concurrency and recursion limits from `config`.
    pub fn with_config(mut self, config: &CollectorConfig) -> Self {
        self.operation_timeout = config.operation_timeout();
        self.max_concurrent_operations = config.max_concurrent_operations();
        self.flow = Arc::new(CollectionFlow::new(CollectorTable::default()).with_max_group_depth(config.max_group_depth));
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_operations(mut self, limit: usize) -> Self {
        self.max_concurrent_operations = limit.max(1);
        self
    }

    pub fn with_flow(mut self, flow: CollectionFlow) -> Self {
        self.flow = Arc::new(flow);
        self
    }

    /// Start collecting `args.artifact_list` from `args.client_id`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn collect_artifacts(&self, args: FlowArgs, kb: KnowledgeBase) -> FlowHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = self.clone();
        let events = tx.clone();

        let task = tokio::spawn(async move {
            let (state, effects) = runner.flow.start(&runner.registry, &args, kb).await;
            runner.drive(state, effects, events, rx).await
        });

        FlowHandle { events: tx, task }
    }

    /// Continue a flow restored from storage by re-issuing its outstanding
    /// requests.
    pub fn resume_flow(&self, state: FlowState) -> FlowHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = self.clone();
        let events = tx.clone();

        let task = tokio::spawn(async move {
            let effects = state.outstanding_effects();
            info!("Resuming flow {} with {} outstanding effect(s)", state.flow_id, effects.len());
            runner.drive(state, effects, events, rx).await
        });

        FlowHandle { events: tx, task }
    }

    /// Collect and wait for the result.
    pub async fn run(&self, args: FlowArgs, kb: KnowledgeBase) -> Result<FlowState> {
        self.collect_artifacts(args, kb).wait().await
    }

    async fn drive(
        &self,
        mut state: FlowState,
        effects: Vec<FlowEffect>,
        events: mpsc::UnboundedSender<FlowEvent>,
        mut rx: mpsc::UnboundedReceiver<FlowEvent>,
    ) -> FlowState {
        let token = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_operations));

        state = self.execute(state, effects, &events, &token, &semaphore).await;

        while !state.is_terminal() {
            let Some(event) = rx.recv().await else {
                break;
            };
            let (next, effects) = CollectionFlow::resume(state, event);
            state = self.execute(next, effects, &events, &token, &semaphore).await;
        }

        token.cancel();
        state
    }

    /// Perform side effects. Remote work is spawned, output writes are
    /// awaited in place.
    async fn execute(
        &self,
        mut state: FlowState,
        effects: Vec<FlowEffect>,
        events: &mpsc::UnboundedSender<FlowEvent>,
        token: &CancellationToken,
        semaphore: &Arc<Semaphore>,
    ) -> FlowState {
        for effect in effects {
            match effect {
                FlowEffect::Invoke {
                    request_id,
                    client_id,
                    operation,
                } => {
                    let transport = Arc::clone(&self.transport);
                    let semaphore = Arc::clone(semaphore);
                    let events = events.clone();
                    let token = token.clone();
                    let timeout = self.operation_timeout;

                    tokio::spawn(async move {
                        let work = async {
                            let _permit = semaphore.acquire_owned().await;
                            match tokio::time::timeout(timeout, transport.invoke(&client_id, &operation)).await {
                                Ok(Ok(records)) => OperationOutcome::Success(records),
                                Ok(Err(e)) => OperationOutcome::Failed(format!("{:#}", e)),
                                Err(_) => {
                                    warn!("{} for {} timed out after {:?}", operation.name(), client_id, timeout);
                                    OperationOutcome::TimedOut
                                }
                            }
                        };

                        tokio::select! {
                            _ = token.cancelled() => {}
                            outcome = work => {
                                let _ = events.send(FlowEvent::OperationCompleted { request_id, outcome });
                            }
                        }
                    });
                }
                FlowEffect::BulkTransfer {
                    request_id,
                    client_id,
                    pathspecs,
                } => {
                    let bulk = Arc::clone(&self.bulk);
                    let events = events.clone();
                    let token = token.clone();
                    let timeout = self.operation_timeout;

                    tokio::spawn(async move {
                        let work = async {
                            match tokio::time::timeout(timeout, bulk.start(&client_id, &pathspecs)).await {
                                Ok(Ok(results)) => BulkOutcome::Success(results),
                                Ok(Err(e)) => BulkOutcome::Failed(format!("{:#}", e)),
                                Err(_) => BulkOutcome::TimedOut,
                            }
                        };

                        tokio::select! {
                            _ = token.cancelled() => {}
                            outcome = work => {
                                let _ = events.send(FlowEvent::BulkTransferCompleted { request_id, outcome });
                            }
                        }
                    });
                }
                FlowEffect::WriteOutput { path, records } => {
                    if let Err(e) = self.output.write(&path, &records).await {
                        error!("Failed to write output {}: {:#}", path, e);
                        state.error = Some(ArtifactError::unavailable(OUTPUT_AGGREGATOR, format!("{:#}", e)));
                        state.phase = FlowPhase::Error;
                    }
                }
            }
        }
        state
    }
}
