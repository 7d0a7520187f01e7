//! The operations facade exposed to the API layer.
//!
//! [`OperationsService`] is the seam the (out-of-scope) HTTP transport
//! calls: start a maintenance operation, poll its status, cancel it, list
//! what is known. Every request routes through its family's
//! [`Aggregator`], so bursts coalesce instead of fanning out into duplicate
//! orchestrations; a completion proxy task notifies the aggregator when a
//! run finishes so at most one follow-up launches.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info};

use gantry_core::OperationId;

use crate::aggregator::{AddOutcome, Aggregator, OrchestrationSpawner};
use crate::checkpoint::CheckpointStore;
use crate::error::{Error, Result};
use crate::executor::StoreActivityExecutor;
use crate::metrics::FlowMetrics;
use crate::operation::{OperationInput, OperationKind};
use crate::orchestrator::{CancelHandle, Orchestrator, OrchestratorConfig, TerminalState};
use crate::status::{project, EnginePhase, OperationRuntimeStatus, OperationStatus};
use crate::store::{BlobStore, IndexStore};

/// Shared, mutable view of one registered operation.
struct OperationShared {
    kind: OperationKind,
    created: DateTime<Utc>,
    cancel: CancelHandle,
    phase: RwLock<EnginePhase>,
    logical_id: RwLock<Option<String>>,
    final_status: RwLock<Option<OperationStatus>>,
    /// Last status projected for a poller. Served when the live checkpoint
    /// is briefly gone (terminal cleanup) but the final status has not
    /// landed yet, so observed progress never regresses.
    last_observed: RwLock<Option<OperationStatus>>,
}

impl OperationShared {
    fn phase(&self) -> EnginePhase {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: EnginePhase) {
        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = phase;
    }
}

struct ServiceInner {
    index: Arc<dyn IndexStore>,
    blobs: Arc<dyn BlobStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: OrchestratorConfig,
    operations: RwLock<HashMap<OperationId, Arc<OperationShared>>>,
    family_current: RwLock<HashMap<OperationKind, OperationId>>,
    aggregators: Mutex<HashMap<OperationKind, Arc<Aggregator>>>,
    metrics: FlowMetrics,
}

/// Spawner wired to one family; launches the run task for a dispatch.
struct ServiceSpawner {
    inner: Weak<ServiceInner>,
    kind: OperationKind,
}

#[async_trait]
impl OrchestrationSpawner for ServiceSpawner {
    async fn spawn(&self) -> Result<()> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| Error::storage("operations service dropped"))?;

        let operation_id = OperationId::generate();
        let shared = Arc::new(OperationShared {
            kind: self.kind,
            created: Utc::now(),
            cancel: CancelHandle::new(),
            phase: RwLock::new(EnginePhase::Queued),
            logical_id: RwLock::new(None),
            final_status: RwLock::new(None),
            last_observed: RwLock::new(None),
        });

        {
            let mut operations = inner
                .operations
                .write()
                .map_err(|_| Error::storage("operations registry poisoned"))?;
            operations.insert(operation_id, Arc::clone(&shared));
        }
        {
            let mut current = inner
                .family_current
                .write()
                .map_err(|_| Error::storage("operations registry poisoned"))?;
            current.insert(self.kind, operation_id);
        }

        let kind = self.kind;
        let run_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            run_operation(run_inner, kind, operation_id, shared).await;
        });
        Ok(())
    }
}

/// Drives one dispatched orchestration and proxies its completion back to
/// the aggregator.
async fn run_operation(
    inner: Arc<ServiceInner>,
    kind: OperationKind,
    operation_id: OperationId,
    shared: Arc<OperationShared>,
) {
    let aggregator = family_aggregator(&inner, kind).await;

    let Some(input) = aggregator.claim().await else {
        // Nothing accumulated by start time; the launch is a no-op.
        shared.set_phase(EnginePhase::Terminal(TerminalState::Completed));
        notify_completion(&aggregator).await;
        return;
    };

    let logical_id = input.logical_id();
    *shared
        .logical_id
        .write()
        .unwrap_or_else(PoisonError::into_inner) = Some(logical_id.clone());
    shared.set_phase(EnginePhase::Dispatching);
    inner.metrics.set_active_operations(inner.active_count());

    let executor = Arc::new(StoreActivityExecutor::new(
        Arc::clone(&inner.index),
        Arc::clone(&inner.blobs),
    ));
    let orchestrator = Orchestrator::new(
        logical_id,
        input,
        Arc::clone(&inner.index),
        executor,
        Arc::clone(&inner.checkpoints),
        inner.config,
        shared.cancel.clone(),
    );

    match orchestrator.run().await {
        Ok(outcome) => {
            let status = project(
                operation_id,
                &outcome.checkpoint,
                EnginePhase::Terminal(outcome.state),
            );
            *shared
                .final_status
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(status);
            shared.set_phase(EnginePhase::Terminal(outcome.state));
        }
        Err(err) => {
            error!(operation_id = %operation_id, kind = %kind, "orchestration failed: {err}");
            let status = OperationStatus {
                operation_id,
                kind,
                runtime_status: OperationRuntimeStatus::Failed,
                percent_complete: 0,
                resources: Vec::new(),
                created: Some(shared.created),
                errors: vec![err.to_string()],
            };
            *shared
                .final_status
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(status);
            shared.set_phase(EnginePhase::Terminal(TerminalState::Failed));
        }
    }

    inner.metrics.set_active_operations(inner.active_count());
    notify_completion(&aggregator).await;
}

async fn notify_completion(aggregator: &Aggregator) {
    if let Err(err) = aggregator.on_upstream_completed().await {
        error!(kind = %aggregator.kind(), "follow-up dispatch failed: {err}");
    }
}

impl ServiceInner {
    fn active_count(&self) -> usize {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|shared| {
                !OperationRuntimeStatus::from_phase(shared.phase()).is_terminal()
            })
            .count()
    }
}

/// Resolves the singleton aggregator for one family, creating it on first
/// use. The spawner holds a weak reference so dropping the service tears
/// the cycle down.
async fn family_aggregator(inner: &Arc<ServiceInner>, kind: OperationKind) -> Arc<Aggregator> {
    let mut aggregators = inner.aggregators.lock().await;
    Arc::clone(aggregators.entry(kind).or_insert_with(|| {
        Arc::new(Aggregator::new(
            kind,
            Arc::new(ServiceSpawner {
                inner: Arc::downgrade(inner),
                kind,
            }),
        ))
    }))
}

/// Start/status/cancel facade over the orchestration engine.
pub struct OperationsService {
    inner: Arc<ServiceInner>,
}

impl OperationsService {
    /// Creates the service over the given collaborators.
    #[must_use]
    pub fn new(
        index: Arc<dyn IndexStore>,
        blobs: Arc<dyn BlobStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                index,
                blobs,
                checkpoints,
                config,
                operations: RwLock::new(HashMap::new()),
                family_current: RwLock::new(HashMap::new()),
                aggregators: Mutex::new(HashMap::new()),
                metrics: FlowMetrics::new(),
            }),
        }
    }

    /// Submits a maintenance operation.
    ///
    /// The request routes through its family's aggregator: when an
    /// orchestration is already in flight for the family, the input folds
    /// into it (or into the queued follow-up) and the id of the active
    /// operation is returned instead of a new one.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for malformed inputs, or a storage
    /// error when the launch could not be registered.
    pub async fn start(&self, input: OperationInput) -> Result<OperationId> {
        input.validate()?;
        let kind = input.kind();

        let aggregator = family_aggregator(&self.inner, kind).await;
        let outcome = aggregator.add(input).await?;

        let current = self
            .inner
            .family_current
            .read()
            .map_err(|_| Error::storage("operations registry poisoned"))?
            .get(&kind)
            .copied()
            .ok_or_else(|| Error::storage("dispatched operation was not registered"))?;

        match outcome {
            AddOutcome::Dispatched => {
                info!(operation_id = %current, %kind, "operation dispatched");
            }
            AddOutcome::Accumulated => {
                info!(operation_id = %current, %kind, "request folded into active operation");
            }
        }
        Ok(current)
    }

    /// Returns the current status of an operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationNotFound`] for unknown ids.
    pub async fn status(&self, operation_id: OperationId) -> Result<OperationStatus> {
        let shared = self.lookup(operation_id)?;

        if let Some(status) = shared
            .final_status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(status);
        }

        let logical_id = shared
            .logical_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(logical_id) = logical_id {
            if let Some(checkpoint) = self.inner.checkpoints.load(&logical_id).await? {
                let status = project(operation_id, &checkpoint, shared.phase());
                *shared
                    .last_observed
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(status.clone());
                return Ok(status);
            }
        }

        if let Some(mut status) = shared
            .last_observed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            status.runtime_status = OperationRuntimeStatus::from_phase(shared.phase());
            return Ok(status);
        }

        // Accepted but not yet claimed by a run: report pending.
        Ok(OperationStatus {
            operation_id,
            kind: shared.kind,
            runtime_status: OperationRuntimeStatus::from_phase(shared.phase()),
            percent_complete: 0,
            resources: Vec::new(),
            created: Some(shared.created),
            errors: Vec::new(),
        })
    }

    /// Requests cancellation of an operation.
    ///
    /// Returns true when the operation exists and was still cancellable;
    /// false when it had already reached a terminal state. Completed
    /// batches are never rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationNotFound`] for unknown ids.
    pub async fn cancel(&self, operation_id: OperationId) -> Result<bool> {
        let shared = self.lookup(operation_id)?;
        if OperationRuntimeStatus::from_phase(shared.phase()).is_terminal() {
            return Ok(false);
        }
        shared.cancel.cancel();
        info!(operation_id = %operation_id, "cancellation requested");
        Ok(true)
    }

    /// Lists the status of every known operation, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when a live checkpoint cannot be read.
    pub async fn list(&self) -> Result<Vec<OperationStatus>> {
        let ids: Vec<OperationId> = {
            let operations = self
                .inner
                .operations
                .read()
                .map_err(|_| Error::storage("operations registry poisoned"))?;
            let mut ids: Vec<OperationId> = operations.keys().copied().collect();
            ids.sort_unstable_by(|a, b| b.cmp(a));
            ids
        };

        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            statuses.push(self.status(id).await?);
        }
        Ok(statuses)
    }

    fn lookup(&self, operation_id: OperationId) -> Result<Arc<OperationShared>> {
        self.inner
            .operations
            .read()
            .map_err(|_| Error::storage("operations registry poisoned"))?
            .get(&operation_id)
            .cloned()
            .ok_or(Error::OperationNotFound { operation_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::BatchingOptions;
    use crate::retry::RetryPolicy;
    use crate::store::memory::{InMemoryBlobStore, InMemoryCheckpointStore, InMemoryIndexStore};
    use std::time::Duration;

    fn service(index: Arc<InMemoryIndexStore>) -> OperationsService {
        let config = OrchestratorConfig {
            batching: BatchingOptions {
                size: 10,
                max_parallel: 2,
            },
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..OrchestratorConfig::default()
        };
        OperationsService::new(
            index,
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            config,
        )
    }

    async fn wait_terminal(service: &OperationsService, id: OperationId) -> OperationStatus {
        for _ in 0..500 {
            let status = service.status(id).await.unwrap();
            if status.runtime_status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("operation {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn start_runs_to_completion() {
        let index = Arc::new(InMemoryIndexStore::seeded(25));
        let service = service(Arc::clone(&index));

        let id = service
            .start(OperationInput::Reindex { tag_keys: vec![7] })
            .await
            .unwrap();

        let status = wait_terminal(&service, id).await;
        assert_eq!(status.runtime_status, OperationRuntimeStatus::Completed);
        assert_eq!(status.percent_complete, 100);
        assert_eq!(status.resources, vec!["7".to_string()]);
        assert_eq!(index.tag_row_count(7), 25);
    }

    #[tokio::test]
    async fn status_rejects_unknown_ids() {
        let service = service(Arc::new(InMemoryIndexStore::seeded(1)));
        let result = service.status(OperationId::generate()).await;
        assert!(matches!(result, Err(Error::OperationNotFound { .. })));
    }

    #[tokio::test]
    async fn cancel_is_false_once_terminal() {
        let index = Arc::new(InMemoryIndexStore::seeded(5));
        let service = service(index);

        let id = service
            .start(OperationInput::DuplicateCleanup {})
            .await
            .unwrap();
        wait_terminal(&service, id).await;

        assert!(!service.cancel(id).await.unwrap());
    }

    #[tokio::test]
    async fn list_reports_known_operations() {
        let index = Arc::new(InMemoryIndexStore::seeded(5));
        let service = service(index);

        let id = service
            .start(OperationInput::Reindex { tag_keys: vec![3] })
            .await
            .unwrap();
        wait_terminal(&service, id).await;

        let statuses = service.list().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].operation_id, id);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_dispatch() {
        let service = service(Arc::new(InMemoryIndexStore::seeded(5)));
        let result = service
            .start(OperationInput::Reindex {
                tag_keys: Vec::new(),
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }
}
