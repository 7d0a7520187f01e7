//! # gantry-flow
//!
//! Watermark-range batch orchestration engine for Gantry index maintenance
//! operations.
//!
//! The study index grows by an append-only, monotonically increasing
//! sequence number (the *watermark*). Long-running maintenance operations
//! (extended-tag re-indexing, bulk export, content-length backfill,
//! duplicate-instance cleanup, extended-tag deletion) walk that space
//! backward in bounded batches. This crate provides:
//!
//! - **Batch Planning**: non-overlapping watermark ranges, newest first,
//!   capped per wave ([`planner`])
//! - **Orchestration**: the plan → dispatch → merge wave loop with
//!   checkpoint-and-restart segments bounding any single execution
//!   context's history ([`orchestrator`])
//! - **Coalescing**: one aggregator per operation family folds request
//!   bursts into a single active run plus at most one queued follow-up
//!   ([`aggregator`])
//! - **Status**: a stable public projection of runtime state and progress
//!   ([`status`])
//!
//! ## Guarantees
//!
//! - **No missed or doubled rows**: planned ranges partition the watermark
//!   span exactly; executors are idempotent upserts keyed by row identity
//! - **Restart safe**: the overwritten checkpoint is the only state a
//!   continuation needs; replanning never touches completed watermarks
//! - **Monotone progress**: percent-complete never regresses, failures
//!   included
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gantry_flow::operation::OperationInput;
//! use gantry_flow::orchestrator::OrchestratorConfig;
//! use gantry_flow::service::OperationsService;
//! use gantry_flow::store::memory::{
//!     InMemoryBlobStore, InMemoryCheckpointStore, InMemoryIndexStore,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> gantry_flow::error::Result<()> {
//! let service = OperationsService::new(
//!     Arc::new(InMemoryIndexStore::seeded(1_000)),
//!     Arc::new(InMemoryBlobStore::new()),
//!     Arc::new(InMemoryCheckpointStore::new()),
//!     OrchestratorConfig::default(),
//! );
//!
//! let id = service
//!     .start(OperationInput::Reindex { tag_keys: vec![7] })
//!     .await?;
//! let status = service.status(id).await?;
//! println!("{}: {}%", status.runtime_status, status.percent_complete);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod aggregator;
pub mod checkpoint;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod operation;
pub mod orchestrator;
pub mod planner;
pub mod retry;
pub mod runtime;
pub mod service;
pub mod status;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::aggregator::{AddOutcome, Aggregator, OrchestrationSpawner};
    pub use crate::checkpoint::{BatchFailure, Checkpoint, CheckpointStore};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{ActivityExecutor, BatchResult, StoreActivityExecutor};
    pub use crate::metrics::FlowMetrics;
    pub use crate::operation::{
        BatchingOptions, FailurePolicy, OperationInput, OperationKind, TimeWindow,
    };
    pub use crate::orchestrator::{
        CancelHandle, OperationOutcome, Orchestrator, OrchestratorConfig, TerminalState,
    };
    pub use crate::planner::{BatchPlanRequest, BatchPlanner};
    pub use crate::retry::RetryPolicy;
    pub use crate::runtime::FlowRuntimeConfig;
    pub use crate::service::OperationsService;
    pub use crate::status::{OperationRuntimeStatus, OperationStatus};
    pub use crate::store::{BlobStore, IndexStatus, IndexStore, PartitionEntry};
}
