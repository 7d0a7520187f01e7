//! The deterministic control loop for one orchestration family.
//!
//! An orchestration walks the watermark space backward in **waves**: plan
//! the next ranges under the completed span, dispatch one executor call per
//! range (retried, joined in parallel), merge the outcomes into the
//! checkpoint with a pure reducer, and overwrite the persisted record. A
//! bounded number of waves forms a **segment**; when the bound is reached
//! the segment yields and a fresh one resumes from the checkpoint. This is
//! the checkpoint-and-restart equivalent of a durable engine's
//! continue-as-new: no single execution context's history grows unbounded.
//!
//! Control flow here stays replay-safe: the only store reads are the
//! one-time maximum-watermark capture and the executor calls themselves;
//! wave decisions are made once, from checkpoint data, never re-derived
//! from live state mid-wave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use gantry_core::WatermarkRange;

use crate::checkpoint::{BatchFailure, Checkpoint, CheckpointStore};
use crate::error::Result;
use crate::executor::{ActivityExecutor, BatchResult};
use crate::metrics::{FlowMetrics, TimingGuard};
use crate::operation::{BatchingOptions, FailurePolicy, OperationInput};
use crate::planner::{BatchPlanRequest, BatchPlanner};
use crate::retry::RetryPolicy;
use crate::store::IndexStore;

/// Shared cancellation flag for one operation.
///
/// Cancelling stops further wave dispatch; in-flight batches finish and the
/// checkpoint keeps every completed range, so resuming the family later is
/// safe.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Creates a fresh, uncancelled handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Tuning for one orchestration.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Batch sizing for wave planning.
    pub batching: BatchingOptions,
    /// Retry policy wrapped around every executor dispatch.
    pub retry: RetryPolicy,
    /// Waves per segment before continuing as a fresh execution context.
    pub max_waves_per_segment: usize,
    /// Consecutive waves without checkpoint advancement before an
    /// all-or-nothing operation gives up and fails.
    pub max_stalled_waves: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batching: BatchingOptions::default(),
            retry: RetryPolicy::default(),
            max_waves_per_segment: 8,
            max_stalled_waves: 3,
        }
    }
}

/// Terminal state of a finished orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    /// The planned span was exhausted (best-effort failures allowed).
    Completed,
    /// An all-or-nothing operation could not advance past a failing batch.
    Failed,
    /// Cancellation was requested; completed work is retained.
    Canceled,
}

impl TerminalState {
    /// Stable name used in metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

/// Outcome of one segment.
#[derive(Debug, Clone)]
pub enum SegmentOutcome {
    /// The wave budget was spent; restart a fresh segment from the
    /// checkpoint.
    Continued(Checkpoint),
    /// The orchestration reached a terminal state.
    Finalized(OperationOutcome),
}

/// Final result handed to the status projection.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    /// Terminal state reached.
    pub state: TerminalState,
    /// The checkpoint as of finalization.
    pub checkpoint: Checkpoint,
}

/// Outcome of one dispatched batch within a wave.
#[derive(Debug, Clone)]
struct WaveBatch {
    range: WatermarkRange,
    outcome: BatchOutcome,
}

#[derive(Debug, Clone)]
enum BatchOutcome {
    /// The executor ran to the end of the range (item failures included).
    Executed(BatchResult),
    /// The whole batch failed after exhausting the retry policy.
    Failed(String),
}

/// Result of the pure merge step.
struct MergedWave {
    checkpoint: Checkpoint,
    advanced: bool,
    /// Failures from ranges the checkpoint did not advance past; persisted
    /// only if the operation gives up on them.
    blocked: Vec<BatchFailure>,
}

/// Merges one wave of batch outcomes into the checkpoint.
///
/// Pure reducer `(Checkpoint, WaveResult) -> Checkpoint`: batches arrive
/// newest-first and contiguous by construction, so advancement extends the
/// completed span downward batch by batch.
///
/// Best-effort operations advance past every batch and record every
/// failure. All-or-nothing operations stop advancing at the first batch
/// with any failure; that range (and everything below) is replanned by the
/// next wave, and its failures stay out of the persisted error list until
/// the operation gives up retrying.
fn merge_wave(mut checkpoint: Checkpoint, batches: Vec<WaveBatch>, policy: FailurePolicy) -> MergedWave {
    let mut advanced = false;
    let mut blocked = Vec::new();
    let mut blocked_advancement = false;

    for batch in batches {
        let failures = match batch.outcome {
            BatchOutcome::Executed(result) => result.failures,
            BatchOutcome::Failed(message) => vec![BatchFailure {
                watermark: batch.range.start,
                sop_uid: None,
                message,
            }],
        };
        let clean = failures.is_empty();

        let advance_past = match policy {
            FailurePolicy::BestEffort => !blocked_advancement,
            FailurePolicy::AllOrNothing => !blocked_advancement && clean,
        };

        if advance_past {
            checkpoint.completed = Some(match checkpoint.completed {
                None => batch.range,
                // Contiguous by construction; fall back to the old span if a
                // planner bug ever produced a gap rather than fabricating
                // coverage.
                Some(current) => current.merge_lower(&batch.range).unwrap_or(current),
            });
            advanced = true;
            for failure in failures {
                push_deduped(&mut checkpoint.errors, failure);
            }
        } else {
            blocked_advancement = true;
            blocked.extend(failures);
        }
    }

    MergedWave {
        checkpoint,
        advanced,
        blocked,
    }
}

fn push_deduped(errors: &mut Vec<BatchFailure>, failure: BatchFailure) {
    if !errors.iter().any(|e| e == &failure) {
        errors.push(failure);
    }
}

/// Drives one orchestration family to completion.
pub struct Orchestrator {
    logical_id: String,
    input: OperationInput,
    planner: BatchPlanner,
    executor: Arc<dyn ActivityExecutor>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: OrchestratorConfig,
    cancel: CancelHandle,
    metrics: FlowMetrics,
}

impl Orchestrator {
    /// Creates an orchestrator for the given family.
    ///
    /// `logical_id` must be stable across continuations; use
    /// [`OperationInput::logical_id`].
    #[must_use]
    pub fn new(
        logical_id: impl Into<String>,
        input: OperationInput,
        store: Arc<dyn IndexStore>,
        executor: Arc<dyn ActivityExecutor>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: OrchestratorConfig,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            input,
            planner: BatchPlanner::new(store),
            executor,
            checkpoints,
            config,
            cancel,
            metrics: FlowMetrics::new(),
        }
    }

    /// Runs segments until the orchestration reaches a terminal state.
    ///
    /// Completed and failed operations discard their checkpoint record;
    /// cancelled operations keep it so a later request can resume strictly
    /// below the completed span.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for malformed inputs (fatal at
    /// planning, nothing dispatched), or a storage error when checkpoint
    /// persistence fails.
    pub async fn run(&self) -> Result<OperationOutcome> {
        loop {
            match self.run_segment().await? {
                SegmentOutcome::Continued(checkpoint) => {
                    debug!(
                        logical_id = %self.logical_id,
                        percent = checkpoint.percent_complete(),
                        "segment budget spent, continuing as new"
                    );
                }
                SegmentOutcome::Finalized(outcome) => {
                    self.metrics.record_operation_outcome(
                        self.input.kind().as_str(),
                        outcome.state.as_str(),
                    );
                    if outcome.state == TerminalState::Canceled {
                        self.checkpoints
                            .save(&self.logical_id, &outcome.checkpoint)
                            .await?;
                    } else {
                        self.checkpoints.delete(&self.logical_id).await?;
                    }
                    info!(
                        logical_id = %self.logical_id,
                        state = outcome.state.as_str(),
                        percent = outcome.checkpoint.percent_complete(),
                        errors = outcome.checkpoint.errors.len(),
                        "orchestration finalized"
                    );
                    return Ok(outcome);
                }
            }
        }
    }

    /// Runs one bounded execution segment.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for malformed inputs, or a storage
    /// error when checkpoint persistence fails.
    pub async fn run_segment(&self) -> Result<SegmentOutcome> {
        let mut checkpoint = self.load_or_create_checkpoint().await?;
        let policy = checkpoint.input.kind().failure_policy();
        let mut stalled = 0_usize;

        for _ in 0..self.config.max_waves_per_segment {
            if self.cancel.is_cancelled() {
                return Ok(SegmentOutcome::Finalized(OperationOutcome {
                    state: TerminalState::Canceled,
                    checkpoint,
                }));
            }

            // A time-windowed operation resolves its watermark span once,
            // before the first wave; the bounds live in the checkpoint from
            // then on.
            if checkpoint.original_max.is_none() {
                if let Some(window) = checkpoint.input.time_window() {
                    match self.planner.resolve_window(window).await? {
                        Some(span) => {
                            checkpoint.floor = span.start;
                            checkpoint.original_max = Some(span.end);
                        }
                        None => checkpoint.original_max = Some(0),
                    }
                    self.checkpoints.save(&self.logical_id, &checkpoint).await?;
                }
            }

            // First wave plans from the store's newest row; the captured
            // maximum is persisted and every later wave derives its bound
            // from the checkpoint alone.
            let max_watermark = if checkpoint.original_max.is_some() {
                match checkpoint.next_upper_bound() {
                    Some(upper) => Some(upper),
                    None => {
                        return Ok(SegmentOutcome::Finalized(
                            self.finalize(checkpoint, policy),
                        ));
                    }
                }
            } else {
                None
            };

            let ranges = self
                .planner
                .plan(BatchPlanRequest {
                    max_watermark,
                    min_watermark: checkpoint.floor,
                    batch_size: self.config.batching.size,
                    max_parallel_batches: self.config.batching.max_parallel,
                })
                .await?;

            if checkpoint.original_max.is_none() {
                checkpoint.original_max = Some(ranges.first().map_or(0, |range| range.end));
                self.checkpoints.save(&self.logical_id, &checkpoint).await?;
            }
            if ranges.is_empty() {
                return Ok(SegmentOutcome::Finalized(self.finalize(checkpoint, policy)));
            }

            let batches = self.dispatch_wave(&checkpoint.input, ranges).await;
            let merged = merge_wave(checkpoint, batches, policy);
            checkpoint = merged.checkpoint;
            self.checkpoints.save(&self.logical_id, &checkpoint).await?;

            if merged.advanced {
                stalled = 0;
            } else {
                stalled += 1;
                warn!(
                    logical_id = %self.logical_id,
                    stalled,
                    "wave made no progress"
                );
                if stalled >= self.config.max_stalled_waves {
                    for failure in merged.blocked {
                        push_deduped(&mut checkpoint.errors, failure);
                    }
                    self.checkpoints.save(&self.logical_id, &checkpoint).await?;
                    return Ok(SegmentOutcome::Finalized(OperationOutcome {
                        state: TerminalState::Failed,
                        checkpoint,
                    }));
                }
            }
        }

        Ok(SegmentOutcome::Continued(checkpoint))
    }

    async fn load_or_create_checkpoint(&self) -> Result<Checkpoint> {
        self.input.validate()?;

        match self.checkpoints.load(&self.logical_id).await? {
            Some(mut existing) => {
                // A resumed family folds the new request into the persisted
                // input (tag-key sets union).
                existing.input.merge(self.input.clone())?;
                Ok(existing)
            }
            None => Ok(Checkpoint::new(self.input.clone(), Utc::now())),
        }
    }

    async fn dispatch_wave(
        &self,
        input: &OperationInput,
        ranges: Vec<WatermarkRange>,
    ) -> Vec<WaveBatch> {
        let kind = input.kind().as_str();
        let metrics = self.metrics;
        let _wave_guard = TimingGuard::new(move |duration| {
            metrics.observe_wave_duration(kind, duration);
        });

        // Parallel join: every batch's outcome is collected, a failing
        // batch never short-circuits its siblings.
        let dispatches = ranges.into_iter().map(|range| async move {
            let outcome = self
                .config
                .retry
                .run("execute_batch", || self.executor.execute(range, input))
                .await;
            match outcome {
                Ok(result) => {
                    self.metrics.record_batch(kind, "succeeded");
                    self.metrics.record_item_failures(kind, result.failures.len());
                    WaveBatch {
                        range,
                        outcome: BatchOutcome::Executed(result),
                    }
                }
                Err(err) => {
                    self.metrics.record_batch(kind, "failed");
                    warn!(range = %range, "batch failed after retries: {err}");
                    WaveBatch {
                        range,
                        outcome: BatchOutcome::Failed(err.to_string()),
                    }
                }
            }
        });
        join_all(dispatches).await
    }

    #[allow(clippy::unused_self)]
    fn finalize(&self, checkpoint: Checkpoint, policy: FailurePolicy) -> OperationOutcome {
        let state = match policy {
            FailurePolicy::AllOrNothing if !checkpoint.errors.is_empty() => TerminalState::Failed,
            _ => TerminalState::Completed,
        };
        OperationOutcome { state, checkpoint }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::executor::StoreActivityExecutor;
    use crate::store::memory::{InMemoryBlobStore, InMemoryCheckpointStore, InMemoryIndexStore};
    use crate::store::BlobStore;
    use std::time::Duration;

    struct Harness {
        index: Arc<InMemoryIndexStore>,
        checkpoints: Arc<InMemoryCheckpointStore>,
        cancel: CancelHandle,
        config: OrchestratorConfig,
    }

    impl Harness {
        fn new(seeded: i64) -> Self {
            Self {
                index: Arc::new(InMemoryIndexStore::seeded(seeded)),
                checkpoints: Arc::new(InMemoryCheckpointStore::new()),
                cancel: CancelHandle::new(),
                config: OrchestratorConfig {
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
                },
            }
        }

        fn orchestrator(&self, input: OperationInput) -> Orchestrator {
            let index = Arc::clone(&self.index) as Arc<dyn IndexStore>;
            let blobs = Arc::new(InMemoryBlobStore::new()) as Arc<dyn BlobStore>;
            let executor = Arc::new(StoreActivityExecutor::new(Arc::clone(&index), blobs));
            Orchestrator::new(
                input.logical_id(),
                input,
                index,
                executor,
                Arc::clone(&self.checkpoints) as Arc<dyn CheckpointStore>,
                self.config,
                self.cancel.clone(),
            )
        }
    }

    fn reindex_input() -> OperationInput {
        OperationInput::Reindex { tag_keys: vec![7] }
    }

    #[tokio::test]
    async fn walks_backward_and_completes_full_span() {
        // MaxWatermark=25, BatchSize=10, MaxParallelBatches=2:
        // wave 1 covers [16,25]+[6,15], wave 2 covers [1,5].
        let harness = Harness::new(25);
        let outcome = harness.orchestrator(reindex_input()).run().await.unwrap();

        assert_eq!(outcome.state, TerminalState::Completed);
        assert_eq!(
            outcome.checkpoint.completed,
            Some(WatermarkRange::new(1, 25).unwrap())
        );
        assert_eq!(outcome.checkpoint.percent_complete(), 100);
        assert_eq!(harness.index.tag_row_count(7), 25);
    }

    #[tokio::test]
    async fn terminal_completion_discards_checkpoint() {
        let harness = Harness::new(25);
        let orchestrator = harness.orchestrator(reindex_input());
        orchestrator.run().await.unwrap();
        assert_eq!(harness.checkpoints.record_count(), 0);
    }

    #[tokio::test]
    async fn segment_budget_bounds_execution_history() {
        let mut harness = Harness::new(25);
        harness.config.max_waves_per_segment = 1;

        let orchestrator = harness.orchestrator(reindex_input());
        let outcome = orchestrator.run_segment().await.unwrap();

        let SegmentOutcome::Continued(checkpoint) = outcome else {
            panic!("first segment should continue");
        };
        assert_eq!(
            checkpoint.completed,
            Some(WatermarkRange::new(6, 25).unwrap())
        );

        // A fresh segment resumes strictly below the completed span.
        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome.state, TerminalState::Completed);
        assert_eq!(
            outcome.checkpoint.completed,
            Some(WatermarkRange::new(1, 25).unwrap())
        );
    }

    #[tokio::test]
    async fn restart_resumes_from_checkpoint_without_reprocessing() {
        let mut harness = Harness::new(30);
        harness.config.max_waves_per_segment = 1;

        // First process: one segment, then "crash".
        let first = harness.orchestrator(reindex_input());
        let SegmentOutcome::Continued(checkpoint) = first.run_segment().await.unwrap() else {
            panic!("expected continuation");
        };
        let resumed_below = checkpoint.completed.unwrap().start;
        drop(first);

        // Second process: same logical id, fresh orchestrator.
        let second = harness.orchestrator(reindex_input());
        let outcome = second.run().await.unwrap();

        assert_eq!(outcome.state, TerminalState::Completed);
        assert!(resumed_below > 1);
        // Idempotent re-execution: every row indexed exactly once.
        assert_eq!(harness.index.tag_row_count(7), 30);
    }

    #[tokio::test]
    async fn best_effort_records_failures_and_advances() {
        let harness = Harness::new(50);
        for watermark in [12, 25, 38] {
            harness.index.fail_watermark(watermark);
        }

        let outcome = harness.orchestrator(reindex_input()).run().await.unwrap();

        assert_eq!(outcome.state, TerminalState::Completed);
        assert_eq!(outcome.checkpoint.errors.len(), 3);
        assert_eq!(
            outcome.checkpoint.completed,
            Some(WatermarkRange::new(1, 50).unwrap())
        );
        assert_eq!(outcome.checkpoint.percent_complete(), 100);
    }

    #[tokio::test]
    async fn all_or_nothing_stalls_then_fails_on_persistent_row_failure() {
        let harness = Harness::new(25);
        harness.index.fail_watermark(20);

        let input = OperationInput::DeleteExtendedTag {
            tag_key: 7,
            tag_path: "00101010".into(),
            vr: "AS".into(),
        };
        let outcome = harness.orchestrator(input).run().await.unwrap();

        assert_eq!(outcome.state, TerminalState::Failed);
        assert!(!outcome.checkpoint.errors.is_empty());
        // The failing batch never entered the completed span.
        let completed = outcome.checkpoint.completed;
        assert!(completed.is_none_or(|range| !range.contains(20)));
    }

    #[tokio::test]
    async fn all_or_nothing_retries_blocked_range_and_completes_once_healed() {
        let mut harness = Harness::new(25);
        harness.config.max_waves_per_segment = 1;
        harness.index.fail_watermark(8);

        let input = OperationInput::DeleteExtendedTag {
            tag_key: 7,
            tag_path: "00101010".into(),
            vr: "AS".into(),
        };
        let orchestrator = harness.orchestrator(input);

        // Segment 1: [16,25] advances, [6,15] blocks on watermark 8.
        let SegmentOutcome::Continued(checkpoint) = orchestrator.run_segment().await.unwrap()
        else {
            panic!("expected continuation");
        };
        assert_eq!(
            checkpoint.completed,
            Some(WatermarkRange::new(16, 25).unwrap())
        );
        assert!(checkpoint.errors.is_empty());

        // Heal and resume: the blocked range is replanned and completes.
        harness.index.heal_watermark(8);
        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome.state, TerminalState::Completed);
        assert_eq!(
            outcome.checkpoint.completed,
            Some(WatermarkRange::new(1, 25).unwrap())
        );
        assert!(outcome.checkpoint.errors.is_empty());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_inside_the_wave() {
        let harness = Harness::new(10);
        harness.index.fail_transient_next(2);

        let outcome = harness.orchestrator(reindex_input()).run().await.unwrap();
        assert_eq!(outcome.state, TerminalState::Completed);
        assert!(outcome.checkpoint.errors.is_empty());
        assert_eq!(harness.index.tag_row_count(7), 10);
    }

    #[tokio::test]
    async fn cancellation_keeps_completed_work() {
        let mut harness = Harness::new(25);
        harness.config.max_waves_per_segment = 1;

        let orchestrator = harness.orchestrator(reindex_input());
        let SegmentOutcome::Continued(_) = orchestrator.run_segment().await.unwrap() else {
            panic!("expected continuation");
        };

        harness.cancel.cancel();
        let outcome = orchestrator.run().await.unwrap();
        assert_eq!(outcome.state, TerminalState::Canceled);
        assert_eq!(
            outcome.checkpoint.completed,
            Some(WatermarkRange::new(6, 25).unwrap())
        );

        // The checkpoint survives cancellation for a later resume.
        assert_eq!(harness.checkpoints.record_count(), 1);

        // Resume with a fresh handle: only [1,5] remains.
        harness.cancel = CancelHandle::new();
        let resumed = harness.orchestrator(reindex_input());
        let outcome = resumed.run().await.unwrap();
        assert_eq!(outcome.state, TerminalState::Completed);
        assert_eq!(outcome.checkpoint.percent_complete(), 100);
    }

    #[tokio::test]
    async fn empty_store_finalizes_without_dispatch() {
        let harness = Harness {
            index: Arc::new(InMemoryIndexStore::new()),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            cancel: CancelHandle::new(),
            config: OrchestratorConfig::default(),
        };
        let outcome = harness.orchestrator(reindex_input()).run().await.unwrap();
        assert_eq!(outcome.state, TerminalState::Completed);
        assert_eq!(outcome.checkpoint.percent_complete(), 100);
    }

    #[tokio::test]
    async fn invalid_input_fails_at_planning() {
        let harness = Harness::new(10);
        let orchestrator = harness.orchestrator(OperationInput::Reindex {
            tag_keys: Vec::new(),
        });
        let result = orchestrator.run().await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
        assert_eq!(harness.index.tag_row_count(7), 0);
    }

    #[test]
    fn merge_wave_is_a_pure_reducer() {
        let checkpoint = Checkpoint::new(reindex_input(), Utc::now());
        let batches = vec![
            WaveBatch {
                range: WatermarkRange::new(16, 25).unwrap(),
                outcome: BatchOutcome::Executed(BatchResult {
                    succeeded: 10,
                    failures: Vec::new(),
                }),
            },
            WaveBatch {
                range: WatermarkRange::new(6, 15).unwrap(),
                outcome: BatchOutcome::Executed(BatchResult {
                    succeeded: 10,
                    failures: Vec::new(),
                }),
            },
        ];

        let merged = merge_wave(checkpoint, batches, FailurePolicy::BestEffort);
        assert!(merged.advanced);
        assert_eq!(
            merged.checkpoint.completed,
            Some(WatermarkRange::new(6, 25).unwrap())
        );
    }

    #[test]
    fn merge_wave_blocks_all_or_nothing_at_first_failure() {
        let checkpoint = Checkpoint::new(reindex_input(), Utc::now());
        let batches = vec![
            WaveBatch {
                range: WatermarkRange::new(16, 25).unwrap(),
                outcome: BatchOutcome::Executed(BatchResult {
                    succeeded: 9,
                    failures: vec![BatchFailure {
                        watermark: 20,
                        sop_uid: None,
                        message: "row failed".into(),
                    }],
                }),
            },
            WaveBatch {
                range: WatermarkRange::new(6, 15).unwrap(),
                outcome: BatchOutcome::Executed(BatchResult {
                    succeeded: 10,
                    failures: Vec::new(),
                }),
            },
        ];

        let merged = merge_wave(checkpoint, batches, FailurePolicy::AllOrNothing);
        assert!(!merged.advanced);
        assert!(merged.checkpoint.completed.is_none());
        assert!(merged.checkpoint.errors.is_empty());
        assert_eq!(merged.blocked.len(), 1);
    }

    #[test]
    fn merge_wave_records_whole_batch_failures_best_effort() {
        let checkpoint = Checkpoint::new(reindex_input(), Utc::now());
        let batches = vec![
            WaveBatch {
                range: WatermarkRange::new(16, 25).unwrap(),
                outcome: BatchOutcome::Failed("retries exhausted".into()),
            },
            WaveBatch {
                range: WatermarkRange::new(6, 15).unwrap(),
                outcome: BatchOutcome::Executed(BatchResult {
                    succeeded: 10,
                    failures: Vec::new(),
                }),
            },
        ];

        let merged = merge_wave(checkpoint, batches, FailurePolicy::BestEffort);
        assert!(merged.advanced);
        assert_eq!(
            merged.checkpoint.completed,
            Some(WatermarkRange::new(6, 25).unwrap())
        );
        assert_eq!(merged.checkpoint.errors.len(), 1);
        assert_eq!(merged.checkpoint.errors[0].watermark, 16);
    }
}
