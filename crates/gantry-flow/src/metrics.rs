//! Observability metrics for the orchestration engine.
//!
//! Exposed via the `metrics` crate facade; wire a Prometheus (or other)
//! recorder at process startup to export them.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `gantry_flow_batches_total` | Counter | `operation`, `result` | Batch outcomes per operation kind |
//! | `gantry_flow_wave_duration_seconds` | Histogram | `operation` | Plan-dispatch-merge wave duration |
//! | `gantry_flow_retries_total` | Counter | `activity` | Transient-failure retries |
//! | `gantry_flow_item_failures_total` | Counter | `operation` | Item-level failures recorded |
//! | `gantry_flow_operations_total` | Counter | `operation`, `status` | Terminal operation outcomes |
//! | `gantry_flow_active_operations` | Gauge | - | Currently running operations |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: batch outcomes per operation kind.
    pub const BATCHES_TOTAL: &str = "gantry_flow_batches_total";
    /// Histogram: wave duration in seconds.
    pub const WAVE_DURATION_SECONDS: &str = "gantry_flow_wave_duration_seconds";
    /// Counter: transient-failure retries.
    pub const RETRIES_TOTAL: &str = "gantry_flow_retries_total";
    /// Counter: item-level failures recorded into checkpoints.
    pub const ITEM_FAILURES_TOTAL: &str = "gantry_flow_item_failures_total";
    /// Counter: terminal operation outcomes.
    pub const OPERATIONS_TOTAL: &str = "gantry_flow_operations_total";
    /// Gauge: currently running operations.
    pub const ACTIVE_OPERATIONS: &str = "gantry_flow_active_operations";
}

/// Label keys used across metrics.
pub mod labels {
    /// Operation kind (reindex, export, ...).
    pub const OPERATION: &str = "operation";
    /// Batch result (succeeded, failed).
    pub const RESULT: &str = "result";
    /// Activity name for retry accounting.
    pub const ACTIVITY: &str = "activity";
    /// Terminal status (completed, failed, canceled).
    pub const STATUS: &str = "status";
}

/// High-level interface for recording engine metrics.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records one batch outcome.
    pub fn record_batch(self, operation: &str, result: &str) {
        counter!(
            names::BATCHES_TOTAL,
            labels::OPERATION => operation.to_string(),
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records item-level failures captured in a batch.
    pub fn record_item_failures(self, operation: &str, count: usize) {
        if count == 0 {
            return;
        }
        counter!(
            names::ITEM_FAILURES_TOTAL,
            labels::OPERATION => operation.to_string(),
        )
        .increment(count as u64);
    }

    /// Records a terminal operation outcome.
    pub fn record_operation_outcome(self, operation: &str, status: &str) {
        counter!(
            names::OPERATIONS_TOTAL,
            labels::OPERATION => operation.to_string(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Updates the active-operations gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_active_operations(self, count: usize) {
        gauge!(names::ACTIVE_OPERATIONS).set(count as f64);
    }

    /// Records one wave's duration.
    pub fn observe_wave_duration(self, operation: &str, duration: Duration) {
        histogram!(
            names::WAVE_DURATION_SECONDS,
            labels::OPERATION => operation.to_string(),
        )
        .record(duration.as_secs_f64());
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed
    /// duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
