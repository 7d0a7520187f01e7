//! Wave planning over the watermark space.
//!
//! The planner turns an upper bound into the next wave of batches: up to
//! `max_parallel_batches` non-overlapping [`WatermarkRange`]s of at most
//! `batch_size` watermarks each, ordered newest-first so fresh data is
//! maintained before old data. The interval math is pure; the only I/O is
//! the single `max_watermark` read when the caller has no explicit bound,
//! or the one-time mapping of a creation-time window onto its watermark
//! span.

use std::sync::Arc;

use gantry_core::WatermarkRange;

use crate::error::{Error, Result};
use crate::operation::TimeWindow;
use crate::store::IndexStore;

/// Request for one wave of batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlanRequest {
    /// Upper bound (inclusive) for planning. `None` means "start from the
    /// newest row currently in the store".
    pub max_watermark: Option<i64>,
    /// Lower bound (inclusive) for planning; 1 unless the operation is
    /// restricted to a time window.
    pub min_watermark: i64,
    /// Maximum watermarks per batch.
    pub batch_size: usize,
    /// Maximum batches per wave.
    pub max_parallel_batches: usize,
}

impl BatchPlanRequest {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::invalid_input("batch size must be greater than zero"));
        }
        if self.max_parallel_batches == 0 {
            return Err(Error::invalid_input(
                "max parallel batches must be greater than zero",
            ));
        }
        if self.min_watermark < 1 {
            return Err(Error::invalid_input("min watermark must be at least 1"));
        }
        Ok(())
    }
}

/// Splits the span `[min, max]` into one wave of ranges, walking backward.
///
/// Returns at most `max_parallel` ranges of at most `batch_size` watermarks,
/// highest first. The lowest range is shortened to land exactly on `min`. A
/// `max` below `min` plans an empty wave. The math is pure: replanning at
/// the same bounds yields identical ranges.
#[must_use]
pub fn split_ranges(
    max: i64,
    min: i64,
    batch_size: usize,
    max_parallel: usize,
) -> Vec<WatermarkRange> {
    let batch_len = i64::try_from(batch_size).unwrap_or(i64::MAX).max(1);
    let min = min.max(1);

    let mut ranges = Vec::with_capacity(max_parallel);
    let mut end = max;
    while end >= min && ranges.len() < max_parallel {
        let start = (end - batch_len + 1).max(min);
        // Bounds are validated above, construction cannot fail.
        if let Ok(range) = WatermarkRange::new(start, end) {
            ranges.push(range);
        }
        end = start - 1;
    }
    ranges
}

/// Plans waves of watermark batches against the index store.
pub struct BatchPlanner {
    store: Arc<dyn IndexStore>,
}

impl BatchPlanner {
    /// Creates a planner over the given index store.
    #[must_use]
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self { store }
    }

    /// Plans the next wave of batches.
    ///
    /// Resolves the upper bound from the request or the store's current
    /// maximum, then applies [`split_ranges`]. An empty store (or an
    /// exhausted span) plans an empty wave, which the orchestrator treats
    /// as "finalize".
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for zero sizing knobs, or a storage
    /// error when the store's maximum cannot be read.
    pub async fn plan(&self, request: BatchPlanRequest) -> Result<Vec<WatermarkRange>> {
        request.validate()?;

        let max = match request.max_watermark {
            Some(max) => max,
            None => match self.store.max_watermark().await? {
                Some(max) => max,
                None => return Ok(Vec::new()),
            },
        };

        Ok(split_ranges(
            max,
            request.min_watermark,
            request.batch_size,
            request.max_parallel_batches,
        ))
    }

    /// Maps a creation-time window onto the watermark span it covers.
    ///
    /// Returns `None` when no rows fall inside the window. Called once per
    /// operation, before the first wave; the resolved span is persisted in
    /// the checkpoint and never re-derived.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the store cannot evaluate the window.
    pub async fn resolve_window(&self, window: TimeWindow) -> Result<Option<WatermarkRange>> {
        self.store.watermark_window(window).await
    }
}
