//! Checkpoint state carried across orchestration continuations.
//!
//! A [`Checkpoint`] is the only state that survives a segment boundary. It
//! records the contiguous watermark span completed so far, the original
//! upper bound the operation was planned against, the owning input, and the
//! accumulated item failures. The record is overwritten in place at every
//! continuation; history never grows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gantry_core::WatermarkRange;

use crate::error::Result;
use crate::operation::OperationInput;

/// One recorded item or batch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    /// Watermark of the failing row, or the batch's start watermark for a
    /// whole-batch failure.
    pub watermark: i64,
    /// SOP instance UID of the failing row, when the failure is item-level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sop_uid: Option<String>,
    /// Human-readable failure description. Never a raw stack trace.
    pub message: String,
}

/// Persisted progress state for one orchestration family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Contiguous span of completed watermarks, growing downward from
    /// `original_max` toward `floor`. Unset until the first wave lands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<WatermarkRange>,
    /// The highest watermark the operation covers, captured when it
    /// started; part of the percent-complete denominator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_max: Option<i64>,
    /// The lowest watermark the operation may touch: 1 unless the input
    /// carries a time window.
    #[serde(default = "default_floor")]
    pub floor: i64,
    /// When the operation was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// The input this orchestration family owns.
    pub input: OperationInput,
    /// Accumulated failures, surfaced through the status projection.
    #[serde(default)]
    pub errors: Vec<BatchFailure>,
}

fn default_floor() -> i64 {
    1
}

impl Checkpoint {
    /// Creates a fresh checkpoint for a newly started operation.
    #[must_use]
    pub fn new(input: OperationInput, created: DateTime<Utc>) -> Self {
        Self {
            completed: None,
            original_max: None,
            floor: default_floor(),
            created: Some(created),
            input,
            errors: Vec::new(),
        }
    }

    /// Percent of the originally planned span `[floor, original_max]`
    /// completed, in `[0, 100]`.
    ///
    /// Derived as `completed.len() / span * 100`, floored. Returns 0 until
    /// the first wave completes, and 100 when the span was empty at start
    /// (nothing to plan). Because `completed` only grows and the span is
    /// fixed at start, the value is monotonically non-decreasing across
    /// continuations.
    #[must_use]
    pub fn percent_complete(&self) -> u8 {
        let Some(max) = self.original_max else {
            return 0;
        };
        let span = max - self.floor + 1;
        if max <= 0 || span <= 0 {
            return 100;
        }
        let Some(completed) = self.completed else {
            return 0;
        };
        let percent = completed.len().saturating_mul(100) / span;
        u8::try_from(percent.clamp(0, 100)).unwrap_or(100)
    }

    /// Upper bound for the next wave: one below the completed span, or the
    /// original maximum when nothing has completed yet.
    ///
    /// Returns `None` once the span is exhausted (completed down to the
    /// floor).
    #[must_use]
    pub fn next_upper_bound(&self) -> Option<i64> {
        match self.completed {
            None => self.original_max,
            Some(range) if range.start > self.floor => Some(range.start - 1),
            Some(_) => None,
        }
    }
}

/// Persistence for checkpoint records, keyed by the family's logical id.
///
/// Implementations overwrite the record on save; there is exactly one
/// checkpoint per orchestration family at any time.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the checkpoint for a family, if one exists.
    async fn load(&self, logical_id: &str) -> Result<Option<Checkpoint>>;

    /// Saves (overwrites) the checkpoint for a family.
    async fn save(&self, logical_id: &str, checkpoint: &Checkpoint) -> Result<()>;

    /// Deletes the checkpoint for a family once it reaches a terminal state.
    async fn delete(&self, logical_id: &str) -> Result<()>;
}
