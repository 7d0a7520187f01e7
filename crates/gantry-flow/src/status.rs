//! Caller-facing status projection.
//!
//! The engine's internal phases (planning, dispatching, merging,
//! continuing) are implementation vocabulary; polling clients get the
//! stable [`OperationRuntimeStatus`] enum and a monotone percent-complete,
//! never executor-specific states or raw error chains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gantry_core::OperationId;

use crate::checkpoint::Checkpoint;
use crate::operation::{OperationInput, OperationKind};
use crate::orchestrator::TerminalState;

/// Engine-native execution phase.
///
/// Internal vocabulary only; always projected through
/// [`OperationRuntimeStatus::from_phase`] before leaving the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Accepted, no wave dispatched yet.
    Queued,
    /// Planning the next wave.
    Planning,
    /// Executor calls in flight.
    Dispatching,
    /// Folding wave results into the checkpoint.
    Merging,
    /// Segment budget spent, restarting as a fresh execution context.
    Continuing,
    /// Terminal.
    Terminal(TerminalState),
}

/// Stable public runtime status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationRuntimeStatus {
    /// Accepted but not yet running.
    Pending,
    /// Making progress (any internal non-terminal phase).
    Running,
    /// Finished; best-effort item failures may be listed in `errors`.
    Completed,
    /// Gave up before exhausting the planned span.
    Failed,
    /// Stopped on request; completed work is retained.
    Canceled,
}

impl OperationRuntimeStatus {
    /// Maps an engine phase onto the public vocabulary.
    #[must_use]
    pub const fn from_phase(phase: EnginePhase) -> Self {
        match phase {
            EnginePhase::Queued => Self::Pending,
            EnginePhase::Planning
            | EnginePhase::Dispatching
            | EnginePhase::Merging
            | EnginePhase::Continuing => Self::Running,
            EnginePhase::Terminal(TerminalState::Completed) => Self::Completed,
            EnginePhase::Terminal(TerminalState::Failed) => Self::Failed,
            EnginePhase::Terminal(TerminalState::Canceled) => Self::Canceled,
        }
    }

    /// Returns true for completed, failed, and canceled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for OperationRuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Point-in-time status of one maintenance operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    /// The operation's id.
    pub operation_id: OperationId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Public runtime status.
    pub runtime_status: OperationRuntimeStatus,
    /// Percent of the originally planned span completed, `[0, 100]`.
    pub percent_complete: u8,
    /// Resources the operation touches (tag keys, export destination).
    pub resources: Vec<String>,
    /// When the operation was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Failure summaries accumulated so far.
    pub errors: Vec<String>,
}

/// Projects a checkpoint and engine phase into the public status.
///
/// Percent-complete comes straight off the checkpoint, so a poller always
/// sees the latest true progress, mid-failure included.
#[must_use]
pub fn project(
    operation_id: OperationId,
    checkpoint: &Checkpoint,
    phase: EnginePhase,
) -> OperationStatus {
    OperationStatus {
        operation_id,
        kind: checkpoint.input.kind(),
        runtime_status: OperationRuntimeStatus::from_phase(phase),
        percent_complete: checkpoint.percent_complete(),
        resources: affected_resources(&checkpoint.input),
        created: checkpoint.created,
        errors: checkpoint
            .errors
            .iter()
            .map(|failure| match &failure.sop_uid {
                Some(sop_uid) => {
                    format!(
                        "watermark {} ({sop_uid}): {}",
                        failure.watermark, failure.message
                    )
                }
                None => format!("batch at watermark {}: {}", failure.watermark, failure.message),
            })
            .collect(),
    }
}

/// Resource descriptors affected by an input.
fn affected_resources(input: &OperationInput) -> Vec<String> {
    match input {
        OperationInput::Reindex { tag_keys } => {
            tag_keys.iter().map(ToString::to_string).collect()
        }
        OperationInput::Export { destination, .. } => vec![destination.clone()],
        OperationInput::DeleteExtendedTag { tag_path, .. } => vec![tag_path.clone()],
        OperationInput::ContentLengthBackfill { .. } | OperationInput::DuplicateCleanup {} => {
            Vec::new()
        }
    }
}
