//! Request coalescing for one operation family.
//!
//! A burst of requests targeting the same logical operation (N extended
//! tags added within seconds) must not produce N orchestrations. Each
//! family owns one [`Aggregator`]: a single-writer actor whose state is the
//! union of not-yet-dispatched inputs.
//!
//! The flow is two-phase, mirroring how a durable entity hands work to its
//! orchestration: [`add`](Aggregator::add) accumulates and requests a
//! launch if none is active; the launched orchestration
//! [`claim`](Aggregator::claim)s the merged state when it actually starts,
//! so requests landing between launch and start fold into it. A completion
//! proxy calls [`on_upstream_completed`](Aggregator::on_upstream_completed),
//! which dispatches at most one follow-up carrying whatever accumulated
//! meanwhile.
//!
//! Invariant: per family, at most one orchestration is ever active and at
//! most one more is logically queued as accumulated state. This is a
//! coalescing queue, not a FIFO: later merges combine with earlier ones
//! before dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::operation::{OperationInput, OperationKind};

/// Launches one orchestration run for the aggregator's family.
///
/// Implementations only schedule the run; the runner claims the merged
/// input from the aggregator when it starts.
#[async_trait]
pub trait OrchestrationSpawner: Send + Sync {
    /// Requests one orchestration launch.
    async fn spawn(&self) -> Result<()>;
}

/// Outcome of an [`Aggregator::add`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// No orchestration was active; a launch was dispatched.
    Dispatched,
    /// One is active; the input was folded into the pending state.
    Accumulated,
}

#[derive(Debug, Default)]
struct AggregatorState {
    active: bool,
    pending: Option<OperationInput>,
}

/// Single-writer coalescing actor for one operation family.
pub struct Aggregator {
    kind: OperationKind,
    spawner: Arc<dyn OrchestrationSpawner>,
    state: Mutex<AggregatorState>,
}

impl Aggregator {
    /// Creates the aggregator for one family.
    #[must_use]
    pub fn new(kind: OperationKind, spawner: Arc<dyn OrchestrationSpawner>) -> Self {
        Self {
            kind,
            spawner,
            state: Mutex::new(AggregatorState::default()),
        }
    }

    /// The family this aggregator serializes.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Merges a request into the family state, launching an orchestration
    /// if none is active.
    ///
    /// State mutations are serialized through the actor's mutex; the lock
    /// is held across the launch so a concurrent `add` observes `active`
    /// before deciding to accumulate.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error when the input belongs to a different
    /// family, or the spawner's error when the launch fails (the input
    /// stays pending for the next trigger in that case).
    pub async fn add(&self, input: OperationInput) -> Result<AddOutcome> {
        if input.kind() != self.kind {
            return Err(Error::invalid_input(format!(
                "aggregator for {} received {} input",
                self.kind,
                input.kind()
            )));
        }

        let mut state = self.state.lock().await;
        match state.pending.as_mut() {
            Some(pending) => pending.merge(input)?,
            None => state.pending = Some(input),
        }

        if state.active {
            debug!(kind = %self.kind, "orchestration active, accumulating");
            return Ok(AddOutcome::Accumulated);
        }

        state.active = true;
        if let Err(err) = self.spawner.spawn().await {
            state.active = false;
            return Err(err);
        }
        Ok(AddOutcome::Dispatched)
    }

    /// Claims the merged state for an orchestration that is starting.
    ///
    /// Clears the pending state; requests arriving after the claim
    /// accumulate for the follow-up.
    pub async fn claim(&self) -> Option<OperationInput> {
        let mut state = self.state.lock().await;
        state.pending.take()
    }

    /// Signals that the dispatched orchestration finished.
    ///
    /// Dispatches exactly one follow-up when requests accumulated during
    /// the run; goes idle otherwise. Returns true when a follow-up was
    /// launched.
    ///
    /// # Errors
    ///
    /// Returns the spawner's error when the follow-up launch fails; the
    /// aggregator goes idle and the pending state is retained for the next
    /// `add`.
    pub async fn on_upstream_completed(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.pending.is_none() {
            state.active = false;
            return Ok(false);
        }

        if let Err(err) = self.spawner.spawn().await {
            state.active = false;
            return Err(err);
        }
        Ok(true)
    }
}
