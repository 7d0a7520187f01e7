//! Activity execution: the side-effecting work unit for one batch.
//!
//! The orchestrator dispatches one [`ActivityExecutor::execute`] call per
//! planned range. The executor holds no state between invocations; every
//! effect goes through the store traits and is keyed by the row identifier,
//! so re-executing a range after a crash overwrites rather than duplicates.
//!
//! Failure handling per item:
//! - transient errors propagate as a batch error so the retry policy
//!   re-runs the whole (idempotent) batch
//! - conflicts count as success: the row the executor wanted is already there
//! - anything else is captured into the batch's failure list without
//!   aborting the remaining items

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use gantry_core::{InstanceIdentifier, WatermarkRange};

use crate::checkpoint::BatchFailure;
use crate::error::{Error, Result};
use crate::operation::OperationInput;
use crate::store::{BlobStore, IndexStatus, IndexStore};

/// Outcome of executing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Items processed successfully (conflicts included).
    pub succeeded: usize,
    /// Item-level failures, surfaced through the checkpoint.
    pub failures: Vec<BatchFailure>,
}

impl BatchResult {
    /// Returns true if every item in the batch succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The work unit invoked once per batch.
#[async_trait]
pub trait ActivityExecutor: Send + Sync {
    /// Executes the operation over one watermark range.
    ///
    /// Must be idempotent: the orchestrator re-dispatches ranges after
    /// transient failures and process restarts.
    async fn execute(&self, range: WatermarkRange, input: &OperationInput) -> Result<BatchResult>;
}

/// Store-backed executor covering every operation kind.
pub struct StoreActivityExecutor {
    index: Arc<dyn IndexStore>,
    blobs: Arc<dyn BlobStore>,
}

impl StoreActivityExecutor {
    /// Creates an executor over the given collaborators.
    #[must_use]
    pub fn new(index: Arc<dyn IndexStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { index, blobs }
    }

    async fn reindex(&self, range: WatermarkRange, tag_keys: &[i32]) -> Result<BatchResult> {
        let identifiers = self
            .index
            .instance_identifiers(range, IndexStatus::Created)
            .await?;

        let mut result = BatchResult::default();
        for identifier in &identifiers {
            match self.index.upsert_tag_rows(identifier, tag_keys).await {
                Ok(()) => result.succeeded += 1,
                Err(err) => record_item_outcome(&mut result, identifier, err)?,
            }
        }
        Ok(result)
    }

    async fn export(
        &self,
        range: WatermarkRange,
        source: &str,
        destination: &str,
        error_href: &str,
    ) -> Result<BatchResult> {
        let identifiers = self
            .index
            .instance_identifiers(range, IndexStatus::Created)
            .await?;

        let mut result = BatchResult::default();
        for identifier in identifiers
            .iter()
            .filter(|identifier| matches_source(identifier, source))
        {
            match self.blobs.copy_instance(identifier, destination).await {
                Ok(()) => result.succeeded += 1,
                Err(err) if err.is_transient() => return Err(err),
                Err(Error::Conflict { .. }) => result.succeeded += 1,
                Err(err) => {
                    let line = format!("{identifier}: {err}");
                    self.blobs.append_error(error_href, &line).await?;
                    push_failure(&mut result, identifier, &err);
                }
            }
        }
        Ok(result)
    }

    async fn backfill_content_length(&self, range: WatermarkRange) -> Result<BatchResult> {
        let identifiers = self
            .index
            .instance_identifiers(range, IndexStatus::Created)
            .await?;

        let mut result = BatchResult::default();
        for identifier in &identifiers {
            let length = match self.blobs.content_length(identifier).await {
                Ok(Some(length)) => length,
                Ok(None) => {
                    push_failure(
                        &mut result,
                        identifier,
                        &Error::storage("blob missing for instance"),
                    );
                    continue;
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    push_failure(&mut result, identifier, &err);
                    continue;
                }
            };

            match self.index.set_content_length(identifier, length).await {
                Ok(()) => result.succeeded += 1,
                Err(err) => record_item_outcome(&mut result, identifier, err)?,
            }
        }
        Ok(result)
    }

    async fn delete_tag(&self, range: WatermarkRange, tag_key: i32) -> Result<BatchResult> {
        let identifiers = self
            .index
            .instance_identifiers(range, IndexStatus::Created)
            .await?;

        let mut result = BatchResult::default();
        for identifier in &identifiers {
            match self.index.delete_tag_rows(identifier, tag_key).await {
                Ok(()) => result.succeeded += 1,
                Err(err) => record_item_outcome(&mut result, identifier, err)?,
            }
        }
        Ok(result)
    }

    async fn cleanup_duplicates(&self, range: WatermarkRange) -> Result<BatchResult> {
        let duplicates = self.index.superseded_duplicates(range).await?;

        let mut result = BatchResult::default();
        for identifier in &duplicates {
            match self.index.delete_instance(identifier).await {
                Ok(()) => result.succeeded += 1,
                Err(err) => record_item_outcome(&mut result, identifier, err)?,
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl ActivityExecutor for StoreActivityExecutor {
    async fn execute(&self, range: WatermarkRange, input: &OperationInput) -> Result<BatchResult> {
        debug!(kind = %input.kind(), range = %range, "executing batch");

        let result = match input {
            OperationInput::Reindex { tag_keys } => self.reindex(range, tag_keys).await?,
            OperationInput::Export {
                source,
                destination,
                error_href,
            } => self.export(range, source, destination, error_href).await?,
            OperationInput::ContentLengthBackfill { .. } => {
                self.backfill_content_length(range).await?
            }
            OperationInput::DeleteExtendedTag { tag_key, .. } => {
                self.delete_tag(range, *tag_key).await?
            }
            OperationInput::DuplicateCleanup {} => self.cleanup_duplicates(range).await?,
        };

        if !result.is_clean() {
            warn!(
                kind = %input.kind(),
                range = %range,
                failures = result.failures.len(),
                "batch completed with item failures"
            );
        }
        Ok(result)
    }
}

/// Classifies one item's error: transient aborts the batch for retry,
/// conflict counts as success, anything else is recorded.
fn record_item_outcome(
    result: &mut BatchResult,
    identifier: &InstanceIdentifier,
    err: Error,
) -> Result<()> {
    if err.is_transient() {
        return Err(err);
    }
    if err.is_conflict() {
        result.succeeded += 1;
        return Ok(());
    }
    push_failure(result, identifier, &err);
    Ok(())
}

fn push_failure(result: &mut BatchResult, identifier: &InstanceIdentifier, err: &Error) {
    result.failures.push(BatchFailure {
        watermark: identifier.watermark,
        sop_uid: Some(identifier.sop_uid.clone()),
        message: err.to_string(),
    });
}

/// Returns true if the identifier matches the export source selector.
///
/// `*` selects everything; any other selector names a study instance UID.
fn matches_source(identifier: &InstanceIdentifier, source: &str) -> bool {
    source == "*" || identifier.study_uid == source
}
