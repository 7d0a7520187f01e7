//! Pluggable access to the external index and blob collaborators.
//!
//! The engine never talks to the relational index or blob storage directly;
//! everything goes through [`IndexStore`] and [`BlobStore`]. Production
//! wires these to the SQL index and the blob container, tests use the
//! in-memory implementations in [`memory`].
//!
//! ## Design Principles
//!
//! - **Row-keyed writes**: every mutation is an upsert/delete keyed by the
//!   instance identifier and watermark, so re-executing a batch overwrites
//!   rather than appends
//! - **Conflict-as-success**: concurrently created records surface as
//!   [`Error::Conflict`](crate::error::Error::Conflict) and are resolved by
//!   re-reading, never treated as failures
//! - **Testability**: in-memory implementations with failure injection

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gantry_core::{InstanceIdentifier, WatermarkRange};

use crate::error::{Error, Result};
use crate::operation::TimeWindow;

/// Lifecycle status of an instance row in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// Row inserted, blob upload still in flight.
    Creating,
    /// Fully indexed and queryable.
    Created,
    /// Soft-deleted, awaiting purge.
    Deleted,
}

/// A named data partition in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionEntry {
    /// Surrogate key assigned by the store.
    pub key: i32,
    /// Partition name.
    pub name: String,
}

/// Access to the relational study index.
///
/// All methods are row-level or read-only; batch partitioning is computed by
/// the planner from [`max_watermark`](IndexStore::max_watermark) so that
/// planning decisions stay pure and replayable.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Returns the highest watermark currently assigned, or `None` when the
    /// index is empty.
    async fn max_watermark(&self) -> Result<Option<i64>>;

    /// Maps a creation-time window onto the contiguous watermark span of
    /// rows created inside it, or `None` when no rows match.
    ///
    /// Valid because watermarks are assigned in creation order.
    async fn watermark_window(&self, window: TimeWindow) -> Result<Option<WatermarkRange>>;

    /// Lists instance identifiers inside a watermark range with the given
    /// status, ordered by descending watermark.
    async fn instance_identifiers(
        &self,
        range: WatermarkRange,
        status: IndexStatus,
    ) -> Result<Vec<InstanceIdentifier>>;

    /// Upserts extended-tag index rows for one instance.
    ///
    /// Keyed by `(identifier, watermark, tag_key)`: re-running the upsert
    /// overwrites the existing rows.
    async fn upsert_tag_rows(
        &self,
        identifier: &InstanceIdentifier,
        tag_keys: &[i32],
    ) -> Result<()>;

    /// Deletes the index rows for one tag key on one instance.
    async fn delete_tag_rows(&self, identifier: &InstanceIdentifier, tag_key: i32) -> Result<()>;

    /// Writes the content-length column for one instance row.
    async fn set_content_length(
        &self,
        identifier: &InstanceIdentifier,
        length: u64,
    ) -> Result<()>;

    /// Deletes one instance row (used by duplicate cleanup).
    async fn delete_instance(&self, identifier: &InstanceIdentifier) -> Result<()>;

    /// Lists rows inside a range that are superseded by a newer row with the
    /// same study/series/SOP triple.
    async fn superseded_duplicates(
        &self,
        range: WatermarkRange,
    ) -> Result<Vec<InstanceIdentifier>>;

    /// Looks up a partition by name.
    async fn partition(&self, name: &str) -> Result<Option<PartitionEntry>>;

    /// Inserts a new partition.
    ///
    /// Returns [`Error::Conflict`] if the partition was concurrently
    /// created; callers resolve the race with [`get_or_add_partition`].
    async fn add_partition(&self, name: &str) -> Result<PartitionEntry>;
}

/// Access to blob storage for export copies and error logs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns the stored length of an instance blob, or `None` when the
    /// blob is missing.
    async fn content_length(&self, identifier: &InstanceIdentifier) -> Result<Option<u64>>;

    /// Copies one instance blob into the destination container.
    ///
    /// Copies are keyed by the instance identifier inside the destination,
    /// so re-copying after a partial failure overwrites rather than
    /// duplicates.
    async fn copy_instance(
        &self,
        identifier: &InstanceIdentifier,
        destination: &str,
    ) -> Result<()>;

    /// Appends one line to an export error log.
    async fn append_error(&self, error_href: &str, line: &str) -> Result<()>;
}

/// Resolves a partition by name, creating it if absent.
///
/// Two concurrent callers may both observe "not found" and race the insert;
/// the losing writer sees a conflict and resolves it by re-reading, so both
/// callers end up with the same logical record.
///
/// # Errors
///
/// Returns a storage error when the partition can neither be created nor
/// re-read (the conflict resolution found nothing, which indicates a store
/// inconsistency).
pub async fn get_or_add_partition<S: IndexStore + ?Sized>(
    store: &S,
    name: &str,
) -> Result<PartitionEntry> {
    if let Some(existing) = store.partition(name).await? {
        return Ok(existing);
    }

    match store.add_partition(name).await {
        Ok(created) => Ok(created),
        Err(Error::Conflict { .. }) => store.partition(name).await?.ok_or_else(|| {
            Error::storage(format!(
                "partition '{name}' reported a conflict but cannot be read back"
            ))
        }),
        Err(other) => Err(other),
    }
}
