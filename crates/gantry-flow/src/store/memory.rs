//! In-memory store implementations for testing.
//!
//! [`InMemoryIndexStore`], [`InMemoryBlobStore`], and
//! [`InMemoryCheckpointStore`] back the engine in tests and development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, no cross-process
//!   coordination
//! - **Single-process only**: state is lost when the process exits
//!
//! Failure injection knobs (`fail_watermark`, `fail_transient_next`,
//! `arm_partition_race`) let tests drive the retry, best-effort, and
//! conflict-resolution paths deterministically.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gantry_core::{InstanceIdentifier, WatermarkRange};

use super::{BlobStore, IndexStatus, IndexStore, PartitionEntry};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{Error, Result};
use crate::operation::TimeWindow;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// One instance row held by the in-memory index.
#[derive(Debug, Clone)]
struct InstanceRow {
    identifier: InstanceIdentifier,
    status: IndexStatus,
    created_at: DateTime<Utc>,
    content_length: Option<u64>,
    tag_rows: BTreeSet<i32>,
}

/// In-memory study index for testing.
#[derive(Debug, Default)]
pub struct InMemoryIndexStore {
    rows: RwLock<BTreeMap<i64, InstanceRow>>,
    partitions: RwLock<HashMap<String, PartitionEntry>>,
    next_partition_key: AtomicI32,
    failing_watermarks: RwLock<HashSet<i64>>,
    transient_failures: AtomicUsize,
    partition_race_armed: AtomicBool,
}

impl InMemoryIndexStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with `count` created instances at
    /// watermarks `1..=count`.
    #[must_use]
    pub fn seeded(count: i64) -> Self {
        let store = Self::new();
        for watermark in 1..=count {
            store.insert_instance(watermark, "default", IndexStatus::Created);
        }
        store
    }

    /// Deterministic creation time assigned to a seeded row: one second
    /// per watermark from a fixed epoch, preserving creation order.
    #[must_use]
    pub fn synthetic_created_at(watermark: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_704_067_200 + watermark, 0).unwrap_or_else(Utc::now)
    }

    /// Inserts an instance row at the given watermark.
    pub fn insert_instance(&self, watermark: i64, partition: &str, status: IndexStatus) {
        let identifier = InstanceIdentifier {
            study_uid: format!("1.2.{}", watermark / 100),
            series_uid: format!("1.2.{}.{}", watermark / 100, watermark / 10),
            sop_uid: format!("1.2.{}.{}.{watermark}", watermark / 100, watermark / 10),
            watermark,
            partition: partition.to_string(),
        };
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        rows.insert(
            watermark,
            InstanceRow {
                identifier,
                status,
                created_at: Self::synthetic_created_at(watermark),
                content_length: None,
                tag_rows: BTreeSet::new(),
            },
        );
    }

    /// Inserts a newer row with the same study/series/SOP triple as the row
    /// at `of_watermark`, at watermark `at_watermark`.
    ///
    /// # Panics
    ///
    /// Panics if `of_watermark` has no row (test misconfiguration).
    pub fn insert_duplicate(&self, of_watermark: i64, at_watermark: i64) {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let mut identifier = rows
            .get(&of_watermark)
            .map(|row| row.identifier.clone())
            .expect("duplicate source row must exist");
        identifier.watermark = at_watermark;
        rows.insert(
            at_watermark,
            InstanceRow {
                identifier,
                status: IndexStatus::Created,
                created_at: Self::synthetic_created_at(at_watermark),
                content_length: None,
                tag_rows: BTreeSet::new(),
            },
        );
    }

    /// Makes every row operation on `watermark` fail with a storage error.
    pub fn fail_watermark(&self, watermark: i64) {
        self.failing_watermarks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(watermark);
    }

    /// Clears a previously injected row failure.
    pub fn heal_watermark(&self, watermark: i64) {
        self.failing_watermarks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&watermark);
    }

    /// Makes the next `count` row operations fail with a transient error.
    pub fn fail_transient_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Arms the partition insert race: the next `add_partition` call writes
    /// the record (as the winning concurrent writer would have) but reports
    /// a conflict to its caller.
    pub fn arm_partition_race(&self) {
        self.partition_race_armed.store(true, Ordering::SeqCst);
    }

    /// Number of tag index rows currently held for `tag_key`.
    #[must_use]
    pub fn tag_row_count(&self, tag_key: i32) -> usize {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.values()
            .filter(|row| row.tag_rows.contains(&tag_key))
            .count()
    }

    /// Content length recorded for the row at `watermark`, if any.
    #[must_use]
    pub fn content_length_of(&self, watermark: i64) -> Option<u64> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.get(&watermark).and_then(|row| row.content_length)
    }

    /// Number of instance rows currently held.
    #[must_use]
    pub fn row_count(&self) -> usize {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.len()
    }

    fn check_injected_failures(&self, watermark: i64) -> Result<()> {
        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0
            && self
                .transient_failures
                .compare_exchange(pending, pending - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(Error::transient("injected transient failure"));
        }

        let failing = self
            .failing_watermarks
            .read()
            .map_err(poison_err)?
            .contains(&watermark);
        if failing {
            return Err(Error::storage(format!(
                "injected row failure at watermark {watermark}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn max_watermark(&self) -> Result<Option<i64>> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows.keys().next_back().copied())
    }

    async fn watermark_window(&self, window: TimeWindow) -> Result<Option<WatermarkRange>> {
        let rows = self.rows.read().map_err(poison_err)?;
        let mut bounds: Option<(i64, i64)> = None;
        for (watermark, row) in rows.iter() {
            if window.contains(row.created_at) {
                bounds = Some(match bounds {
                    None => (*watermark, *watermark),
                    Some((min, max)) => (min.min(*watermark), max.max(*watermark)),
                });
            }
        }
        Ok(bounds.and_then(|(min, max)| WatermarkRange::new(min, max).ok()))
    }

    async fn instance_identifiers(
        &self,
        range: WatermarkRange,
        status: IndexStatus,
    ) -> Result<Vec<InstanceIdentifier>> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows
            .range(range.start..=range.end)
            .rev()
            .filter(|(_, row)| row.status == status)
            .map(|(_, row)| row.identifier.clone())
            .collect())
    }

    async fn upsert_tag_rows(
        &self,
        identifier: &InstanceIdentifier,
        tag_keys: &[i32],
    ) -> Result<()> {
        self.check_injected_failures(identifier.watermark)?;
        let mut rows = self.rows.write().map_err(poison_err)?;
        let row = rows
            .get_mut(&identifier.watermark)
            .ok_or_else(|| Error::storage(format!("no row at watermark {}", identifier.watermark)))?;
        row.tag_rows.extend(tag_keys.iter().copied());
        Ok(())
    }

    async fn delete_tag_rows(&self, identifier: &InstanceIdentifier, tag_key: i32) -> Result<()> {
        self.check_injected_failures(identifier.watermark)?;
        let mut rows = self.rows.write().map_err(poison_err)?;
        if let Some(row) = rows.get_mut(&identifier.watermark) {
            row.tag_rows.remove(&tag_key);
        }
        Ok(())
    }

    async fn set_content_length(
        &self,
        identifier: &InstanceIdentifier,
        length: u64,
    ) -> Result<()> {
        self.check_injected_failures(identifier.watermark)?;
        let mut rows = self.rows.write().map_err(poison_err)?;
        let row = rows
            .get_mut(&identifier.watermark)
            .ok_or_else(|| Error::storage(format!("no row at watermark {}", identifier.watermark)))?;
        row.content_length = Some(length);
        Ok(())
    }

    async fn delete_instance(&self, identifier: &InstanceIdentifier) -> Result<()> {
        self.check_injected_failures(identifier.watermark)?;
        let mut rows = self.rows.write().map_err(poison_err)?;
        rows.remove(&identifier.watermark);
        Ok(())
    }

    async fn superseded_duplicates(
        &self,
        range: WatermarkRange,
    ) -> Result<Vec<InstanceIdentifier>> {
        let rows = self.rows.read().map_err(poison_err)?;
        let mut duplicates = Vec::new();
        for (watermark, row) in rows.range(range.start..=range.end).rev() {
            let superseded = rows
                .range(watermark + 1..)
                .any(|(_, newer)| newer.identifier.sop_uid == row.identifier.sop_uid);
            if superseded {
                duplicates.push(row.identifier.clone());
            }
        }
        Ok(duplicates)
    }

    async fn partition(&self, name: &str) -> Result<Option<PartitionEntry>> {
        let partitions = self.partitions.read().map_err(poison_err)?;
        Ok(partitions.get(name).cloned())
    }

    async fn add_partition(&self, name: &str) -> Result<PartitionEntry> {
        let mut partitions = self.partitions.write().map_err(poison_err)?;
        if partitions.contains_key(name) {
            return Err(Error::conflict(format!(
                "partition '{name}' already exists"
            )));
        }

        let entry = PartitionEntry {
            key: self.next_partition_key.fetch_add(1, Ordering::SeqCst) + 1,
            name: name.to_string(),
        };
        partitions.insert(name.to_string(), entry.clone());

        // Armed race: the record landed (the concurrent winner wrote it),
        // but this caller is told it lost the insert.
        if self.partition_race_armed.swap(false, Ordering::SeqCst) {
            return Err(Error::conflict(format!(
                "partition '{name}' concurrently created"
            )));
        }
        Ok(entry)
    }
}

/// In-memory blob storage for testing.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    content_lengths: RwLock<HashMap<i64, u64>>,
    copies: RwLock<HashMap<String, BTreeSet<i64>>>,
    error_logs: RwLock<HashMap<String, Vec<String>>>,
    failing_watermarks: RwLock<HashSet<i64>>,
}

impl InMemoryBlobStore {
    /// Creates an empty blob store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a blob length for the instance at `watermark`.
    pub fn put_blob(&self, watermark: i64, length: u64) {
        self.content_lengths
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(watermark, length);
    }

    /// Makes copies of the instance at `watermark` fail.
    pub fn fail_watermark(&self, watermark: i64) {
        self.failing_watermarks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(watermark);
    }

    /// Number of distinct instances copied into `destination`.
    #[must_use]
    pub fn copy_count(&self, destination: &str) -> usize {
        let copies = self.copies.read().unwrap_or_else(PoisonError::into_inner);
        copies.get(destination).map_or(0, BTreeSet::len)
    }

    /// Lines appended to the error log at `error_href`.
    #[must_use]
    pub fn error_lines(&self, error_href: &str) -> Vec<String> {
        let logs = self
            .error_logs
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        logs.get(error_href).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn content_length(&self, identifier: &InstanceIdentifier) -> Result<Option<u64>> {
        let lengths = self.content_lengths.read().map_err(poison_err)?;
        Ok(lengths.get(&identifier.watermark).copied())
    }

    async fn copy_instance(
        &self,
        identifier: &InstanceIdentifier,
        destination: &str,
    ) -> Result<()> {
        let failing = self
            .failing_watermarks
            .read()
            .map_err(poison_err)?
            .contains(&identifier.watermark);
        if failing {
            return Err(Error::storage(format!(
                "injected copy failure at watermark {}",
                identifier.watermark
            )));
        }

        let mut copies = self.copies.write().map_err(poison_err)?;
        copies
            .entry(destination.to_string())
            .or_default()
            .insert(identifier.watermark);
        Ok(())
    }

    async fn append_error(&self, error_href: &str, line: &str) -> Result<()> {
        let mut logs = self.error_logs.write().map_err(poison_err)?;
        logs.entry(error_href.to_string())
            .or_default()
            .push(line.to_string());
        Ok(())
    }
}

/// In-memory checkpoint persistence for testing.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    records: RwLock<HashMap<String, Checkpoint>>,
    saves: AtomicUsize,
}

impl InMemoryCheckpointStore {
    /// Creates an empty checkpoint store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of save (overwrite) calls observed.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of checkpoint records currently held.
    #[must_use]
    pub fn record_count(&self) -> usize {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, logical_id: &str) -> Result<Option<Checkpoint>> {
        let records = self.records.read().map_err(poison_err)?;
        Ok(records.get(logical_id).cloned())
    }

    async fn save(&self, logical_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        // Round-trip through JSON so tests exercise the same serialization
        // boundary a durable store would.
        let bytes = serde_json::to_vec(checkpoint).map_err(|e| Error::Serialization {
            message: format!("serialize checkpoint: {e}"),
        })?;
        let stored: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|e| Error::Serialization {
                message: format!("deserialize checkpoint: {e}"),
            })?;

        let mut records = self.records.write().map_err(poison_err)?;
        records.insert(logical_id.to_string(), stored);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, logical_id: &str) -> Result<()> {
        let mut records = self.records.write().map_err(poison_err)?;
        records.remove(logical_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::get_or_add_partition;

    #[tokio::test]
    async fn seeded_store_reports_max_watermark() {
        let store = InMemoryIndexStore::seeded(25);
        assert_eq!(store.max_watermark().await.unwrap(), Some(25));
        assert_eq!(InMemoryIndexStore::new().max_watermark().await.unwrap(), None);
    }

    #[tokio::test]
    async fn identifiers_are_descending_and_status_filtered() {
        let store = InMemoryIndexStore::seeded(10);
        store.insert_instance(11, "default", IndexStatus::Creating);

        let range = WatermarkRange::new(5, 11).unwrap();
        let identifiers = store
            .instance_identifiers(range, IndexStatus::Created)
            .await
            .unwrap();

        let watermarks: Vec<i64> = identifiers.iter().map(|id| id.watermark).collect();
        assert_eq!(watermarks, vec![10, 9, 8, 7, 6, 5]);
    }

    #[tokio::test]
    async fn upsert_tag_rows_is_idempotent() {
        let store = InMemoryIndexStore::seeded(3);
        let identifiers = store
            .instance_identifiers(WatermarkRange::new(1, 3).unwrap(), IndexStatus::Created)
            .await
            .unwrap();

        for identifier in &identifiers {
            store.upsert_tag_rows(identifier, &[7]).await.unwrap();
        }
        assert_eq!(store.tag_row_count(7), 3);

        // Re-execution after a crash overwrites, never appends.
        for identifier in &identifiers {
            store.upsert_tag_rows(identifier, &[7]).await.unwrap();
        }
        assert_eq!(store.tag_row_count(7), 3);
    }

    #[tokio::test]
    async fn superseded_duplicates_finds_older_rows() {
        let store = InMemoryIndexStore::seeded(5);
        store.insert_duplicate(2, 6);

        let duplicates = store
            .superseded_duplicates(WatermarkRange::new(1, 5).unwrap())
            .await
            .unwrap();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].watermark, 2);
    }

    #[tokio::test]
    async fn transient_injection_expires() {
        let store = InMemoryIndexStore::seeded(2);
        store.fail_transient_next(1);

        let identifier = store
            .instance_identifiers(WatermarkRange::new(1, 1).unwrap(), IndexStatus::Created)
            .await
            .unwrap()
            .remove(0);

        let first = store.upsert_tag_rows(&identifier, &[1]).await;
        assert!(matches!(first, Err(Error::Transient { .. })));
        assert!(store.upsert_tag_rows(&identifier, &[1]).await.is_ok());
    }

    #[tokio::test]
    async fn partition_race_resolves_to_same_record() {
        let store = InMemoryIndexStore::new();

        // Losing writer: add reports a conflict but the record exists.
        store.arm_partition_race();
        let winner = get_or_add_partition(&store, "test").await.unwrap();
        let loser = get_or_add_partition(&store, "test").await.unwrap();
        assert_eq!(winner, loser);
    }

    #[tokio::test]
    async fn checkpoint_store_overwrites() {
        let store = InMemoryCheckpointStore::new();
        let mut checkpoint = Checkpoint::new(
            crate::operation::OperationInput::DuplicateCleanup {},
            chrono::Utc::now(),
        );

        store.save("family", &checkpoint).await.unwrap();
        checkpoint.original_max = Some(10);
        store.save("family", &checkpoint).await.unwrap();

        assert_eq!(store.record_count(), 1);
        assert_eq!(store.save_count(), 2);
        let loaded = store.load("family").await.unwrap().unwrap();
        assert_eq!(loaded.original_max, Some(10));
    }
}
