//! Maintenance operation kinds and their inputs.
//!
//! Every long-running maintenance operation is described by an
//! [`OperationInput`]: a tagged union carried inside the checkpoint, owned
//! by exactly one orchestration at a time. The input also defines the
//! aggregator's merge semantics and the stable fingerprint that names the
//! orchestration family.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Creation-time bounds limiting which rows an operation touches.
///
/// Watermarks are assigned in creation order, so a time window maps to one
/// contiguous watermark span; the store performs that mapping once at
/// planning time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    /// Earliest creation time (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    /// Latest creation time (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// Returns true if `instant` falls inside the window.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| instant >= start)
            && self.end.is_none_or(|end| instant <= end)
    }
}

/// Batch sizing for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchingOptions {
    /// Maximum watermarks per batch.
    pub size: usize,
    /// Maximum batches dispatched per wave.
    pub max_parallel: usize,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            size: 100,
            max_parallel: 2,
        }
    }
}

impl BatchingOptions {
    /// Validates that both knobs are positive.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error when either value is zero.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::invalid_input("batch size must be greater than zero"));
        }
        if self.max_parallel == 0 {
            return Err(Error::invalid_input(
                "max parallel batches must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Failure policy for an operation kind.
///
/// Best-effort operations record item failures and keep advancing;
/// all-or-nothing operations refuse to advance the checkpoint past a batch
/// that had any failure, so the next segment retries that range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Item failures are recorded, the operation still completes.
    BestEffort,
    /// Any item failure blocks checkpoint advancement for its batch.
    AllOrNothing,
}

/// The kind of maintenance operation, derived from its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Re-index instances for newly added extended query tags.
    Reindex,
    /// Bulk export of instances to an external destination.
    Export,
    /// Backfill the content-length column for legacy rows.
    ContentLengthBackfill,
    /// Delete index rows backing a removed extended query tag.
    DeleteExtendedTag,
    /// Remove superseded duplicate instance rows.
    DuplicateCleanup,
}

impl OperationKind {
    /// The failure policy this kind runs under.
    ///
    /// Tag deletion is all-or-nothing: leaving orphaned index rows behind a
    /// removed tag corrupts queries, so a failed row keeps the range
    /// incomplete and retried. Everything else is best-effort.
    #[must_use]
    pub const fn failure_policy(&self) -> FailurePolicy {
        match self {
            Self::DeleteExtendedTag => FailurePolicy::AllOrNothing,
            Self::Reindex
            | Self::Export
            | Self::ContentLengthBackfill
            | Self::DuplicateCleanup => FailurePolicy::BestEffort,
        }
    }

    /// Stable name used in metrics labels and logical ids.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reindex => "reindex",
            Self::Export => "export",
            Self::ContentLengthBackfill => "content_length_backfill",
            Self::DeleteExtendedTag => "delete_extended_tag",
            Self::DuplicateCleanup => "duplicate_cleanup",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input payload for one maintenance operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationInput {
    /// Re-index instances for the given extended query tag keys.
    Reindex {
        /// Surrogate keys of the tags to re-index.
        tag_keys: Vec<i32>,
    },
    /// Export instances from a source filter to a destination.
    Export {
        /// Source selector (study/series/instance identifiers).
        source: String,
        /// Destination container the copies land in.
        destination: String,
        /// Location the per-item error log is appended to.
        error_href: String,
    },
    /// Backfill the content-length column.
    ContentLengthBackfill {
        /// Optional creation-time bounds on the affected rows.
        #[serde(skip_serializing_if = "Option::is_none")]
        window: Option<TimeWindow>,
    },
    /// Delete the index rows backing one removed extended query tag.
    DeleteExtendedTag {
        /// Surrogate key of the removed tag.
        tag_key: i32,
        /// Dotted tag path, e.g. `00101010`.
        tag_path: String,
        /// Value representation of the tag.
        vr: String,
    },
    /// Remove superseded duplicate instance rows.
    DuplicateCleanup {},
}

impl OperationInput {
    /// The operation kind this input describes.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Reindex { .. } => OperationKind::Reindex,
            Self::Export { .. } => OperationKind::Export,
            Self::ContentLengthBackfill { .. } => OperationKind::ContentLengthBackfill,
            Self::DeleteExtendedTag { .. } => OperationKind::DeleteExtendedTag,
            Self::DuplicateCleanup {} => OperationKind::DuplicateCleanup,
        }
    }

    /// The creation-time bounds this input carries, if any.
    #[must_use]
    pub fn time_window(&self) -> Option<TimeWindow> {
        match self {
            Self::ContentLengthBackfill { window } => *window,
            _ => None,
        }
    }

    /// Validates the input before any batch is dispatched.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error for empty tag sets, blank export
    /// targets, or blank tag paths. Fatal input errors fail the operation
    /// at planning, per the error taxonomy.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Reindex { tag_keys } => {
                if tag_keys.is_empty() {
                    return Err(Error::invalid_input("reindex requires at least one tag key"));
                }
            }
            Self::Export {
                source,
                destination,
                error_href,
            } => {
                if source.trim().is_empty() || destination.trim().is_empty() {
                    return Err(Error::invalid_input(
                        "export requires a source and a destination",
                    ));
                }
                if error_href.trim().is_empty() {
                    return Err(Error::invalid_input("export requires an error log href"));
                }
            }
            Self::DeleteExtendedTag { tag_path, vr, .. } => {
                if tag_path.trim().is_empty() {
                    return Err(Error::invalid_input("tag deletion requires a tag path"));
                }
                if vr.trim().is_empty() {
                    return Err(Error::invalid_input("tag deletion requires a VR"));
                }
            }
            Self::ContentLengthBackfill { window } => {
                if let Some(TimeWindow {
                    start: Some(start),
                    end: Some(end),
                }) = window
                {
                    if start > end {
                        return Err(Error::invalid_input(
                            "time window start must not exceed its end",
                        ));
                    }
                }
            }
            Self::DuplicateCleanup {} => {}
        }
        Ok(())
    }

    /// Merges another input of the same family into this one.
    ///
    /// This defines the aggregator's coalescing semantics: re-index inputs
    /// take the union of their tag-key sets; for the remaining kinds the
    /// later request simply replaces the pending one (their inputs are
    /// either empty or name the same target when they share a family).
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error when the kinds differ; the aggregator
    /// never mixes families.
    pub fn merge(&mut self, other: Self) -> Result<()> {
        if self.kind() != other.kind() {
            return Err(Error::invalid_input(format!(
                "cannot merge {} input into {} state",
                other.kind(),
                self.kind()
            )));
        }

        match (self, other) {
            (Self::Reindex { tag_keys }, Self::Reindex { tag_keys: incoming }) => {
                let merged: BTreeSet<i32> =
                    tag_keys.iter().copied().chain(incoming).collect();
                *tag_keys = merged.into_iter().collect();
            }
            (slot, incoming) => *slot = incoming,
        }
        Ok(())
    }

    /// Computes the stable logical id of this input's orchestration family.
    ///
    /// The id is derived from the kind and the operation target (tag keys,
    /// export destination, tag path) so that resubmitting the same request
    /// addresses the same checkpoint record across continuations.
    #[must_use]
    pub fn logical_id(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_str().as_bytes());
        hasher.update(b"|");
        match self {
            Self::Reindex { tag_keys } => {
                let mut sorted: Vec<i32> = tag_keys.clone();
                sorted.sort_unstable();
                for key in sorted {
                    hasher.update(key.to_be_bytes());
                }
            }
            Self::Export { destination, .. } => hasher.update(destination.as_bytes()),
            Self::DeleteExtendedTag { tag_path, .. } => hasher.update(tag_path.as_bytes()),
            Self::ContentLengthBackfill { window } => {
                if let Some(window) = window {
                    for bound in [window.start, window.end] {
                        if let Some(instant) = bound {
                            hasher.update(instant.timestamp_millis().to_be_bytes());
                        }
                        hasher.update(b";");
                    }
                }
            }
            Self::DuplicateCleanup {} => {}
        }
        let digest = hasher.finalize();
        let bytes: [u8; 16] = digest
            .get(..16)
            .and_then(|s| s.try_into().ok())
            .unwrap_or([0u8; 16]);
        format!("{}:{}", self.kind(), hex::encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_inputs() {
        let input = OperationInput::Reindex { tag_keys: vec![7] };
        assert_eq!(input.kind(), OperationKind::Reindex);
        assert_eq!(input.kind().to_string(), "reindex");
    }

    #[test]
    fn failure_policy_is_explicit_per_kind() {
        assert_eq!(
            OperationKind::DeleteExtendedTag.failure_policy(),
            FailurePolicy::AllOrNothing
        );
        assert_eq!(
            OperationKind::Reindex.failure_policy(),
            FailurePolicy::BestEffort
        );
        assert_eq!(
            OperationKind::Export.failure_policy(),
            FailurePolicy::BestEffort
        );
    }

    #[test]
    fn validate_rejects_empty_reindex() {
        let input = OperationInput::Reindex {
            tag_keys: Vec::new(),
        };
        assert!(matches!(
            input.validate(),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn validate_rejects_blank_export_destination() {
        let input = OperationInput::Export {
            source: "study/1.2.3".into(),
            destination: "  ".into(),
            error_href: "errors/export.log".into(),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_time_window() {
        let now = Utc::now();
        let input = OperationInput::ContentLengthBackfill {
            window: Some(TimeWindow {
                start: Some(now),
                end: Some(now - chrono::Duration::hours(1)),
            }),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn time_window_bounds_are_inclusive() {
        let now = Utc::now();
        let window = TimeWindow {
            start: Some(now - chrono::Duration::hours(1)),
            end: Some(now),
        };
        assert!(window.contains(now));
        assert!(window.contains(now - chrono::Duration::hours(1)));
        assert!(!window.contains(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn logical_id_distinguishes_time_windows() {
        let unbounded = OperationInput::ContentLengthBackfill { window: None };
        let bounded = OperationInput::ContentLengthBackfill {
            window: Some(TimeWindow {
                start: Some(Utc::now()),
                end: None,
            }),
        };
        assert_ne!(unbounded.logical_id(), bounded.logical_id());
    }

    #[test]
    fn merge_unions_reindex_tag_keys() {
        let mut state = OperationInput::Reindex {
            tag_keys: vec![3, 1],
        };
        state
            .merge(OperationInput::Reindex {
                tag_keys: vec![2, 3],
            })
            .unwrap();

        assert_eq!(
            state,
            OperationInput::Reindex {
                tag_keys: vec![1, 2, 3],
            }
        );
    }

    #[test]
    fn merge_rejects_cross_family_inputs() {
        let mut state = OperationInput::Reindex { tag_keys: vec![1] };
        let result = state.merge(OperationInput::DuplicateCleanup {});
        assert!(result.is_err());
    }

    #[test]
    fn logical_id_is_stable_under_tag_order() {
        let a = OperationInput::Reindex {
            tag_keys: vec![1, 2, 3],
        };
        let b = OperationInput::Reindex {
            tag_keys: vec![3, 2, 1],
        };
        assert_eq!(a.logical_id(), b.logical_id());
        assert!(a.logical_id().starts_with("reindex:"));
    }

    #[test]
    fn logical_id_differs_by_target() {
        let a = OperationInput::Reindex { tag_keys: vec![1] };
        let b = OperationInput::Reindex { tag_keys: vec![2] };
        assert_ne!(a.logical_id(), b.logical_id());
    }

    #[test]
    fn input_serde_roundtrip() {
        let input = OperationInput::DeleteExtendedTag {
            tag_key: 12,
            tag_path: "00101010".into(),
            vr: "AS".into(),
        };
        let json = serde_json::to_string(&input).unwrap();
        assert!(json.contains("\"kind\":\"delete_extended_tag\""));
        let back: OperationInput = serde_json::from_str(&json).unwrap();
        assert_eq!(input, back);
    }
}
