//! Watermark interval types.
//!
//! The index store assigns every row a monotonically increasing sequence
//! number (the *watermark*). Maintenance operations partition the watermark
//! space into closed intervals and process one interval per activity
//! invocation. [`WatermarkRange`] is the only interval type in the system;
//! planners produce them, executors consume them, and checkpoints merge them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A closed interval `[start, end]` over the index watermark sequence.
///
/// Invariant: `1 <= start <= end`. Watermark 0 is never assigned by the
/// store, so ranges always sit in positive space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkRange {
    /// Lowest watermark in the range (inclusive).
    pub start: i64,
    /// Highest watermark in the range (inclusive).
    pub end: i64,
}

impl WatermarkRange {
    /// Creates a new range, validating the interval invariant.
    ///
    /// # Errors
    ///
    /// Returns an error if `start < 1` or `start > end`.
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start < 1 {
            return Err(Error::invalid_range(format!(
                "start {start} must be at least 1"
            )));
        }
        if start > end {
            return Err(Error::invalid_range(format!(
                "start {start} exceeds end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of watermarks covered by this range.
    #[must_use]
    pub const fn len(&self) -> i64 {
        self.end - self.start + 1
    }

    /// Closed intervals are never empty; provided for API symmetry.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Returns true if `watermark` falls within this range.
    #[must_use]
    pub const fn contains(&self, watermark: i64) -> bool {
        watermark >= self.start && watermark <= self.end
    }

    /// Returns true if the two ranges share any watermark.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns true if `other` ends immediately below this range.
    ///
    /// Wave planning always hands back ranges that sit directly under the
    /// previously completed span, so this is the only adjacency the merge
    /// step needs to recognize.
    #[must_use]
    pub const fn abuts_below(&self, other: &Self) -> bool {
        other.end + 1 == self.start
    }

    /// Merges an adjacent-or-overlapping lower range into this one.
    ///
    /// # Errors
    ///
    /// Returns an error if `other` neither overlaps nor abuts this range;
    /// merging disjoint ranges would fabricate coverage of watermarks no
    /// batch processed.
    pub fn merge_lower(&self, other: &Self) -> Result<Self> {
        if !self.overlaps(other) && !self.abuts_below(other) {
            return Err(Error::invalid_range(format!(
                "cannot merge disjoint ranges {self} and {other}"
            )));
        }
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl fmt::Display for WatermarkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_validates_invariants() {
        assert!(WatermarkRange::new(1, 1).is_ok());
        assert!(WatermarkRange::new(5, 10).is_ok());
        assert!(WatermarkRange::new(0, 10).is_err());
        assert!(WatermarkRange::new(-3, 4).is_err());
        assert!(WatermarkRange::new(10, 5).is_err());
    }

    #[test]
    fn len_counts_inclusive_bounds() {
        let range = WatermarkRange::new(6, 15).unwrap();
        assert_eq!(range.len(), 10);
        assert_eq!(WatermarkRange::new(7, 7).unwrap().len(), 1);
    }

    #[test]
    fn contains_checks_closed_interval() {
        let range = WatermarkRange::new(16, 25).unwrap();
        assert!(range.contains(16));
        assert!(range.contains(25));
        assert!(!range.contains(15));
        assert!(!range.contains(26));
    }

    #[test]
    fn overlap_detection() {
        let a = WatermarkRange::new(10, 20).unwrap();
        let b = WatermarkRange::new(20, 30).unwrap();
        let c = WatermarkRange::new(21, 30).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn merge_lower_joins_adjacent_ranges() {
        let upper = WatermarkRange::new(16, 25).unwrap();
        let lower = WatermarkRange::new(6, 15).unwrap();
        assert!(upper.abuts_below(&lower));

        let merged = upper.merge_lower(&lower).unwrap();
        assert_eq!(merged, WatermarkRange::new(6, 25).unwrap());
    }

    #[test]
    fn merge_lower_rejects_disjoint_ranges() {
        let upper = WatermarkRange::new(16, 25).unwrap();
        let gap = WatermarkRange::new(1, 10).unwrap();
        assert!(upper.merge_lower(&gap).is_err());
    }

    #[test]
    fn display_format() {
        let range = WatermarkRange::new(6, 15).unwrap();
        assert_eq!(range.to_string(), "[6, 15]");
    }
}
