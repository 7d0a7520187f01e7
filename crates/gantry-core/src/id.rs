//! Strongly-typed identifiers for Gantry entities.
//!
//! All identifiers are:
//! - **Strongly typed**: prevents mixing up different ID kinds at compile time
//! - **Lexicographically sortable**: ULIDs encode creation time and sort naturally
//! - **Globally unique**: no coordination required for generation
//!
//! # Example
//!
//! ```rust
//! use gantry_core::id::OperationId;
//!
//! let id = OperationId::generate();
//! let parsed: OperationId = id.to_string().parse().unwrap();
//! assert_eq!(id, parsed);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// A unique identifier for a maintenance operation.
///
/// One `OperationId` covers the whole orchestration family: every
/// continuation segment of a long-running operation shares the id that the
/// original request was assigned, so pollers keep a single handle across
/// restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Ulid);

impl OperationId {
    /// Generates a new unique operation ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates an operation ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        chrono::DateTime::from_timestamp_millis(i64::try_from(ms).unwrap_or(0))
            .unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid operation ID '{s}': {e}"),
            })
    }
}

/// Identity of a single instance row in the study index.
///
/// The triple of study/series/SOP instance UIDs names the instance within
/// its data partition; the watermark pins the exact row version the index
/// assigned at creation time. Row-level store operations are keyed by the
/// full identifier so that re-executing a batch is an overwrite, never an
/// append.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentifier {
    /// Study instance UID.
    pub study_uid: String,
    /// Series instance UID.
    pub series_uid: String,
    /// SOP instance UID.
    pub sop_uid: String,
    /// Watermark assigned to the row at creation.
    pub watermark: i64,
    /// Data partition the instance belongs to.
    pub partition: String,
}

impl fmt::Display for InstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.study_uid, self.series_uid, self.sop_uid, self.watermark
        )
    }
}
