//! Stable point identities for document segments.
//!
//! A point id packs `(doc_id, segment_index)` into one integer:
//!
//! ```text
//! id = doc_id × 1_000_000 + segment_index
//! ```
//!
//! The packing is a bijection only while both components stay below
//! their bounds. Anything outside is rejected with
//! [`CoreError::IdentityOutOfRange`] instead of silently colliding with
//! another document's segment.
//!
//! ```rust
//! use context_brief_core::identity::PointId;
//!
//! let id = PointId::encode(42, 7).unwrap();
//! assert_eq!(id.as_u64(), 42_000_007);
//! assert_eq!(id.decode(), (42, 7));
//! assert!(PointId::encode(42, 1_000_000).is_err());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Exclusive upper bound on `doc_id`.
pub const DOC_ID_BOUND: u64 = 1_000_000;

/// Exclusive upper bound on `segment_index`; also the packing stride.
pub const SEGMENT_BOUND: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PointId(u64);

impl PointId {
    pub fn encode(doc_id: u64, segment_index: u32) -> Result<Self, CoreError> {
        let segment = u64::from(segment_index);
        if doc_id >= DOC_ID_BOUND || segment >= SEGMENT_BOUND {
            return Err(CoreError::IdentityOutOfRange {
                doc_id,
                segment_index: segment,
            });
        }
        Ok(PointId(doc_id * SEGMENT_BOUND + segment))
    }

    /// Accept a raw id read back from a store.
    pub fn from_raw(raw: u64) -> Result<Self, CoreError> {
        if raw >= DOC_ID_BOUND * SEGMENT_BOUND {
            return Err(CoreError::RawIdOutOfRange(raw));
        }
        Ok(PointId(raw))
    }

    pub fn decode(self) -> (u64, u32) {
        (self.0 / SEGMENT_BOUND, (self.0 % SEGMENT_BOUND) as u32)
    }

    pub fn doc_id(self) -> u64 {
        self.0 / SEGMENT_BOUND
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for PointId {
    type Error = CoreError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        PointId::from_raw(raw)
    }
}

impl From<PointId> for u64 {
    fn from(id: PointId) -> Self {
        id.0
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check that a document id can own points at all.
pub fn check_doc_id(doc_id: u64) -> Result<(), CoreError> {
    if doc_id >= DOC_ID_BOUND {
        return Err(CoreError::IdentityOutOfRange {
            doc_id,
            segment_index: 0,
        });
    }
    Ok(())
}
