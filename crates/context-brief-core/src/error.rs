//! Typed errors raised by the core crate.
//!
//! The app crate wraps these in `anyhow::Error`; callers that need to
//! react to a specific failure can `downcast_ref::<CoreError>()`.

use crate::identity::{DOC_ID_BOUND, SEGMENT_BOUND};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// `(doc_id, segment_index)` cannot be encoded without colliding.
    #[error(
        "point identity out of range: doc_id={doc_id} (bound {}), segment_index={segment_index} (bound {})",
        DOC_ID_BOUND,
        SEGMENT_BOUND
    )]
    IdentityOutOfRange { doc_id: u64, segment_index: u64 },

    /// A raw point id that no in-range pair could have produced.
    #[error("raw point id {0} is outside the encodable range")]
    RawIdOutOfRange(u64),

    /// The collection already exists with a different vector size.
    #[error("collection '{collection}' has dimension {existing}, refusing vectors of dimension {requested}")]
    DimensionMismatch {
        collection: String,
        existing: usize,
        requested: usize,
    },

    /// A vector in a write batch does not match the batch dimension.
    #[error("segment {segment_index} has a {actual}-dimensional vector, expected {expected}")]
    RaggedBatch {
        segment_index: u32,
        expected: usize,
        actual: usize,
    },

    /// Ingestion received no text to chunk.
    #[error("document {0} has no extractable text")]
    EmptyDocument(u64),

    #[error("unknown provenance tag: {0}")]
    UnknownProvenance(String),

    #[error("unknown index status: {0}")]
    UnknownIndexStatus(String),

    #[error("unknown context kind: {0}")]
    UnknownContextKind(String),
}
