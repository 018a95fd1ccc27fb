//! Error taxonomy for the ingestion ledger.
//!
//! Every failure the core can surface is a distinct variant so callers can
//! tell a retryable condition (`LockHeld`) from a fatal one
//! (`ConstraintViolation`) without string matching.

use thiserror::Error;

/// Errors produced by the ledger core.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Source document could not be parsed into policy regions.
    /// The whole document aborts; re-ingestion restarts at chunk 0 once the
    /// source is fixed.
    #[error("failed to parse policy document {path}: {reason}")]
    Parse { path: String, reason: String },

    /// Malformed identity or address range (e.g. end address before start).
    /// Fatal for the chunk; already-committed chunks are unaffected.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Another worker holds the ingestion lock for this project. Callers are
    /// expected to retry with backoff rather than queue.
    #[error("ingestion lock for project '{project}' is held by another worker")]
    LockHeld { project: String },

    /// The external vector index rejected an upsert even after bounded
    /// retries. The document is marked FAILED at this chunk and resumes from
    /// it on the next run.
    #[error("vector bind failed at chunk {chunk_index} after {attempts} attempts: {reason}")]
    VectorBindFailure {
        chunk_index: i64,
        attempts: u32,
        reason: String,
    },

    /// Cut-over could not establish the exactly-one-active postcondition.
    /// The activation transaction was rolled back; retry from lock
    /// acquisition.
    #[error("activation conflict for identity {identity_hash}: {reason}")]
    ActivationConflict {
        identity_hash: String,
        reason: String,
    },

    /// `bind_vector` was called with a different id on an already-bound row.
    /// This is a caller logic error, not a retry.
    #[error("chunk row {chunk_id} is already bound to vector {existing}")]
    AlreadyBound { chunk_id: String, existing: String },

    /// Inserting this hierarchy edge would create a cycle.
    #[error("hierarchy edge {parent} -> {child} would create a cycle")]
    CycleDetected { parent: String, child: String },

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// True for conditions the caller should retry later rather than treat
    /// as a defect (currently only lock contention).
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockHeld { .. })
    }
}
