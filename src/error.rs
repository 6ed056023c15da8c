//! Error taxonomy for the selection and rating engine.
//!
//! Library functions return [`Result<T>`](Result) with a [`CoreError`]; the
//! binary wraps these in `anyhow` with extra context.

use crate::models::EntityKind;

/// Result alias used by every core operation.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Errors surfaced by the core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Point lookup by id failed.
    #[error("{kind} with id {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    /// Selection found nothing matching the filter (or the catalog is empty).
    #[error("no song matches the current selection")]
    NoCandidate,

    /// Unknown genre, facet or out-of-range argument, rejected before querying.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The song's audio file is gone. Revalidate the catalog, then select again.
    #[error("song {song_id} has no audio file at {path}")]
    Inconsistent { song_id: i64, path: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("cache value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn not_found(kind: EntityKind, id: i64) -> Self {
        Self::NotFound { kind, id }
    }
}
