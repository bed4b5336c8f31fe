//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;

/// Errors emitted by `LearnService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LearnServiceError {
    /// The submitted review quality falls outside the accepted [0, 5] range.
    #[error("review quality {0} is outside the accepted range 0-5")]
    InvalidQuality(f64),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
