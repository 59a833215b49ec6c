//! Errors shared by the message and friend stores.

use crate::storage::StorageError;

/// Store operation failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Malformed input, rejected before touching storage.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found")]
    NotFound,
    /// Backend failed; the store is unchanged since its last successful operation.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl StoreError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidArgument(msg.into())
    }
}
