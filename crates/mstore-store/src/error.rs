use std::sync::PoisonError;

use mstore_keys::KeyError;

/// Errors from module store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A concrete key has no persisted item.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// An item already exists at the key being created.
    #[error("duplicate item: {0}")]
    DuplicateItem(String),

    /// A course with this id already exists.
    #[error("duplicate course: {0}")]
    DuplicateCourse(String),

    /// A wildcard or partial key was given where a concrete key is required.
    #[error("insufficient specification: {0}")]
    InsufficientSpecification(String),

    /// A write named a version that is no longer the branch head.
    #[error("version conflict on {course}: expected head {expected}, found {actual}")]
    VersionConflict {
        course: String,
        expected: String,
        actual: String,
    },

    /// The backend does not support the operation (read-only stores).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A key failed to parse or validate.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The operation is not valid for the item's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A lock was poisoned or an internal invariant broke.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Map a poisoned lock to [`StoreError::Internal`].
pub fn poisoned<T>(e: PoisonError<T>) -> StoreError {
    StoreError::Internal(format!("lock poisoned: {e}"))
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
