//! Error types for index operations.
//!
//! - [`HnswError`] - every failure an index operation can return
//! - [`Result<T>`] - alias for `std::result::Result<T, HnswError>`

use crate::hnsw::SpaceType;

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, HnswError>;

/// Errors returned by index operations.
///
/// None of these are retried internally: they describe the content of a call
/// (or of a persisted stream), not a transient condition.
#[derive(Debug, thiserror::Error)]
pub enum HnswError {
    /// The index already holds `max_elements` points.
    #[error("index is full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    /// A vector's length differs from the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A persisted index was loaded with a different metric than it was built with.
    #[error("space mismatch: index was built with {actual}, caller requested {expected}")]
    SpaceMismatch {
        expected: SpaceType,
        actual: SpaceType,
    },

    /// A persisted stream is malformed, truncated, or fails its checksum.
    #[error("corrupt persisted state: {0}")]
    CorruptPersistedState(String),

    /// Underlying storage read/write failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The index was released and can no longer be used.
    #[error("index has been released")]
    UseAfterRelease,

    /// Invalid configuration or call arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl HnswError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        HnswError::CorruptPersistedState(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = HnswError::DimensionMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(e.to_string(), "dimension mismatch: expected 4, got 3");

        let e = HnswError::CapacityExceeded { capacity: 10 };
        assert_eq!(e.to_string(), "index is full (capacity 10)");

        let e = HnswError::SpaceMismatch {
            expected: SpaceType::L2,
            actual: SpaceType::Cosine,
        };
        assert!(e.to_string().contains("cosine"), "got {e}");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: HnswError = io.into();
        assert!(matches!(e, HnswError::Io(_)));
    }
}
