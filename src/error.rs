//! Error types shared by the journal, snapshot store and query cursors

use thiserror::Error;

/// Result type for journal, snapshot and query operations
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur while talking to the backing store
#[derive(Debug, Error)]
pub enum JournalError {
    /// Malformed input, rejected before any I/O
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Backend failure during a call
    #[error("Storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    /// A batch exceeded the provider limit
    #[error("Batch of {size} operations exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// A batch mixed operations for different partitions
    #[error("Batch mixes partitions '{first}' and '{other}'")]
    MixedPartitions { first: String, other: String },

    /// A stored row could not be decoded
    #[error("Corrupted row {partition_key}/{row_key}: {message}")]
    CorruptedRow {
        partition_key: String,
        row_key: String,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A request exceeded its deadline
    #[error("Timed out after {millis} ms during {operation}")]
    Timeout { operation: String, millis: u64 },

    /// The operation was cancelled before it completed
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl JournalError {
    /// Build a storage error for the given operation
    pub fn storage(operation: impl Into<String>, message: impl ToString) -> Self {
        JournalError::Storage {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        JournalError::InvalidArgument(message.into())
    }

    /// Whether the host may retry the failed operation
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JournalError::Storage { .. } | JournalError::Timeout { .. } | JournalError::Io(_)
        )
    }

    /// Wrap the error with the entity and range it happened on
    pub fn with_context(self, persistence_id: &str, from: i64, to: i64) -> Self {
        match self {
            JournalError::Storage { operation, message } => JournalError::Storage {
                operation: format!("{} [{} {}..={}]", operation, persistence_id, from, to),
                message,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(JournalError::storage("query", "connection reset").is_transient());
        assert!(JournalError::Timeout {
            operation: "batch".to_string(),
            millis: 10
        }
        .is_transient());
        assert!(!JournalError::invalid("negative").is_transient());
        assert!(!JournalError::Cancelled("dropped".to_string()).is_transient());
    }

    #[test]
    fn test_context_names_entity_and_range() {
        let err = JournalError::storage("replay", "boom").with_context("p-1", 3, 9);
        let text = err.to_string();
        assert!(text.contains("p-1"));
        assert!(text.contains("3..=9"));
        assert!(text.contains("boom"));
    }
}
