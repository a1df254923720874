//! Storage backend contract
//!
//! The journal only needs a partitioned, ordered key/value table with small
//! atomic batches and paged range scans, plus a blob container for
//! snapshots. Both are traits so the cloud client can be swapped for the
//! in-memory or filesystem backends shipped here.
//!
//! ```text
//! TableStore                         BlobStore
//! ┌──────────────┐                   ┌──────────────┐
//! │ partition    │── row ─► props    │ container    │── name ─► bytes + metadata
//! │  (escaped id)│   (sorted keys)   │              │   (sorted names)
//! └──────────────┘                   └──────────────┘
//! ```

mod blob;
mod memory;

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Bound;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{JournalError, JournalResult};

pub use blob::{Blob, BlobItem, BlobPage, BlobStore, FsBlobStore, MemoryBlobStore};
pub use memory::MemoryTableStore;

/// Provider-enforced maximum number of operations in one atomic batch
pub const MAX_BATCH_SIZE: usize = 100;

/// A typed column value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    String(String),
    Int64(i64),
    Binary(Vec<u8>),
    Bool(bool),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Column name to value map of one row
pub type Properties = BTreeMap<String, PropertyValue>;

/// One stored row
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub partition_key: String,
    pub row_key: String,
    pub properties: Properties,
}

impl TableRow {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: Properties::new(),
        }
    }
}

/// A write or delete inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum TableOperation {
    Upsert(TableRow),
    Delete {
        partition_key: String,
        row_key: String,
    },
}

impl TableOperation {
    pub fn delete(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        TableOperation::Delete {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }

    pub fn partition_key(&self) -> &str {
        match self {
            TableOperation::Upsert(row) => &row.partition_key,
            TableOperation::Delete { partition_key, .. } => partition_key,
        }
    }

    pub fn row_key(&self) -> &str {
        match self {
            TableOperation::Upsert(row) => &row.row_key,
            TableOperation::Delete { row_key, .. } => row_key,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            TableOperation::Upsert(_) => OperationKind::Upsert,
            TableOperation::Delete { .. } => OperationKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Upsert,
    Delete,
}

/// Outcome of one operation in a committed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub partition_key: String,
    pub row_key: String,
    pub kind: OperationKind,
}

impl From<&TableOperation> for OperationResult {
    fn from(op: &TableOperation) -> Self {
        Self {
            partition_key: op.partition_key().to_string(),
            row_key: op.row_key().to_string(),
            kind: op.kind(),
        }
    }
}

/// Opaque cursor for resuming a paged scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(pub String);

/// Row-key bounds of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRange {
    pub start: Bound<String>,
    pub end: Bound<String>,
}

impl RowRange {
    /// Every row of the partition
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// `[start, end]`
    pub fn inclusive(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Bound::Included(start.into()),
            end: Bound::Included(end.into()),
        }
    }

    pub fn contains(&self, row_key: &str) -> bool {
        let after_start = match &self.start {
            Bound::Included(s) => row_key >= s.as_str(),
            Bound::Excluded(s) => row_key > s.as_str(),
            Bound::Unbounded => true,
        };
        let before_end = match &self.end {
            Bound::Included(e) => row_key <= e.as_str(),
            Bound::Excluded(e) => row_key < e.as_str(),
            Bound::Unbounded => true,
        };
        after_start && before_end
    }
}

/// A range scan over one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    pub partition_key: String,
    pub range: RowRange,
    /// Columns to return; `None` returns every column
    pub projection: Option<Vec<String>>,
    /// Upper limit on rows in one page
    pub take: Option<usize>,
}

impl TableQuery {
    pub fn new(partition_key: impl Into<String>, range: RowRange) -> Self {
        Self {
            partition_key: partition_key.into(),
            range,
            projection: None,
            take: None,
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.projection = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }
}

/// One page of scan results in ascending row-key order
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub rows: Vec<TableRow>,
    pub continuation: Option<ContinuationToken>,
}

/// Partitioned, row-ordered table store
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create the table; returns `true` if it did not exist yet
    async fn create_table_if_not_exists(&self, table: &str) -> JournalResult<bool>;

    /// Apply up to [`MAX_BATCH_SIZE`] operations on one partition atomically
    async fn execute_batch(
        &self,
        table: &str,
        operations: Vec<TableOperation>,
    ) -> JournalResult<Vec<OperationResult>>;

    /// Fetch one page of a range scan
    async fn query(
        &self,
        table: &str,
        query: &TableQuery,
        continuation: Option<ContinuationToken>,
    ) -> JournalResult<QueryPage>;
}

/// Check the batch contract shared by every backend
pub(crate) fn validate_batch(operations: &[TableOperation], max: usize) -> JournalResult<()> {
    if operations.len() > max {
        return Err(JournalError::BatchTooLarge {
            size: operations.len(),
            max,
        });
    }
    if let Some(first) = operations.first() {
        if let Some(other) = operations
            .iter()
            .find(|op| op.partition_key() != first.partition_key())
        {
            return Err(JournalError::MixedPartitions {
                first: first.partition_key().to_string(),
                other: other.partition_key().to_string(),
            });
        }
    }
    Ok(())
}

/// Run a backend call under a deadline
pub(crate) async fn with_deadline<T, F>(
    operation: &str,
    timeout: Duration,
    call: F,
) -> JournalResult<T>
where
    F: Future<Output = JournalResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(JournalError::Timeout {
            operation: operation.to_string(),
            millis: timeout.as_millis() as u64,
        }),
    }
}
