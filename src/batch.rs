//! Batch executor
//!
//! Splits any number of operations into provider-sized atomic batches and
//! runs them in order. Each chunk commits or fails as a whole; chunks that
//! committed before a failing one stay committed.
//!
//! ```text
//! ops: [p1 x 230] [p2 x 3]
//!        │
//!        ▼
//! chunks: [p1 x 100] [p1 x 100] [p1 x 30] [p2 x 3]   (sequential)
//! ```
//!
//! A chunk also ends where the partition key changes, since one backend
//! batch may only touch one partition.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{JournalError, JournalResult};
use crate::storage::{with_deadline, OperationResult, TableOperation, TableStore, MAX_BATCH_SIZE};

/// Runs operation lists of any length against one table
#[derive(Clone)]
pub struct BatchExecutor {
    store: Arc<dyn TableStore>,
    table: String,
    max_batch_size: usize,
    request_timeout: Duration,
    verbose: bool,
}

impl BatchExecutor {
    pub fn new(store: Arc<dyn TableStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            max_batch_size: MAX_BATCH_SIZE,
            request_timeout: Duration::from_secs(3),
            verbose: false,
        }
    }

    /// Chunk size, clamped to `1..=MAX_BATCH_SIZE`
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Deadline applied to each chunk
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_verbose_logging(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Execute `operations` in input order
    ///
    /// Results come back in input order. An empty list makes no backend
    /// call. On failure the error of the failing chunk is returned and the
    /// chunks before it remain applied.
    pub async fn execute(
        &self,
        operations: Vec<TableOperation>,
    ) -> JournalResult<Vec<OperationResult>> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }

        let total = operations.len();
        let chunks = self.chunk(operations);
        let chunk_count = chunks.len();
        let mut results = Vec::with_capacity(total);

        for (index, chunk) in chunks.into_iter().enumerate() {
            let size = chunk.len();
            if self.verbose {
                debug!(
                    table = %self.table,
                    partition = chunk[0].partition_key(),
                    chunk = index + 1,
                    of = chunk_count,
                    size,
                    "Executing batch"
                );
            }

            let outcome = with_deadline(
                "execute_batch",
                self.request_timeout,
                self.store.execute_batch(&self.table, chunk),
            )
            .await;

            match outcome {
                Ok(chunk_results) => results.extend(chunk_results),
                Err(e) => {
                    warn!(
                        table = %self.table,
                        committed = results.len(),
                        total,
                        error = %e,
                        "Batch chunk failed; earlier chunks stay committed"
                    );
                    return Err(e);
                }
            }
        }

        if results.len() != total {
            return Err(JournalError::storage(
                "execute_batch",
                format!("backend returned {} results for {} operations", results.len(), total),
            ));
        }
        Ok(results)
    }

    fn chunk(&self, operations: Vec<TableOperation>) -> Vec<Vec<TableOperation>> {
        let mut chunks: Vec<Vec<TableOperation>> = Vec::new();
        for op in operations {
            let start_new = match chunks.last() {
                Some(current) => {
                    current.len() >= self.max_batch_size
                        || current[0].partition_key() != op.partition_key()
                }
                None => true,
            };
            if start_new {
                chunks.push(Vec::with_capacity(self.max_batch_size));
            }
            if let Some(current) = chunks.last_mut() {
                current.push(op);
            }
        }
        chunks
    }
}
