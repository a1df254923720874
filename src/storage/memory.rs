//! In-memory table store
//!
//! Ordered maps behind a `parking_lot` lock. Batches are applied under a
//! single write lock, so a batch is either fully visible or not at all.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    validate_batch, ContinuationToken, OperationResult, Properties, QueryPage, TableOperation,
    TableQuery, TableRow, TableStore, MAX_BATCH_SIZE,
};
use crate::error::{JournalError, JournalResult};

type Partition = BTreeMap<String, Properties>;
type Table = BTreeMap<String, Partition>;

/// Default number of rows returned per page, matching the cloud service
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Table store kept entirely in memory
pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, Table>>,
    page_size: usize,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Smaller pages exercise continuation handling
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Number of rows in one partition
    pub fn partition_len(&self, table: &str, partition_key: &str) -> usize {
        self.tables
            .read()
            .get(table)
            .and_then(|t| t.get(partition_key))
            .map(|p| p.len())
            .unwrap_or(0)
    }

    /// Number of rows in the whole table
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .get(table)
            .map(|t| t.values().map(|p| p.len()).sum())
            .unwrap_or(0)
    }
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_table(operation: &str, table: &str) -> JournalError {
    JournalError::storage(operation, format!("table '{}' does not exist", table))
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn create_table_if_not_exists(&self, table: &str) -> JournalResult<bool> {
        let mut tables = self.tables.write();
        if tables.contains_key(table) {
            return Ok(false);
        }
        tables.insert(table.to_string(), Table::new());
        Ok(true)
    }

    async fn execute_batch(
        &self,
        table: &str,
        operations: Vec<TableOperation>,
    ) -> JournalResult<Vec<OperationResult>> {
        validate_batch(&operations, MAX_BATCH_SIZE)?;
        let mut tables = self.tables.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| missing_table("execute_batch", table))?;

        let results = operations.iter().map(OperationResult::from).collect();
        for op in operations {
            match op {
                TableOperation::Upsert(TableRow {
                    partition_key,
                    row_key,
                    properties,
                }) => {
                    rows.entry(partition_key)
                        .or_default()
                        .insert(row_key, properties);
                }
                TableOperation::Delete {
                    partition_key,
                    row_key,
                } => {
                    if let Some(partition) = rows.get_mut(&partition_key) {
                        partition.remove(&row_key);
                        if partition.is_empty() {
                            rows.remove(&partition_key);
                        }
                    }
                }
            }
        }
        Ok(results)
    }

    async fn query(
        &self,
        table: &str,
        query: &TableQuery,
        continuation: Option<ContinuationToken>,
    ) -> JournalResult<QueryPage> {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| missing_table("query", table))?;

        let Some(partition) = rows.get(&query.partition_key) else {
            return Ok(QueryPage::default());
        };

        let start = match continuation {
            Some(ContinuationToken(next)) => Bound::Included(next),
            None => query.range.start.clone(),
        };
        let limit = query.take.unwrap_or(self.page_size).min(self.page_size);

        let mut matching = partition
            .range::<String, _>((start, Bound::Unbounded))
            .filter(|(key, _)| query.range.contains(key));

        let mut page = Vec::with_capacity(limit.min(64));
        for (row_key, properties) in matching.by_ref().take(limit) {
            let properties = match &query.projection {
                Some(columns) => properties
                    .iter()
                    .filter(|(name, _)| columns.iter().any(|c| c == *name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect(),
                None => properties.clone(),
            };
            page.push(TableRow {
                partition_key: query.partition_key.clone(),
                row_key: row_key.clone(),
                properties,
            });
        }

        let continuation = matching
            .next()
            .map(|(next, _)| ContinuationToken(next.clone()));

        Ok(QueryPage {
            rows: page,
            continuation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PropertyValue, RowRange};

    fn row(pk: &str, rk: &str, value: i64) -> TableOperation {
        let mut row = TableRow::new(pk, rk);
        row.properties
            .insert("value".to_string(), PropertyValue::Int64(value));
        TableOperation::Upsert(row)
    }

    async fn store_with_rows(page_size: usize, count: i64) -> MemoryTableStore {
        let store = MemoryTableStore::with_page_size(page_size);
        store.create_table_if_not_exists("t").await.unwrap();
        let ops = (0..count).map(|i| row("p", &format!("{:03}", i), i)).collect();
        store.execute_batch("t", ops).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_table_is_idempotent() {
        let store = MemoryTableStore::new();
        assert!(store.create_table_if_not_exists("t").await.unwrap());
        assert!(!store.create_table_if_not_exists("t").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_table_is_storage_error() {
        let store = MemoryTableStore::new();
        let err = store
            .execute_batch("nope", vec![row("p", "r", 1)])
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_paging_with_continuation() {
        let store = store_with_rows(4, 10).await;
        let query = TableQuery::new("p", RowRange::all());

        let mut seen = Vec::new();
        let mut token = None;
        let mut pages = 0;
        loop {
            let page = store.query("t", &query, token).await.unwrap();
            pages += 1;
            seen.extend(page.rows.iter().map(|r| r.row_key.clone()));
            token = page.continuation;
            if token.is_none() {
                break;
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 10);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_range_take_and_projection() {
        let store = store_with_rows(100, 10).await;
        let query = TableQuery::new("p", RowRange::inclusive("002", "006"))
            .select(&[])
            .take(3);

        let page = store.query("t", &query, None).await.unwrap();
        let keys: Vec<_> = page.rows.iter().map(|r| r.row_key.as_str()).collect();
        assert_eq!(keys, vec!["002", "003", "004"]);
        assert!(page.rows.iter().all(|r| r.properties.is_empty()));
        assert_eq!(page.continuation, Some(ContinuationToken("005".to_string())));
    }

    #[tokio::test]
    async fn test_batch_rejects_more_than_limit() {
        let store = MemoryTableStore::new();
        store.create_table_if_not_exists("t").await.unwrap();
        let ops = (0..101).map(|i| row("p", &i.to_string(), i)).collect();
        let err = store.execute_batch("t", ops).await.unwrap_err();
        assert!(matches!(err, JournalError::BatchTooLarge { .. }));
        assert_eq!(store.row_count("t"), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_rows() {
        let store = store_with_rows(100, 3).await;
        store
            .execute_batch(
                "t",
                vec![
                    TableOperation::delete("p", "000"),
                    TableOperation::delete("p", "missing"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.partition_len("t", "p"), 2);
    }
}
