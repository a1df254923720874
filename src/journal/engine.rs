//! Table-backed journal

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::notifier::{AppendNotification, AppendNotifier};
use crate::batch::BatchExecutor;
use crate::config::JournalSettings;
use crate::entries::{
    all_events_partition, columns, decode_tags, tag_partition, AllPersistenceIdsEntry,
    EventIndexEntry, HighestSequenceNrEntry, JournalEntry, TableEntry,
    HIGHEST_SEQUENCE_NR_ROW_KEY,
};
use crate::error::{JournalError, JournalResult};
use crate::storage::{
    with_deadline, ContinuationToken, QueryPage, RowRange, TableOperation, TableQuery, TableRow,
    TableStore,
};
use crate::types::{AtomicWrite, PersistentRepr};
use crate::utils::row_key::{self, leading_number};
use crate::utils::{escape, TickClock};

/// Journal over one table of a [`TableStore`]
///
/// Create with [`TableJournal::open`]; the handle is ready to use once that
/// returns.
pub struct TableJournal {
    store: Arc<dyn TableStore>,
    settings: JournalSettings,
    executor: BatchExecutor,
    clock: Arc<TickClock>,
    notifier: Arc<AppendNotifier>,
}

impl TableJournal {
    /// Validate settings and create the table when `auto_initialize` is set
    pub async fn open(store: Arc<dyn TableStore>, settings: JournalSettings) -> JournalResult<Self> {
        settings.validate_layout()?;

        if settings.auto_initialize {
            let created = with_deadline(
                "create_table",
                settings.connect_timeout(),
                store.create_table_if_not_exists(&settings.table_name),
            )
            .await?;
            info!(table = %settings.table_name, created, "Journal table ready");
        }

        let executor = BatchExecutor::new(store.clone(), settings.table_name.clone())
            .with_max_batch_size(settings.max_batch_size)
            .with_request_timeout(settings.request_timeout())
            .with_verbose_logging(settings.verbose_logging);

        Ok(Self {
            store,
            settings,
            executor,
            clock: Arc::new(TickClock::new()),
            notifier: Arc::new(AppendNotifier::default()),
        })
    }

    pub fn settings(&self) -> &JournalSettings {
        &self.settings
    }

    pub fn table(&self) -> &str {
        &self.settings.table_name
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Source of write timestamps and global offsets
    pub fn clock(&self) -> &Arc<TickClock> {
        &self.clock
    }

    pub fn notifier(&self) -> &Arc<AppendNotifier> {
        &self.notifier
    }

    /// Persist each atomic write independently
    ///
    /// Returns one outcome per write, in input order. A failed write does
    /// not prevent the following ones from being attempted.
    pub async fn write_messages(&self, writes: Vec<AtomicWrite>) -> Vec<JournalResult<()>> {
        let mut outcomes = Vec::with_capacity(writes.len());
        for write in writes {
            let outcome = self.write_atomic(&write).await;
            if let Err(e) = &outcome {
                warn!(
                    persistence_id = %write.persistence_id,
                    from = write.lowest_sequence_nr(),
                    to = write.highest_sequence_nr(),
                    error = %e,
                    "Atomic write failed"
                );
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn write_atomic(&self, write: &AtomicWrite) -> JournalResult<()> {
        write.validate()?;

        let persistence_id = write.persistence_id.as_str();
        let lowest = write.lowest_sequence_nr();
        let highest = write.highest_sequence_nr();

        let entries: Vec<JournalEntry> = write
            .payload
            .iter()
            .map(|repr| JournalEntry::from_repr(repr, self.clock.next()))
            .collect();

        // Marker goes last: written only after every event chunk committed
        let mut operations: Vec<TableOperation> = entries.iter().map(|e| e.to_upsert()).collect();
        operations.push(HighestSequenceNrEntry::new(persistence_id, highest).to_upsert());

        self.executor
            .execute(operations)
            .await
            .map_err(|e| e.with_context(persistence_id, lowest, highest))?;

        if self.settings.verbose_logging {
            debug!(persistence_id, from = lowest, to = highest, "Events appended");
        }

        self.write_indexes(persistence_id, &entries).await;

        let tags: BTreeSet<String> = entries.iter().flat_map(|e| e.tags.iter().cloned()).collect();
        self.notifier.publish(AppendNotification {
            persistence_id: persistence_id.to_string(),
            tags,
            highest_sequence_nr: highest,
        });
        Ok(())
    }

    /// Fan committed events out to the secondary indexes
    async fn write_indexes(&self, persistence_id: &str, entries: &[JournalEntry]) {
        let mut operations = vec![AllPersistenceIdsEntry::new(persistence_id).to_upsert()];
        for entry in entries {
            operations.push(EventIndexEntry::for_event(entry, None).to_upsert());
            for tag in &entry.tags {
                operations.push(EventIndexEntry::for_event(entry, Some(tag.as_str())).to_upsert());
            }
        }
        execute_best_effort(&self.executor, operations, "index write").await;
    }

    /// Replay `[from, to]` of one entity in sequence order
    ///
    /// Delivers at most `max` events to `on_event` and returns how many were
    /// delivered. `max == 0` returns immediately without querying. The next
    /// page is fetched in the background while the current one is handed
    /// out.
    pub async fn replay_messages<F>(
        &self,
        persistence_id: &str,
        from_sequence_nr: i64,
        to_sequence_nr: i64,
        max: u64,
        mut on_event: F,
    ) -> JournalResult<u64>
    where
        F: FnMut(PersistentRepr),
    {
        if max == 0 || to_sequence_nr < from_sequence_nr {
            return Ok(0);
        }

        let query = TableQuery::new(
            escape(persistence_id),
            RowRange::inclusive(
                row_key::encode(from_sequence_nr)?,
                row_key::encode(to_sequence_nr)?,
            ),
        );
        let context = |e: JournalError| e.with_context(persistence_id, from_sequence_nr, to_sequence_nr);

        let mut delivered = 0u64;
        let mut pages = 0usize;
        let mut next = Some(self.spawn_query(query.clone().take(page_take(max)), None));

        while let Some(handle) = next.take() {
            let page = join(handle).await.map_err(context)?;
            pages += 1;

            let remaining = (max - delivered).saturating_sub(page.rows.len() as u64);
            if let Some(token) = page.continuation.clone() {
                if remaining > 0 {
                    next = Some(self.spawn_query(query.clone().take(page_take(remaining)), Some(token)));
                }
            }

            for row in &page.rows {
                if delivered >= max {
                    break;
                }
                match JournalEntry::from_row(row) {
                    Ok(entry) => on_event(entry.into_repr()),
                    Err(e) => {
                        if let Some(pending) = next.take() {
                            pending.abort();
                        }
                        return Err(e);
                    }
                }
                delivered += 1;
            }
        }

        if self.settings.verbose_logging {
            debug!(
                persistence_id,
                from = from_sequence_nr,
                to = to_sequence_nr,
                delivered,
                pages,
                "Replay finished"
            );
        }
        Ok(delivered)
    }

    /// Highest sequence number ever written for an entity, or 0
    ///
    /// Reads the marker row; entities written without one are scanned from
    /// `from_sequence_nr` upwards.
    pub async fn read_highest_sequence_nr(
        &self,
        persistence_id: &str,
        from_sequence_nr: i64,
    ) -> JournalResult<i64> {
        let partition = escape(persistence_id);
        let marker = TableQuery::new(
            partition.clone(),
            RowRange::inclusive(HIGHEST_SEQUENCE_NR_ROW_KEY, HIGHEST_SEQUENCE_NR_ROW_KEY),
        )
        .take(1);

        let page = self.scan_page(&marker, None).await?;
        if let Some(row) = page.rows.first() {
            return Ok(HighestSequenceNrEntry::from_row(row)?.highest_sequence_nr);
        }

        let scan = TableQuery::new(
            partition,
            RowRange::inclusive(
                row_key::encode_clamped(from_sequence_nr),
                row_key::encode_clamped(i64::MAX),
            ),
        )
        .select(&[columns::SEQUENCE_NR]);

        let mut highest = 0;
        let mut token = None;
        loop {
            let page = self.scan_page(&scan, token).await?;
            highest = page
                .rows
                .iter()
                .filter_map(sequence_nr_of)
                .fold(highest, i64::max);
            match page.continuation {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(highest)
    }

    /// Delete every event of an entity up to and including `to_sequence_nr`
    ///
    /// Pages through the keys; each page's deletes run while the next page
    /// is fetched. Returns once all deletes finished, with the number of
    /// deleted events. The highest sequence number marker is kept.
    pub async fn delete_messages_to(
        &self,
        persistence_id: &str,
        to_sequence_nr: i64,
    ) -> JournalResult<u64> {
        let query = TableQuery::new(
            escape(persistence_id),
            RowRange {
                start: Bound::Unbounded,
                end: Bound::Included(row_key::encode(to_sequence_nr)?),
            },
        )
        .select(&[columns::SEQUENCE_NR, columns::UTC_TICKS, columns::TAGS]);

        let mut in_flight = Vec::new();
        let mut failure = None;
        let mut token = None;
        loop {
            match self.scan_page(&query, token.take()).await {
                Ok(page) => {
                    if !page.rows.is_empty() {
                        in_flight.push(self.spawn_delete(persistence_id, page.rows));
                    }
                    match page.continuation {
                        Some(next) => token = Some(next),
                        None => break,
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut deleted = 0u64;
        for outcome in join_all(in_flight.into_iter().map(join)).await {
            match outcome {
                Ok(count) => deleted += count,
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e.with_context(persistence_id, 1, to_sequence_nr));
        }

        if self.settings.verbose_logging {
            debug!(persistence_id, to = to_sequence_nr, deleted, "Events deleted");
        }
        Ok(deleted)
    }

    fn spawn_delete(&self, persistence_id: &str, rows: Vec<TableRow>) -> JoinHandle<JournalResult<u64>> {
        let deletes: Vec<TableOperation> = rows
            .iter()
            .map(|row| TableOperation::delete(row.partition_key.clone(), row.row_key.clone()))
            .collect();
        let prune = if self.settings.prune_indexes_on_delete {
            index_deletes(persistence_id, &rows)
        } else {
            Vec::new()
        };
        let executor = self.executor.clone();

        tokio::spawn(async move {
            let count = executor.execute(deletes).await?.len() as u64;
            execute_best_effort(&executor, prune, "index prune").await;
            Ok(count)
        })
    }

    /// One page of a scan under the request deadline
    pub(crate) async fn scan_page(
        &self,
        query: &TableQuery,
        continuation: Option<ContinuationToken>,
    ) -> JournalResult<QueryPage> {
        with_deadline(
            "query",
            self.settings.request_timeout(),
            self.store.query(&self.settings.table_name, query, continuation),
        )
        .await
    }

    fn spawn_query(
        &self,
        query: TableQuery,
        continuation: Option<ContinuationToken>,
    ) -> JoinHandle<JournalResult<QueryPage>> {
        let store = self.store.clone();
        let table = self.settings.table_name.clone();
        let timeout = self.settings.request_timeout();
        tokio::spawn(async move {
            with_deadline("query", timeout, store.query(&table, &query, continuation)).await
        })
    }
}

async fn join<T>(handle: JoinHandle<JournalResult<T>>) -> JournalResult<T> {
    handle
        .await
        .map_err(|e| JournalError::Cancelled(format!("background task ended: {}", e)))?
}

fn page_take(limit: u64) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

fn sequence_nr_of(row: &TableRow) -> Option<i64> {
    row.properties
        .get(columns::SEQUENCE_NR)
        .and_then(|v| v.as_i64())
        .or_else(|| leading_number(&row.row_key))
}

/// Index rows that point at the given journal rows
fn index_deletes(persistence_id: &str, rows: &[TableRow]) -> Vec<TableOperation> {
    let mut operations = Vec::new();
    for row in rows {
        let (Some(sequence_nr), Some(ticks)) = (
            sequence_nr_of(row),
            row.properties.get(columns::UTC_TICKS).and_then(|v| v.as_i64()),
        ) else {
            continue;
        };
        let tags = row
            .properties
            .get(columns::TAGS)
            .and_then(decode_tags)
            .unwrap_or_default();

        let key = EventIndexEntry::index_row_key(ticks, persistence_id, sequence_nr);
        operations.push(TableOperation::delete(all_events_partition(), key.clone()));
        for tag in &tags {
            operations.push(TableOperation::delete(tag_partition(tag), key.clone()));
        }
    }
    operations
}

/// Run operations partition by partition, logging failures instead of returning them
async fn execute_best_effort(executor: &BatchExecutor, operations: Vec<TableOperation>, what: &str) {
    let mut groups: BTreeMap<String, Vec<TableOperation>> = BTreeMap::new();
    for op in operations {
        groups.entry(op.partition_key().to_string()).or_default().push(op);
    }

    let runs = groups.into_iter().map(|(partition, ops)| async move {
        (partition, executor.execute(ops).await)
    });
    for (partition, outcome) in join_all(runs).await {
        if let Err(e) = outcome {
            warn!(partition = %partition, error = %e, "{} failed; journal rows are unaffected", what);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::ALL_PERSISTENCE_IDS_PARTITION;
    use crate::storage::MemoryTableStore;

    fn settings() -> JournalSettings {
        JournalSettings {
            table_name: "journal".to_string(),
            ..Default::default()
        }
    }

    async fn journal_with(store: Arc<MemoryTableStore>, settings: JournalSettings) -> TableJournal {
        TableJournal::open(store, settings).await.unwrap()
    }

    fn write(pid: &str, seqs: std::ops::RangeInclusive<i64>, tags: &[&str]) -> AtomicWrite {
        AtomicWrite::new(
            seqs.map(|s| PersistentRepr::new(pid, s, vec![s as u8]).with_tags(tags.iter().copied()))
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_rejects_bad_table_name() {
        let store = Arc::new(MemoryTableStore::new());
        let mut bad = settings();
        bad.table_name = "x".to_string();
        assert!(TableJournal::open(store, bad).await.is_err());
    }

    #[tokio::test]
    async fn test_write_creates_marker_and_indexes() {
        let store = Arc::new(MemoryTableStore::new());
        let journal = journal_with(store.clone(), settings()).await;

        let outcomes = journal.write_messages(vec![write("a/1", 1..=3, &["blue"])]).await;
        assert!(outcomes.iter().all(|o| o.is_ok()));

        // three events plus the marker
        assert_eq!(store.partition_len("journal", &escape("a/1")), 4);
        assert_eq!(store.partition_len("journal", ALL_PERSISTENCE_IDS_PARTITION), 1);
        assert_eq!(store.partition_len("journal", &all_events_partition()), 3);
        assert_eq!(store.partition_len("journal", &tag_partition("blue")), 3);
        assert_eq!(journal.notifier().published(), 1);
    }

    #[tokio::test]
    async fn test_writes_are_isolated() {
        let store = Arc::new(MemoryTableStore::new());
        let journal = journal_with(store.clone(), settings()).await;

        let broken = AtomicWrite {
            persistence_id: "b".to_string(),
            payload: vec![PersistentRepr::new("b", 2, vec![]), PersistentRepr::new("b", 1, vec![])],
        };
        let outcomes = journal
            .write_messages(vec![write("a", 1..=1, &[]), broken, write("c", 1..=2, &[])])
            .await;

        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(JournalError::InvalidArgument(_))));
        assert!(outcomes[2].is_ok());
        assert_eq!(journal.read_highest_sequence_nr("c", 0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replay_follows_continuations() {
        let store = Arc::new(MemoryTableStore::with_page_size(4));
        let journal = journal_with(store, settings()).await;
        journal.write_messages(vec![write("p", 1..=10, &[])]).await;

        let mut seen = Vec::new();
        let delivered = journal
            .replay_messages("p", 2, 9, 100, |repr| seen.push(repr.sequence_nr))
            .await
            .unwrap();
        assert_eq!(delivered, 8);
        assert_eq!(seen, (2..=9).collect::<Vec<_>>());

        seen.clear();
        journal
            .replay_messages("p", 1, i64::MAX, 5, |repr| seen.push(repr.sequence_nr))
            .await
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_highest_falls_back_to_scan_without_marker() {
        let store = Arc::new(MemoryTableStore::new());
        let journal = journal_with(store.clone(), settings()).await;

        let rows = (1..=4)
            .map(|s| JournalEntry::from_repr(&PersistentRepr::new("legacy", s, vec![]), s).to_upsert())
            .collect();
        store.execute_batch("journal", rows).await.unwrap();

        assert_eq!(journal.read_highest_sequence_nr("legacy", 0).await.unwrap(), 4);
        assert_eq!(journal.read_highest_sequence_nr("nobody", 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_prunes_indexes() {
        let store = Arc::new(MemoryTableStore::with_page_size(2));
        let journal = journal_with(store.clone(), settings()).await;
        journal.write_messages(vec![write("p", 1..=5, &["red"])]).await;

        let deleted = journal.delete_messages_to("p", 3).await.unwrap();
        assert_eq!(deleted, 3);
        // two events plus the marker remain
        assert_eq!(store.partition_len("journal", "p"), 3);
        assert_eq!(store.partition_len("journal", &all_events_partition()), 2);
        assert_eq!(store.partition_len("journal", &tag_partition("red")), 2);
        assert_eq!(journal.read_highest_sequence_nr("p", 0).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_delete_can_keep_indexes() {
        let store = Arc::new(MemoryTableStore::new());
        let mut keep = settings();
        keep.prune_indexes_on_delete = false;
        let journal = journal_with(store.clone(), keep).await;
        journal.write_messages(vec![write("p", 1..=2, &["red"])]).await;

        journal.delete_messages_to("p", 2).await.unwrap();
        assert_eq!(store.partition_len("journal", &tag_partition("red")), 2);
    }

    #[tokio::test]
    async fn test_delete_nothing_is_ok() {
        let store = Arc::new(MemoryTableStore::new());
        let journal = journal_with(store, settings()).await;
        assert_eq!(journal.delete_messages_to("ghost", 10).await.unwrap(), 0);
        assert!(journal.delete_messages_to("ghost", -1).await.is_err());
    }
}
