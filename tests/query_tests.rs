//! Query Integration Tests
//!
//! Current and live queries over the journal and its indexes:
//! - cursor backpressure on a bounded by-persistence-id query
//! - live resumption after new appends
//! - tag and all-events ordering and offset resume
//! - persistence id listing
//! - bounded live queries and abandoned requests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use table_journal::storage::{
    ContinuationToken, OperationResult, QueryPage, TableOperation, TableQuery,
};
use table_journal::{
    AtomicWrite, CursorMode, CursorState, EventEnvelope, JournalResult, JournalSettings,
    MemoryTableStore, Offset, PersistentRepr, QuerySettings, ReadJournal, TableJournal, TableStore,
};

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    journal: Arc<TableJournal>,
    read: ReadJournal,
}

async fn fixture(refresh_interval_ms: u64) -> Fixture {
    let store = Arc::new(MemoryTableStore::with_page_size(5));
    let journal = Arc::new(
        TableJournal::open(store, JournalSettings::default())
            .await
            .expect("Failed to open journal"),
    );
    let settings = QuerySettings {
        max_buffer_size: 8,
        refresh_interval_ms,
        ..Default::default()
    };
    let read = ReadJournal::new(journal.clone(), settings).expect("Invalid query settings");
    Fixture { journal, read }
}

async fn append(journal: &TableJournal, pid: &str, from: i64, to: i64, tags: &[&str]) {
    let payload = (from..=to)
        .map(|seq| {
            PersistentRepr::new(pid, seq, format!("{}:{}", pid, seq).into_bytes())
                .with_tags(tags.iter().copied())
        })
        .collect();
    let outcomes = journal
        .write_messages(vec![AtomicWrite::new(payload).unwrap()])
        .await;
    assert!(outcomes.iter().all(|o| o.is_ok()));
}

fn ids(envelopes: &[EventEnvelope]) -> Vec<(String, i64)> {
    envelopes
        .iter()
        .map(|e| (e.persistence_id.clone(), e.sequence_nr))
        .collect()
}

#[tokio::test]
async fn test_current_cursor_backpressure() {
    let f = fixture(1_000).await;
    append(&f.journal, "p", 1, 3, &[]).await;

    let mut cursor = f
        .read
        .events_by_persistence_id_cursor("p", 1, i64::MAX, CursorMode::Current);

    let first = cursor.request(2).await.unwrap();
    assert_eq!(ids(&first), vec![("p".to_string(), 1), ("p".to_string(), 2)]);
    assert!(!cursor.is_completed());

    let rest = cursor.request(1).await.unwrap();
    assert_eq!(ids(&rest), vec![("p".to_string(), 3)]);
    assert!(cursor.is_completed());
    assert!(cursor.request(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_current_events_by_persistence_id_range() {
    let f = fixture(1_000).await;
    append(&f.journal, "p", 1, 12, &[]).await;

    let events: Vec<_> = f
        .read
        .current_events_by_persistence_id("p", 3, 9)
        .map(|e| e.unwrap())
        .collect()
        .await;
    let seqs: Vec<i64> = events.iter().map(|e| e.sequence_nr).collect();
    assert_eq!(seqs, (3..=9).collect::<Vec<_>>());
    assert!(events.iter().all(|e| e.offset == Offset::Sequence(e.sequence_nr)));

    let none: Vec<_> = f
        .read
        .current_events_by_persistence_id("missing", 0, i64::MAX)
        .collect()
        .await;
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_live_query_resumes_after_append() {
    // Long refresh interval: only the append notification can wake the cursor
    let f = fixture(60_000).await;
    append(&f.journal, "p", 1, 2, &[]).await;

    let mut live = f.read.events_by_persistence_id("p", 1, i64::MAX);
    for expected in 1..=2 {
        let event = tokio::time::timeout(WAIT, live.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(event.sequence_nr, expected);
    }

    let journal = f.journal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&journal, "p", 3, 3, &[]).await;
    });

    let third = tokio::time::timeout(WAIT, live.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(third.sequence_nr, 3);
    assert_eq!(third.payload, b"p:3".to_vec());
}

#[tokio::test]
async fn test_live_query_polls_on_refresh_tick() {
    let f = fixture(20).await;
    let mut live = f.read.events_by_tag("green", Offset::NoOffset);

    append(&f.journal, "a", 1, 1, &["green"]).await;
    append(&f.journal, "b", 1, 1, &["blue"]).await;
    append(&f.journal, "c", 1, 1, &["green"]).await;

    let first = tokio::time::timeout(WAIT, live.next()).await.unwrap().unwrap().unwrap();
    let second = tokio::time::timeout(WAIT, live.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.persistence_id, "a");
    assert_eq!(second.persistence_id, "c");
    assert!(first.offset < second.offset);
}

#[tokio::test]
async fn test_current_events_by_tag_is_bounded() {
    let f = fixture(1_000).await;
    append(&f.journal, "a", 1, 3, &["red"]).await;
    append(&f.journal, "b", 1, 2, &["red", "blue"]).await;

    let stream = f.read.current_events_by_tag("red", Offset::NoOffset);
    // Written after the query started: not part of the result
    append(&f.journal, "c", 1, 1, &["red"]).await;

    let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;
    assert_eq!(
        ids(&events),
        vec![
            ("a".to_string(), 1),
            ("a".to_string(), 2),
            ("a".to_string(), 3),
            ("b".to_string(), 1),
            ("b".to_string(), 2),
        ]
    );
    assert!(events.windows(2).all(|w| w[0].offset < w[1].offset));
    assert!(events.iter().all(|e| e.tags.contains("red")));
}

#[tokio::test]
async fn test_all_events_resume_strictly_after_offset() {
    let f = fixture(1_000).await;
    append(&f.journal, "a", 1, 2, &[]).await;
    append(&f.journal, "b", 1, 3, &[]).await;

    let all: Vec<_> = f
        .read
        .current_all_events(Offset::NoOffset)
        .map(|e| e.unwrap())
        .collect()
        .await;
    assert_eq!(all.len(), 5);

    let resumed: Vec<_> = f
        .read
        .current_all_events(all[1].offset)
        .map(|e| e.unwrap())
        .collect()
        .await;
    assert_eq!(ids(&resumed), ids(&all[2..]));

    // Repeatable for the committed prefix
    let again: Vec<_> = f
        .read
        .current_all_events(Offset::NoOffset)
        .map(|e| e.unwrap())
        .collect()
        .await;
    assert_eq!(ids(&again), ids(&all));
}

#[tokio::test]
async fn test_deleted_events_leave_the_indexes() {
    let f = fixture(1_000).await;
    append(&f.journal, "a", 1, 4, &["red"]).await;
    f.journal.delete_messages_to("a", 2).await.unwrap();

    let tagged: Vec<_> = f
        .read
        .current_events_by_tag("red", Offset::NoOffset)
        .map(|e| e.unwrap().sequence_nr)
        .collect()
        .await;
    assert_eq!(tagged, vec![3, 4]);
}

#[tokio::test]
async fn test_persistence_ids() {
    let f = fixture(20).await;
    for pid in ["x/1", "x/2", "y"] {
        append(&f.journal, pid, 1, 2, &[]).await;
    }
    append(&f.journal, "y", 3, 3, &[]).await;

    let mut current: Vec<String> = f
        .read
        .current_persistence_ids()
        .map(|id| id.unwrap())
        .collect()
        .await;
    current.sort();
    assert_eq!(current, vec!["x/1", "x/2", "y"]);

    let mut live = f.read.all_persistence_ids();
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(tokio::time::timeout(WAIT, live.next()).await.unwrap().unwrap().unwrap());
    }
    append(&f.journal, "z", 1, 1, &[]).await;
    let next = tokio::time::timeout(WAIT, live.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(next, "z");
    assert!(!seen.contains(&next));
}

#[tokio::test]
async fn test_cancelled_cursor_stops() {
    let f = fixture(20).await;
    append(&f.journal, "p", 1, 10, &[]).await;

    let mut cursor = f
        .read
        .events_by_persistence_id_cursor("p", 1, i64::MAX, CursorMode::Live);
    assert_eq!(cursor.request(3).await.unwrap().len(), 3);

    cursor.cancel();
    assert!(cursor.is_completed());
    assert!(cursor.request(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_live_query_completes_at_requested_bound() {
    let f = fixture(20).await;
    append(&f.journal, "p", 1, 3, &[]).await;

    let events: Vec<i64> = tokio::time::timeout(
        WAIT,
        f.read
            .events_by_persistence_id("p", 1, 2)
            .map(|e| e.unwrap().sequence_nr)
            .collect::<Vec<_>>(),
    )
    .await
    .expect("live query past its bound should complete");
    assert_eq!(events, vec![1, 2]);
}

#[tokio::test]
async fn test_live_query_waits_for_bound_then_completes() {
    let f = fixture(20).await;
    append(&f.journal, "p", 1, 2, &[]).await;
    let stream = f.read.events_by_persistence_id("p", 1, 3);

    let journal = f.journal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&journal, "p", 3, 4, &[]).await;
    });

    let events: Vec<i64> = tokio::time::timeout(
        WAIT,
        stream.map(|e| e.unwrap().sequence_nr).collect::<Vec<_>>(),
    )
    .await
    .unwrap();
    assert_eq!(events, vec![1, 2, 3]);
}

/// Table store whose range queries can be slowed down
struct SlowStore {
    inner: MemoryTableStore,
    slow: AtomicBool,
}

#[async_trait]
impl TableStore for SlowStore {
    async fn create_table_if_not_exists(&self, table: &str) -> JournalResult<bool> {
        self.inner.create_table_if_not_exists(table).await
    }

    async fn execute_batch(
        &self,
        table: &str,
        operations: Vec<TableOperation>,
    ) -> JournalResult<Vec<OperationResult>> {
        self.inner.execute_batch(table, operations).await
    }

    async fn query(
        &self,
        table: &str,
        query: &TableQuery,
        continuation: Option<ContinuationToken>,
    ) -> JournalResult<QueryPage> {
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.inner.query(table, query, continuation).await
    }
}

#[tokio::test]
async fn test_abandoned_request_is_retried() {
    let store = Arc::new(SlowStore {
        inner: MemoryTableStore::new(),
        slow: AtomicBool::new(false),
    });
    let journal = Arc::new(
        TableJournal::open(store.clone(), JournalSettings::default())
            .await
            .unwrap(),
    );
    append(&journal, "p", 1, 3, &[]).await;
    let read = ReadJournal::new(journal, QuerySettings::default()).unwrap();

    let mut cursor = read.events_by_persistence_id_cursor("p", 1, i64::MAX, CursorMode::Current);
    store.slow.store(true, Ordering::SeqCst);
    let abandoned = tokio::time::timeout(Duration::from_millis(20), cursor.request(1)).await;
    assert!(abandoned.is_err());
    assert_eq!(cursor.state(), CursorState::Replaying);

    store.slow.store(false, Ordering::SeqCst);
    let mut seqs = Vec::new();
    loop {
        let batch = cursor.request(3).await.unwrap();
        if batch.is_empty() {
            break;
        }
        seqs.extend(batch.iter().map(|e| e.sequence_nr));
    }
    assert_eq!(seqs, vec![1, 2, 3]);
    assert!(cursor.is_completed());
}
