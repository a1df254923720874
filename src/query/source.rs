//! Cursor sources: the range queries behind each query shape
//!
//! A source owns its position and its upper bound. Each `fetch` resumes
//! where the previous one stopped and reports whether it reached the bound.

use std::collections::HashSet;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entries::{
    all_events_partition, tag_partition, AllPersistenceIdsEntry, EventIndexEntry, JournalEntry,
    TableEntry, ALL_PERSISTENCE_IDS_PARTITION,
};
use crate::error::JournalResult;
use crate::journal::{AppendNotification, TableJournal};
use crate::storage::{ContinuationToken, RowRange, TableQuery};
use crate::types::{EventEnvelope, Offset};
use crate::utils::{escape, row_key};

/// Results of one fetch
#[derive(Debug)]
pub struct Fetched<T> {
    pub items: Vec<T>,
    /// No more results up to the current upper bound
    pub exhausted: bool,
    /// Past the upper bound the query was opened with; nothing will follow
    pub finished: bool,
}

impl<T> Fetched<T> {
    fn done() -> Self {
        Self {
            items: Vec::new(),
            exhausted: true,
            finished: false,
        }
    }

    fn finished() -> Self {
        Self {
            items: Vec::new(),
            exhausted: true,
            finished: true,
        }
    }
}

/// Range query state of one cursor
#[async_trait]
pub trait CursorSource: Send {
    type Item: Send;

    /// Fetch up to `limit` results after the current position
    async fn fetch(&mut self, limit: usize) -> JournalResult<Fetched<Self::Item>>;

    /// Whether an append may have produced results for this source
    fn is_relevant(&self, _notification: &AppendNotification) -> bool {
        true
    }
}

fn journal_envelope(entry: JournalEntry) -> EventEnvelope {
    EventEnvelope {
        offset: Offset::Sequence(entry.sequence_nr),
        persistence_id: entry.persistence_id,
        sequence_nr: entry.sequence_nr,
        payload: entry.payload,
        manifest: entry.manifest,
        timestamp: entry.utc_ticks,
        tags: entry.tags,
    }
}

/// Events of one entity in sequence order
pub struct EventsByPersistenceIdSource {
    journal: Arc<TableJournal>,
    persistence_id: String,
    partition: String,
    next_sequence_nr: i64,
    to_sequence_nr: i64,
    live: bool,
    /// Effective upper bound; `None` until the first fetch reads it
    bound: Option<i64>,
}

impl EventsByPersistenceIdSource {
    pub fn new(
        journal: Arc<TableJournal>,
        persistence_id: &str,
        from_sequence_nr: i64,
        to_sequence_nr: i64,
        live: bool,
    ) -> Self {
        Self {
            journal,
            persistence_id: persistence_id.to_string(),
            partition: escape(persistence_id),
            next_sequence_nr: from_sequence_nr.max(0),
            to_sequence_nr,
            live,
            bound: None,
        }
    }

    /// Clamp the requested upper bound to what has actually been written
    async fn refresh_bound(&mut self) -> JournalResult<i64> {
        let highest = self
            .journal
            .read_highest_sequence_nr(&self.persistence_id, self.next_sequence_nr)
            .await?;
        let bound = self.to_sequence_nr.min(highest);
        self.bound = Some(bound);
        Ok(bound)
    }
}

#[async_trait]
impl CursorSource for EventsByPersistenceIdSource {
    type Item = EventEnvelope;

    async fn fetch(&mut self, limit: usize) -> JournalResult<Fetched<EventEnvelope>> {
        if self.next_sequence_nr > self.to_sequence_nr {
            return Ok(Fetched::finished());
        }
        let bound = match self.bound {
            Some(bound) if !self.live => bound,
            _ => self.refresh_bound().await?,
        };
        if self.next_sequence_nr > bound || limit == 0 {
            return Ok(Fetched::done());
        }

        let query = TableQuery::new(
            self.partition.clone(),
            RowRange::inclusive(row_key::encode(self.next_sequence_nr)?, row_key::encode(bound)?),
        );

        // Position moves only once the whole fetch succeeded
        let mut next = self.next_sequence_nr;
        let mut items = Vec::new();
        let mut token: Option<ContinuationToken> = None;
        loop {
            let page = self
                .journal
                .scan_page(&query.clone().take(limit - items.len()), token)
                .await?;
            for row in &page.rows {
                let entry = JournalEntry::from_row(row)?;
                next = entry.sequence_nr.saturating_add(1);
                items.push(journal_envelope(entry));
            }
            token = page.continuation;
            if token.is_none() || items.len() >= limit {
                break;
            }
        }
        self.next_sequence_nr = next;

        let exhausted = next > bound || (token.is_none() && items.len() < limit);
        Ok(Fetched {
            items,
            exhausted,
            finished: next > self.to_sequence_nr,
        })
    }

    fn is_relevant(&self, notification: &AppendNotification) -> bool {
        notification.persistence_id == self.persistence_id
    }
}

/// Index rows in write order, resuming strictly after an offset
pub struct EventIndexSource {
    journal: Arc<TableJournal>,
    tag: Option<String>,
    partition: String,
    /// Last delivered offset
    after: i64,
    /// Captured at start for current queries
    upper: Option<i64>,
}

impl EventIndexSource {
    /// Events carrying `tag`
    pub fn by_tag(journal: Arc<TableJournal>, tag: &str, offset: Offset, live: bool) -> Self {
        Self::new(journal, Some(tag.to_string()), offset, live)
    }

    /// Every event
    pub fn all_events(journal: Arc<TableJournal>, offset: Offset, live: bool) -> Self {
        Self::new(journal, None, offset, live)
    }

    fn new(journal: Arc<TableJournal>, tag: Option<String>, offset: Offset, live: bool) -> Self {
        let partition = match &tag {
            Some(tag) => tag_partition(tag),
            None => all_events_partition(),
        };
        let upper = (!live).then(|| journal.clock().current());
        Self {
            journal,
            tag,
            partition,
            after: offset.value(),
            upper,
        }
    }

    fn range(&self) -> RowRange {
        let start = Bound::Included(row_key::encode_clamped(self.after.saturating_add(1)));
        let end = match self.upper {
            // Everything whose leading key is <= upper
            Some(upper) => Bound::Excluded(row_key::encode_clamped(upper.saturating_add(1))),
            None => Bound::Unbounded,
        };
        RowRange { start, end }
    }
}

#[async_trait]
impl CursorSource for EventIndexSource {
    type Item = EventEnvelope;

    async fn fetch(&mut self, limit: usize) -> JournalResult<Fetched<EventEnvelope>> {
        if limit == 0 || self.upper.map_or(false, |upper| self.after >= upper) {
            return Ok(Fetched::done());
        }

        let query = TableQuery::new(self.partition.clone(), self.range());
        let mut after = self.after;
        let mut items = Vec::new();
        let mut token: Option<ContinuationToken> = None;
        loop {
            let page = self
                .journal
                .scan_page(&query.clone().take(limit - items.len()), token)
                .await?;
            for row in &page.rows {
                let envelope = EventIndexEntry::from_row(row)?.into_envelope();
                after = envelope.offset.value();
                items.push(envelope);
            }
            token = page.continuation;
            if token.is_none() || items.len() >= limit {
                break;
            }
        }
        self.after = after;

        let exhausted = token.is_none() && items.len() < limit;
        Ok(Fetched {
            items,
            exhausted,
            finished: false,
        })
    }

    fn is_relevant(&self, notification: &AppendNotification) -> bool {
        match &self.tag {
            Some(tag) => notification.tags.contains(tag),
            None => true,
        }
    }
}

/// Distinct persistence ids, unordered
///
/// A live source rescans the index after each full pass and emits only ids
/// it has not seen yet.
pub struct PersistenceIdsSource {
    journal: Arc<TableJournal>,
    page_size: usize,
    seen: HashSet<String>,
    token: Option<ContinuationToken>,
}

impl PersistenceIdsSource {
    pub fn new(journal: Arc<TableJournal>, page_size: usize) -> Self {
        Self {
            journal,
            page_size: page_size.max(1),
            seen: HashSet::new(),
            token: None,
        }
    }
}

#[async_trait]
impl CursorSource for PersistenceIdsSource {
    type Item = String;

    async fn fetch(&mut self, limit: usize) -> JournalResult<Fetched<String>> {
        if limit == 0 {
            return Ok(Fetched::done());
        }

        let query = TableQuery::new(ALL_PERSISTENCE_IDS_PARTITION, RowRange::all());
        let mut token = self.token.clone();
        let mut fresh = HashSet::new();
        let mut items = Vec::new();
        let exhausted = loop {
            let take = (limit - items.len()).min(self.page_size);
            let page = self
                .journal
                .scan_page(&query.clone().take(take), token.take())
                .await?;
            for row in &page.rows {
                let id = AllPersistenceIdsEntry::from_row(row)?.persistence_id;
                if !self.seen.contains(&id) && fresh.insert(id.clone()) {
                    items.push(id);
                }
            }

            match page.continuation {
                Some(next) => token = Some(next),
                // Pass complete; the next fetch starts over
                None => break true,
            }
            if items.len() >= limit {
                break false;
            }
        };

        self.token = token;
        self.seen.extend(fresh);
        Ok(Fetched {
            items,
            exhausted,
            finished: false,
        })
    }
}
