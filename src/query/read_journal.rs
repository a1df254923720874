//! Query facade
//!
//! Eight stream factories, one per query shape and mode. Each stream pulls
//! from a [`Cursor`], so it only queries the store as fast as it is polled.
//! Dropping a stream cancels its cursor.

use std::sync::Arc;

use futures::stream::BoxStream;

use super::cursor::Cursor;
use super::machine::CursorMode;
use super::source::{CursorSource, EventIndexSource, EventsByPersistenceIdSource, PersistenceIdsSource};
use crate::config::QuerySettings;
use crate::error::JournalResult;
use crate::journal::TableJournal;
use crate::types::{EventEnvelope, Offset};

/// Stream of event envelopes
pub type EventStream = BoxStream<'static, JournalResult<EventEnvelope>>;

/// Stream of persistence ids
pub type PersistenceIdStream = BoxStream<'static, JournalResult<String>>;

/// Read side of a [`TableJournal`]
#[derive(Clone)]
pub struct ReadJournal {
    journal: Arc<TableJournal>,
    settings: QuerySettings,
}

impl ReadJournal {
    pub fn new(journal: Arc<TableJournal>, settings: QuerySettings) -> JournalResult<Self> {
        settings.validate()?;
        Ok(Self { journal, settings })
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    /// Events of one entity, following new appends
    pub fn events_by_persistence_id(
        &self,
        persistence_id: &str,
        from_sequence_nr: i64,
        to_sequence_nr: i64,
    ) -> EventStream {
        into_stream(self.events_by_persistence_id_cursor(
            persistence_id,
            from_sequence_nr,
            to_sequence_nr,
            CursorMode::Live,
        ))
    }

    /// Events of one entity up to its highest sequence number at start
    pub fn current_events_by_persistence_id(
        &self,
        persistence_id: &str,
        from_sequence_nr: i64,
        to_sequence_nr: i64,
    ) -> EventStream {
        into_stream(self.events_by_persistence_id_cursor(
            persistence_id,
            from_sequence_nr,
            to_sequence_nr,
            CursorMode::Current,
        ))
    }

    pub fn events_by_persistence_id_cursor(
        &self,
        persistence_id: &str,
        from_sequence_nr: i64,
        to_sequence_nr: i64,
        mode: CursorMode,
    ) -> Cursor<EventsByPersistenceIdSource> {
        let source = EventsByPersistenceIdSource::new(
            self.journal.clone(),
            persistence_id,
            from_sequence_nr,
            to_sequence_nr,
            mode == CursorMode::Live,
        );
        self.cursor(source, mode)
    }

    /// Tagged events in write order, following new appends
    pub fn events_by_tag(&self, tag: &str, offset: Offset) -> EventStream {
        into_stream(self.events_by_tag_cursor(tag, offset, CursorMode::Live))
    }

    /// Tagged events written before the query started
    pub fn current_events_by_tag(&self, tag: &str, offset: Offset) -> EventStream {
        into_stream(self.events_by_tag_cursor(tag, offset, CursorMode::Current))
    }

    pub fn events_by_tag_cursor(
        &self,
        tag: &str,
        offset: Offset,
        mode: CursorMode,
    ) -> Cursor<EventIndexSource> {
        let source =
            EventIndexSource::by_tag(self.journal.clone(), tag, offset, mode == CursorMode::Live);
        self.cursor(source, mode)
    }

    pub fn all_events(&self, offset: Offset) -> EventStream {
        into_stream(self.all_events_cursor(offset, CursorMode::Live))
    }

    pub fn current_all_events(&self, offset: Offset) -> EventStream {
        into_stream(self.all_events_cursor(offset, CursorMode::Current))
    }

    pub fn all_events_cursor(&self, offset: Offset, mode: CursorMode) -> Cursor<EventIndexSource> {
        let source =
            EventIndexSource::all_events(self.journal.clone(), offset, mode == CursorMode::Live);
        self.cursor(source, mode)
    }

    /// Every persistence id, including ones written after the query started
    pub fn all_persistence_ids(&self) -> PersistenceIdStream {
        into_stream(self.persistence_ids_cursor(CursorMode::Live))
    }

    pub fn current_persistence_ids(&self) -> PersistenceIdStream {
        into_stream(self.persistence_ids_cursor(CursorMode::Current))
    }

    pub fn persistence_ids_cursor(&self, mode: CursorMode) -> Cursor<PersistenceIdsSource> {
        let source = PersistenceIdsSource::new(self.journal.clone(), self.settings.page_size);
        self.cursor(source, mode)
    }

    fn cursor<S: CursorSource>(&self, source: S, mode: CursorMode) -> Cursor<S> {
        let notifications = match mode {
            CursorMode::Live => Some(self.journal.notifier().subscribe()),
            CursorMode::Current => None,
        };
        Cursor::new(
            source,
            mode,
            self.settings.max_buffer_size,
            self.settings.refresh_interval(),
            notifications,
        )
    }
}

fn into_stream<S>(mut cursor: Cursor<S>) -> BoxStream<'static, JournalResult<S::Item>>
where
    S: CursorSource + 'static,
    S::Item: 'static,
{
    Box::pin(async_stream::stream! {
        loop {
            match cursor.request(1).await {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    for item in batch {
                        yield Ok(item);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    })
}
