//! Persistence extension
//!
//! One place that turns a [`Settings`] value into ready-to-use handles:
//! the journal, the snapshot store and the read journal. Everything is
//! opened up front; there is no lazy initialisation.

use std::sync::Arc;

use tracing::info;

use crate::config::Settings;
use crate::error::JournalResult;
use crate::journal::TableJournal;
use crate::query::ReadJournal;
use crate::snapshot::BlobSnapshotStore;
use crate::storage::{BlobStore, MemoryBlobStore, MemoryTableStore, TableStore};

/// Opened journal, snapshot store and read journal sharing one settings value
pub struct PersistenceExtension {
    settings: Arc<Settings>,
    journal: Arc<TableJournal>,
    snapshots: Arc<BlobSnapshotStore>,
    read_journal: ReadJournal,
}

impl PersistenceExtension {
    /// Validate `settings` and open every component against the given backends
    pub async fn open(
        settings: Settings,
        tables: Arc<dyn TableStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> JournalResult<Self> {
        let settings = settings.into_shared()?;
        let journal_target = settings.journal.connection_target()?;
        let snapshot_target = settings.snapshot.connection_target()?;

        info!(
            journal_target = journal_target.kind(),
            snapshot_target = snapshot_target.kind(),
            table = %settings.journal.table_name,
            container = %settings.snapshot.container_name,
            "Opening persistence extension"
        );

        let journal = Arc::new(TableJournal::open(tables, settings.journal.clone()).await?);
        let snapshots = Arc::new(BlobSnapshotStore::open(blobs, settings.snapshot.clone()).await?);
        let read_journal = ReadJournal::new(journal.clone(), settings.query.clone())?;

        Ok(Self {
            settings,
            journal,
            snapshots,
            read_journal,
        })
    }

    /// Open against fresh in-memory backends
    pub async fn in_memory(settings: Settings) -> JournalResult<Self> {
        Self::open(
            settings,
            Arc::new(MemoryTableStore::new()),
            Arc::new(MemoryBlobStore::new()),
        )
        .await
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn journal(&self) -> &Arc<TableJournal> {
        &self.journal
    }

    pub fn snapshot_store(&self) -> &Arc<BlobSnapshotStore> {
        &self.snapshots
    }

    pub fn read_journal(&self) -> &ReadJournal {
        &self.read_journal
    }
}
