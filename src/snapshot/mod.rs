//! Snapshot store
//!
//! One blob per saved snapshot, named `escape(pid)/encode(seq)`. Listing an
//! entity's prefix yields its snapshots in ascending sequence order with
//! their metadata, so selection never downloads a body it does not return.
//!
//! ```text
//! container/
//!   $_user$_a/0000000000000000002   { persistenceId, sequenceNr, timestamp } + bytes
//!   $_user$_a/0000000000000000004
//!   $_user$_a/0000000000000000006
//! ```

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::config::SnapshotSettings;
use crate::entries::{metadata_of, snapshot_blob_name, snapshot_blob_prefix, SnapshotEntry};
use crate::error::JournalResult;
use crate::storage::{with_deadline, BlobStore};
use crate::types::{SelectedSnapshot, SnapshotMetadata, SnapshotSelectionCriteria};

/// Snapshot store over one blob container
pub struct BlobSnapshotStore {
    store: Arc<dyn BlobStore>,
    settings: SnapshotSettings,
}

impl BlobSnapshotStore {
    /// Validate settings and create the container when `auto_initialize` is set
    pub async fn open(store: Arc<dyn BlobStore>, settings: SnapshotSettings) -> JournalResult<Self> {
        settings.validate_layout()?;

        if settings.auto_initialize {
            let created = with_deadline(
                "create_container",
                settings.connect_timeout(),
                store.create_container_if_not_exists(&settings.container_name),
            )
            .await?;
            info!(container = %settings.container_name, created, "Snapshot container ready");
        }

        Ok(Self { store, settings })
    }

    pub fn settings(&self) -> &SnapshotSettings {
        &self.settings
    }

    pub fn container(&self) -> &str {
        &self.settings.container_name
    }

    /// Save a snapshot, replacing one with the same id and sequence number
    pub async fn save(&self, metadata: SnapshotMetadata, snapshot: Vec<u8>) -> JournalResult<()> {
        let entry = SnapshotEntry::new(metadata, snapshot);
        let name = entry.blob_name()?;

        with_deadline(
            "put_snapshot",
            self.settings.request_timeout(),
            self.store.put(self.container(), &name, entry.to_blob()),
        )
        .await?;

        if self.settings.verbose_logging {
            debug!(blob = %name, size = entry.snapshot.len(), "Snapshot saved");
        }
        Ok(())
    }

    /// Most recent snapshot matching `criteria`, if any
    pub async fn load(
        &self,
        persistence_id: &str,
        criteria: SnapshotSelectionCriteria,
    ) -> JournalResult<Option<SelectedSnapshot>> {
        let candidates = self.list_matching(persistence_id, &criteria).await?;

        for metadata in candidates.iter().rev() {
            let name = snapshot_blob_name(persistence_id, metadata.sequence_nr)?;
            let blob = with_deadline(
                "get_snapshot",
                self.settings.request_timeout(),
                self.store.get(self.container(), &name),
            )
            .await?;

            // Deleted between listing and download: try the next older one
            if let Some(blob) = blob {
                let entry = SnapshotEntry::from_blob(&name, blob)?;
                if self.settings.verbose_logging {
                    debug!(blob = %name, "Snapshot loaded");
                }
                return Ok(Some(entry.into_selected()));
            }
        }
        Ok(None)
    }

    /// Delete one snapshot; a missing one is not an error
    pub async fn delete(&self, metadata: &SnapshotMetadata) -> JournalResult<()> {
        let name = snapshot_blob_name(&metadata.persistence_id, metadata.sequence_nr)?;
        let existed = with_deadline(
            "delete_snapshot",
            self.settings.request_timeout(),
            self.store.delete(self.container(), &name),
        )
        .await?;

        if self.settings.verbose_logging {
            debug!(blob = %name, existed, "Snapshot deleted");
        }
        Ok(())
    }

    /// Delete every snapshot of an entity matching `criteria`
    ///
    /// Pages through the listing; the deletes of one page run concurrently.
    /// Returns the number of deleted snapshots.
    pub async fn delete_matching(
        &self,
        persistence_id: &str,
        criteria: SnapshotSelectionCriteria,
    ) -> JournalResult<u64> {
        let prefix = snapshot_blob_prefix(persistence_id);
        let mut deleted = 0u64;
        let mut token = None;

        loop {
            let page = with_deadline(
                "list_snapshots",
                self.settings.request_timeout(),
                self.store.list(self.container(), &prefix, token),
            )
            .await?;

            let mut doomed = Vec::new();
            for item in &page.items {
                let metadata = metadata_of(item)?;
                if criteria.matches(&metadata) {
                    doomed.push(item.name.clone());
                }
            }

            let removed = try_join_all(doomed.iter().map(|name| {
                with_deadline(
                    "delete_snapshot",
                    self.settings.request_timeout(),
                    self.store.delete(self.container(), name),
                )
            }))
            .await?;
            deleted += removed.into_iter().filter(|existed| *existed).count() as u64;

            match page.continuation {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        if self.settings.verbose_logging {
            debug!(persistence_id, deleted, "Snapshots deleted");
        }
        Ok(deleted)
    }

    /// Metadata of all matching snapshots in ascending sequence order
    async fn list_matching(
        &self,
        persistence_id: &str,
        criteria: &SnapshotSelectionCriteria,
    ) -> JournalResult<Vec<SnapshotMetadata>> {
        let prefix = snapshot_blob_prefix(persistence_id);
        let mut matching = Vec::new();
        let mut token = None;

        loop {
            let page = with_deadline(
                "list_snapshots",
                self.settings.request_timeout(),
                self.store.list(self.container(), &prefix, token),
            )
            .await?;

            for item in &page.items {
                let metadata = metadata_of(item)?;
                if criteria.matches(&metadata) {
                    matching.push(metadata);
                }
            }

            match page.continuation {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(matching)
    }
}
