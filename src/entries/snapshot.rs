//! Snapshot blobs
//!
//! Blob name is `escape(pid)/encode(seq)`, so a prefix listing returns one
//! entity's snapshots in ascending sequence order. Metadata travels as blob
//! metadata and can be read from a listing without the body.

use std::collections::BTreeMap;

use crate::error::{JournalError, JournalResult};
use crate::storage::{Blob, BlobItem};
use crate::types::{SelectedSnapshot, SnapshotMetadata};
use crate::utils::{escape, row_key};

const PERSISTENCE_ID: &str = "persistenceId";
const SEQUENCE_NR: &str = "sequenceNr";
const TIMESTAMP: &str = "timestamp";

/// Listing prefix of one entity's snapshots
pub fn snapshot_blob_prefix(persistence_id: &str) -> String {
    format!("{}/", escape(persistence_id))
}

pub fn snapshot_blob_name(persistence_id: &str, sequence_nr: i64) -> JournalResult<String> {
    Ok(format!(
        "{}{}",
        snapshot_blob_prefix(persistence_id),
        row_key::encode(sequence_nr)?
    ))
}

/// One saved snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub metadata: SnapshotMetadata,
    pub snapshot: Vec<u8>,
}

impl SnapshotEntry {
    pub fn new(metadata: SnapshotMetadata, snapshot: Vec<u8>) -> Self {
        Self { metadata, snapshot }
    }

    pub fn blob_name(&self) -> JournalResult<String> {
        snapshot_blob_name(&self.metadata.persistence_id, self.metadata.sequence_nr)
    }

    pub fn to_blob(&self) -> Blob {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            PERSISTENCE_ID.to_string(),
            self.metadata.persistence_id.clone(),
        );
        metadata.insert(SEQUENCE_NR.to_string(), self.metadata.sequence_nr.to_string());
        metadata.insert(TIMESTAMP.to_string(), self.metadata.timestamp.to_string());
        Blob {
            data: self.snapshot.clone(),
            metadata,
        }
    }

    pub fn from_blob(name: &str, blob: Blob) -> JournalResult<Self> {
        let metadata = parse_metadata(name, &blob.metadata)?;
        Ok(Self {
            metadata,
            snapshot: blob.data,
        })
    }

    pub fn into_selected(self) -> SelectedSnapshot {
        SelectedSnapshot {
            metadata: self.metadata,
            snapshot: self.snapshot,
        }
    }
}

/// Metadata of a listed blob
pub fn metadata_of(item: &BlobItem) -> JournalResult<SnapshotMetadata> {
    parse_metadata(&item.name, &item.metadata)
}

fn parse_metadata(name: &str, metadata: &BTreeMap<String, String>) -> JournalResult<SnapshotMetadata> {
    let field = |key: &str| {
        metadata.get(key).ok_or_else(|| JournalError::CorruptedRow {
            partition_key: name.to_string(),
            row_key: String::new(),
            message: format!("snapshot metadata missing '{}'", key),
        })
    };
    let number = |key: &str| -> JournalResult<i64> {
        field(key)?.parse().map_err(|e| JournalError::CorruptedRow {
            partition_key: name.to_string(),
            row_key: String::new(),
            message: format!("snapshot metadata '{}': {}", key, e),
        })
    };

    Ok(SnapshotMetadata {
        persistence_id: field(PERSISTENCE_ID)?.clone(),
        sequence_nr: number(SEQUENCE_NR)?,
        timestamp: number(TIMESTAMP)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_names_sort_by_sequence() {
        let a = snapshot_blob_name("/user/p", 9).unwrap();
        let b = snapshot_blob_name("/user/p", 10).unwrap();
        assert!(a < b);
        assert!(a.starts_with(&snapshot_blob_prefix("/user/p")));
        assert_eq!(a, "$_user$_p/0000000000000000009");
        assert!(snapshot_blob_name("p", -1).is_err());
    }

    #[test]
    fn test_blob_round_trip() {
        let entry = SnapshotEntry::new(SnapshotMetadata::new("p", 4, 1234), b"state".to_vec());
        let name = entry.blob_name().unwrap();
        let back = SnapshotEntry::from_blob(&name, entry.to_blob()).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_corrupted_metadata() {
        let mut blob = Blob::default();
        blob.metadata
            .insert(PERSISTENCE_ID.to_string(), "p".to_string());
        blob.metadata
            .insert(SEQUENCE_NR.to_string(), "not-a-number".to_string());
        assert!(SnapshotEntry::from_blob("p/x", blob).is_err());
    }
}
