//! Stored record shapes
//!
//! Every table record is described by a field table: column name plus an
//! encode/decode function pair. `TableEntry` turns any such record into a
//! `TableRow` and back, so record types only declare their keys and fields.
//!
//! ```text
//! partition                       row                              record
//! escape(pid)                     encode(seq)                      JournalEntry
//! escape(pid)                     highestSequenceNr                HighestSequenceNrEntry
//! allPersistenceIdsIdx            escape(pid)                      AllPersistenceIdsEntry
//! eventTagIdx|escape(tag)         encode(ticks)|escape(pid)|seq    EventIndexEntry (tag)
//! allEventsIdx                    encode(ticks)|escape(pid)|seq    EventIndexEntry (global)
//! ```

mod index;
mod journal;
mod snapshot;

use crate::error::{JournalError, JournalResult};
use crate::storage::{PropertyValue, TableOperation, TableRow};

pub use index::{
    all_events_partition, tag_partition, AllPersistenceIdsEntry, EventIndexEntry,
    ALL_EVENTS_PARTITION, ALL_PERSISTENCE_IDS_PARTITION, TAG_PARTITION_PREFIX,
};
pub use journal::{HighestSequenceNrEntry, JournalEntry, HIGHEST_SEQUENCE_NR_ROW_KEY};
pub use snapshot::{metadata_of, snapshot_blob_name, snapshot_blob_prefix, SnapshotEntry};

/// Column names
pub mod columns {
    pub const PERSISTENCE_ID: &str = "persistenceId";
    pub const SEQUENCE_NR: &str = "seqno";
    pub const PAYLOAD: &str = "payload";
    pub const MANIFEST: &str = "manifest";
    pub const TAGS: &str = "tags";
    pub const TAG: &str = "tag";
    pub const UTC_TICKS: &str = "utcTicks";
    pub const WRITER_UUID: &str = "writerUuid";
    pub const HIGHEST_SEQUENCE_NR: &str = "highestSequenceNr";
}

/// One column of a record
pub struct Field<T> {
    pub name: &'static str,
    /// Rows missing a required column fail to decode
    pub required: bool,
    /// `None` leaves the column out of the row
    pub encode: fn(&T) -> Option<PropertyValue>,
    /// `None` means the stored value has the wrong type
    pub decode: fn(&mut T, &PropertyValue) -> Option<()>,
}

/// A record stored as one table row
pub trait TableEntry: Default + Sized + 'static {
    const FIELDS: &'static [Field<Self>];

    fn partition_key(&self) -> String;

    fn row_key(&self) -> String;

    fn to_row(&self) -> TableRow {
        let mut row = TableRow::new(self.partition_key(), self.row_key());
        for field in Self::FIELDS {
            if let Some(value) = (field.encode)(self) {
                row.properties.insert(field.name.to_string(), value);
            }
        }
        row
    }

    fn to_upsert(&self) -> TableOperation {
        TableOperation::Upsert(self.to_row())
    }

    fn from_row(row: &TableRow) -> JournalResult<Self> {
        let mut entry = Self::default();
        for field in Self::FIELDS {
            match row.properties.get(field.name) {
                Some(value) => (field.decode)(&mut entry, value)
                    .ok_or_else(|| corrupted(row, format!("column '{}' has the wrong type", field.name)))?,
                None if field.required => {
                    return Err(corrupted(row, format!("missing column '{}'", field.name)))
                }
                None => {}
            }
        }
        Ok(entry)
    }
}

fn corrupted(row: &TableRow, message: String) -> JournalError {
    JournalError::CorruptedRow {
        partition_key: row.partition_key.clone(),
        row_key: row.row_key.clone(),
        message,
    }
}

pub(crate) fn encode_tags(tags: &std::collections::BTreeSet<String>) -> Option<PropertyValue> {
    serde_json::to_string(tags).ok().map(PropertyValue::String)
}

pub(crate) fn decode_tags(value: &PropertyValue) -> Option<std::collections::BTreeSet<String>> {
    serde_json::from_str(value.as_str()?).ok()
}
