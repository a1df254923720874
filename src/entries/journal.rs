//! Journal rows and the per-entity highest sequence number marker

use std::collections::BTreeSet;

use super::{columns, decode_tags, encode_tags, Field, TableEntry};
use crate::storage::PropertyValue;
use crate::types::PersistentRepr;
use crate::utils::{escape, row_key};

/// Row key of the marker; sorts after every encoded sequence number
pub const HIGHEST_SEQUENCE_NR_ROW_KEY: &str = "highestSequenceNr";

/// One persisted event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalEntry {
    pub persistence_id: String,
    pub sequence_nr: i64,
    pub payload: Vec<u8>,
    pub manifest: String,
    pub tags: BTreeSet<String>,
    pub utc_ticks: i64,
    pub writer_uuid: String,
}

impl JournalEntry {
    /// Stamp an event with its write time
    pub fn from_repr(repr: &PersistentRepr, utc_ticks: i64) -> Self {
        Self {
            persistence_id: repr.persistence_id.clone(),
            sequence_nr: repr.sequence_nr,
            payload: repr.payload.clone(),
            manifest: repr.manifest.clone(),
            tags: repr.tags.clone(),
            utc_ticks,
            writer_uuid: repr.writer_uuid.clone(),
        }
    }

    pub fn into_repr(self) -> PersistentRepr {
        PersistentRepr {
            persistence_id: self.persistence_id,
            sequence_nr: self.sequence_nr,
            payload: self.payload,
            manifest: self.manifest,
            tags: self.tags,
            timestamp: self.utc_ticks,
            writer_uuid: self.writer_uuid,
        }
    }
}

impl TableEntry for JournalEntry {
    const FIELDS: &'static [Field<Self>] = &[
        Field {
            name: columns::PERSISTENCE_ID,
            required: true,
            encode: |e| Some(PropertyValue::String(e.persistence_id.clone())),
            decode: |e, v| {
                e.persistence_id = v.as_str()?.to_string();
                Some(())
            },
        },
        Field {
            name: columns::SEQUENCE_NR,
            required: true,
            encode: |e| Some(PropertyValue::Int64(e.sequence_nr)),
            decode: |e, v| {
                e.sequence_nr = v.as_i64()?;
                Some(())
            },
        },
        Field {
            name: columns::PAYLOAD,
            required: true,
            encode: |e| Some(PropertyValue::Binary(e.payload.clone())),
            decode: |e, v| {
                e.payload = v.as_bytes()?.to_vec();
                Some(())
            },
        },
        Field {
            name: columns::MANIFEST,
            required: false,
            encode: |e| Some(PropertyValue::String(e.manifest.clone())),
            decode: |e, v| {
                e.manifest = v.as_str()?.to_string();
                Some(())
            },
        },
        Field {
            name: columns::TAGS,
            required: false,
            encode: |e| encode_tags(&e.tags),
            decode: |e, v| {
                e.tags = decode_tags(v)?;
                Some(())
            },
        },
        Field {
            name: columns::UTC_TICKS,
            required: false,
            encode: |e| Some(PropertyValue::Int64(e.utc_ticks)),
            decode: |e, v| {
                e.utc_ticks = v.as_i64()?;
                Some(())
            },
        },
        Field {
            name: columns::WRITER_UUID,
            required: false,
            encode: |e| {
                (!e.writer_uuid.is_empty()).then(|| PropertyValue::String(e.writer_uuid.clone()))
            },
            decode: |e, v| {
                e.writer_uuid = v.as_str()?.to_string();
                Some(())
            },
        },
    ];

    fn partition_key(&self) -> String {
        escape(&self.persistence_id)
    }

    fn row_key(&self) -> String {
        row_key::encode_clamped(self.sequence_nr)
    }
}

/// Cached highest sequence number of one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighestSequenceNrEntry {
    pub persistence_id: String,
    pub highest_sequence_nr: i64,
}

impl HighestSequenceNrEntry {
    pub fn new(persistence_id: impl Into<String>, highest_sequence_nr: i64) -> Self {
        Self {
            persistence_id: persistence_id.into(),
            highest_sequence_nr,
        }
    }
}

impl TableEntry for HighestSequenceNrEntry {
    const FIELDS: &'static [Field<Self>] = &[
        Field {
            name: columns::PERSISTENCE_ID,
            required: true,
            encode: |e| Some(PropertyValue::String(e.persistence_id.clone())),
            decode: |e, v| {
                e.persistence_id = v.as_str()?.to_string();
                Some(())
            },
        },
        Field {
            name: columns::HIGHEST_SEQUENCE_NR,
            required: true,
            encode: |e| Some(PropertyValue::Int64(e.highest_sequence_nr)),
            decode: |e, v| {
                e.highest_sequence_nr = v.as_i64()?;
                Some(())
            },
        },
    ];

    fn partition_key(&self) -> String {
        escape(&self.persistence_id)
    }

    fn row_key(&self) -> String {
        HIGHEST_SEQUENCE_NR_ROW_KEY.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_entry_keys_and_round_trip() {
        let repr = PersistentRepr::new("/user/a", 12, vec![0xde, 0xad])
            .with_manifest("m1")
            .with_tags(["t1", "t2"]);
        let entry = JournalEntry::from_repr(&repr, 99);
        let row = entry.to_row();

        assert_eq!(row.partition_key, "$_user$_a");
        assert_eq!(row.row_key, "0000000000000000012");

        let back = JournalEntry::from_row(&row).unwrap().into_repr();
        assert_eq!(back.persistence_id, "/user/a");
        assert_eq!(back.payload, vec![0xde, 0xad]);
        assert_eq!(back.tags, repr.tags);
        assert_eq!(back.timestamp, 99);
    }

    #[test]
    fn test_marker_sorts_after_sequence_rows() {
        let marker = HighestSequenceNrEntry::new("p", 5);
        assert_eq!(marker.partition_key(), JournalEntry {
            persistence_id: "p".to_string(),
            ..Default::default()
        }
        .partition_key());
        assert!(marker.row_key() > row_key::encode(i64::MAX).unwrap());
    }
}
