//! Secondary index rows: tags, all events, all persistence ids

use std::collections::BTreeSet;

use super::{columns, decode_tags, encode_tags, Field, JournalEntry, TableEntry};
use crate::storage::PropertyValue;
use crate::types::{EventEnvelope, Offset};
use crate::utils::{escape, row_key};

pub const ALL_PERSISTENCE_IDS_PARTITION: &str = "allPersistenceIdsIdx";
pub const ALL_EVENTS_PARTITION: &str = "allEventsIdx";
pub const TAG_PARTITION_PREFIX: &str = "eventTagIdx|";

const KEY_SEPARATOR: char = '|';

/// Partition holding the index rows of one tag
pub fn tag_partition(tag: &str) -> String {
    format!("{}{}", TAG_PARTITION_PREFIX, escape(tag))
}

pub fn all_events_partition() -> String {
    ALL_EVENTS_PARTITION.to_string()
}

/// Copy of an event keyed by global write order
///
/// `tag` selects the partition: one per tag, or the all-events partition
/// when `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventIndexEntry {
    pub tag: Option<String>,
    pub utc_ticks: i64,
    pub persistence_id: String,
    pub sequence_nr: i64,
    pub payload: Vec<u8>,
    pub manifest: String,
    pub tags: BTreeSet<String>,
}

impl EventIndexEntry {
    /// Index copy of a journal row, for one tag or the all-events partition
    pub fn for_event(entry: &JournalEntry, tag: Option<&str>) -> Self {
        Self {
            tag: tag.map(str::to_string),
            utc_ticks: entry.utc_ticks,
            persistence_id: entry.persistence_id.clone(),
            sequence_nr: entry.sequence_nr,
            payload: entry.payload.clone(),
            manifest: entry.manifest.clone(),
            tags: entry.tags.clone(),
        }
    }

    /// Row key shared by every index row of one event
    pub fn index_row_key(utc_ticks: i64, persistence_id: &str, sequence_nr: i64) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            row_key::encode_clamped(utc_ticks),
            escape(persistence_id),
            row_key::encode_clamped(sequence_nr),
            sep = KEY_SEPARATOR
        )
    }

    pub fn into_envelope(self) -> EventEnvelope {
        EventEnvelope {
            offset: Offset::Sequence(self.utc_ticks),
            persistence_id: self.persistence_id,
            sequence_nr: self.sequence_nr,
            payload: self.payload,
            manifest: self.manifest,
            timestamp: self.utc_ticks,
            tags: self.tags,
        }
    }
}

impl TableEntry for EventIndexEntry {
    const FIELDS: &'static [Field<Self>] = &[
        Field {
            name: columns::TAG,
            required: false,
            encode: |e| e.tag.clone().map(PropertyValue::String),
            decode: |e, v| {
                e.tag = Some(v.as_str()?.to_string());
                Some(())
            },
        },
        Field {
            name: columns::UTC_TICKS,
            required: true,
            encode: |e| Some(PropertyValue::Int64(e.utc_ticks)),
            decode: |e, v| {
                e.utc_ticks = v.as_i64()?;
                Some(())
            },
        },
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
    ];

    fn partition_key(&self) -> String {
        match &self.tag {
            Some(tag) => tag_partition(tag),
            None => all_events_partition(),
        }
    }

    fn row_key(&self) -> String {
        Self::index_row_key(self.utc_ticks, &self.persistence_id, self.sequence_nr)
    }
}

/// Marks that a persistence id has been written at least once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllPersistenceIdsEntry {
    pub persistence_id: String,
}

impl AllPersistenceIdsEntry {
    pub fn new(persistence_id: impl Into<String>) -> Self {
        Self {
            persistence_id: persistence_id.into(),
        }
    }
}

impl TableEntry for AllPersistenceIdsEntry {
    const FIELDS: &'static [Field<Self>] = &[Field {
        name: columns::PERSISTENCE_ID,
        required: true,
        encode: |e| Some(PropertyValue::String(e.persistence_id.clone())),
        decode: |e, v| {
            e.persistence_id = v.as_str()?.to_string();
            Some(())
        },
    }];

    fn partition_key(&self) -> String {
        ALL_PERSISTENCE_IDS_PARTITION.to_string()
    }

    fn row_key(&self) -> String {
        escape(&self.persistence_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: Option<&str>, ticks: i64, seq: i64) -> EventIndexEntry {
        EventIndexEntry {
            tag: tag.map(str::to_string),
            utc_ticks: ticks,
            persistence_id: "a/b".to_string(),
            sequence_nr: seq,
            payload: vec![seq as u8],
            manifest: "m".to_string(),
            tags: ["blue".to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn test_partitions() {
        assert_eq!(entry(Some("blue"), 1, 1).partition_key(), "eventTagIdx|blue");
        assert_eq!(entry(Some("x/y"), 1, 1).partition_key(), "eventTagIdx|x$_y");
        assert_eq!(entry(None, 1, 1).partition_key(), ALL_EVENTS_PARTITION);
    }

    #[test]
    fn test_row_keys_order_by_ticks() {
        let early = entry(None, 9, 5).row_key();
        let late = entry(None, 10, 1).row_key();
        assert!(early < late);
        assert!(!early.contains('/'));
    }

    #[test]
    fn test_index_round_trip_to_envelope() {
        let row = entry(Some("blue"), 77, 3).to_row();
        let envelope = EventIndexEntry::from_row(&row).unwrap().into_envelope();
        assert_eq!(envelope.offset, Offset::Sequence(77));
        assert_eq!(envelope.persistence_id, "a/b");
        assert_eq!(envelope.sequence_nr, 3);
        assert_eq!(envelope.payload, vec![3]);
    }

    #[test]
    fn test_persistence_id_entry() {
        let row = AllPersistenceIdsEntry::new("/user/x").to_row();
        assert_eq!(row.partition_key, ALL_PERSISTENCE_IDS_PARTITION);
        assert_eq!(row.row_key, "$_user$_x");
        assert_eq!(
            AllPersistenceIdsEntry::from_row(&row).unwrap().persistence_id,
            "/user/x"
        );
    }
}
