//! Envelopes delivered by query streams

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Position in a tag or all-events stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Offset {
    /// Start from the beginning
    NoOffset,
    /// Resume strictly after this value
    Sequence(i64),
}

impl Offset {
    pub fn value(&self) -> i64 {
        match self {
            Offset::NoOffset => 0,
            Offset::Sequence(v) => *v,
        }
    }
}

impl Default for Offset {
    fn default() -> Self {
        Offset::NoOffset
    }
}

/// One event as seen by a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Sequence number for by-persistence-id queries, tick offset otherwise
    pub offset: Offset,

    #[serde(rename = "persistenceId")]
    pub persistence_id: String,

    #[serde(rename = "sequenceNr")]
    pub sequence_nr: i64,

    pub payload: Vec<u8>,

    pub manifest: String,

    /// Write time in 100 ns ticks
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}
