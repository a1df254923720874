//! Snapshot metadata and selection

/// Identifies one saved snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMetadata {
    pub persistence_id: String,
    pub sequence_nr: i64,
    /// Unix milliseconds
    pub timestamp: i64,
}

impl SnapshotMetadata {
    pub fn new(persistence_id: impl Into<String>, sequence_nr: i64, timestamp: i64) -> Self {
        Self {
            persistence_id: persistence_id.into(),
            sequence_nr,
            timestamp,
        }
    }
}

/// A loaded snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedSnapshot {
    pub metadata: SnapshotMetadata,
    pub snapshot: Vec<u8>,
}

/// Bounds a snapshot must fall within to be selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSelectionCriteria {
    pub max_sequence_nr: i64,
    pub max_timestamp: i64,
    pub min_sequence_nr: i64,
    pub min_timestamp: i64,
}

impl SnapshotSelectionCriteria {
    pub fn new(max_sequence_nr: i64, max_timestamp: i64) -> Self {
        Self {
            max_sequence_nr,
            max_timestamp,
            min_sequence_nr: 0,
            min_timestamp: 0,
        }
    }

    /// Matches every snapshot; loads pick the most recent
    pub fn latest() -> Self {
        Self::new(i64::MAX, i64::MAX)
    }

    /// Matches nothing; the sequence bounds exclude each other
    pub fn none() -> Self {
        Self::new(-1, i64::MIN)
    }

    pub fn with_min_sequence_nr(mut self, min_sequence_nr: i64) -> Self {
        self.min_sequence_nr = min_sequence_nr;
        self
    }

    pub fn with_min_timestamp(mut self, min_timestamp: i64) -> Self {
        self.min_timestamp = min_timestamp;
        self
    }

    pub fn matches(&self, metadata: &SnapshotMetadata) -> bool {
        metadata.sequence_nr <= self.max_sequence_nr
            && metadata.timestamp <= self.max_timestamp
            && metadata.sequence_nr >= self.min_sequence_nr
            && metadata.timestamp >= self.min_timestamp
    }
}

impl Default for SnapshotSelectionCriteria {
    fn default() -> Self {
        Self::latest()
    }
}
