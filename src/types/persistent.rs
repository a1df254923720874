//! Events as the host hands them to the journal

use std::collections::BTreeSet;

use crate::error::{JournalError, JournalResult};

/// One event of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentRepr {
    /// Entity (persistence) id
    pub persistence_id: String,

    /// 1-based, per-entity sequence number
    pub sequence_nr: i64,

    /// Opaque serialized event
    pub payload: Vec<u8>,

    /// Serializer hint for `payload`
    pub manifest: String,

    pub tags: BTreeSet<String>,

    /// Write time in 100 ns ticks; assigned by the journal on write
    pub timestamp: i64,

    /// Identifies the writing incarnation, informational only
    pub writer_uuid: String,
}

impl PersistentRepr {
    pub fn new(persistence_id: impl Into<String>, sequence_nr: i64, payload: Vec<u8>) -> Self {
        Self {
            persistence_id: persistence_id.into(),
            sequence_nr,
            payload,
            manifest: String::new(),
            tags: BTreeSet::new(),
            timestamp: 0,
            writer_uuid: String::new(),
        }
    }

    pub fn with_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.manifest = manifest.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_writer_uuid(mut self, writer_uuid: impl Into<String>) -> Self {
        self.writer_uuid = writer_uuid.into();
        self
    }
}

/// Events of one entity that commit together or not at all
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicWrite {
    pub persistence_id: String,
    pub payload: Vec<PersistentRepr>,
}

impl AtomicWrite {
    /// Group events into an atomic write
    ///
    /// Fails with `InvalidArgument` when the list is empty, mixes entities,
    /// contains a sequence number below 1, or is not strictly increasing.
    pub fn new(payload: Vec<PersistentRepr>) -> JournalResult<Self> {
        let persistence_id = payload
            .first()
            .map(|e| e.persistence_id.clone())
            .unwrap_or_default();
        let write = Self {
            persistence_id,
            payload,
        };
        write.validate()?;
        Ok(write)
    }

    /// Re-check the invariants of [`AtomicWrite::new`]
    pub fn validate(&self) -> JournalResult<()> {
        if self.payload.is_empty() {
            return Err(JournalError::invalid("an atomic write needs at least one event"));
        }
        if self.persistence_id.is_empty() {
            return Err(JournalError::invalid("persistence id must not be empty"));
        }

        let mut previous = 0;
        for event in &self.payload {
            if event.persistence_id != self.persistence_id {
                return Err(JournalError::invalid(format!(
                    "atomic write mixes '{}' and '{}'",
                    self.persistence_id, event.persistence_id
                )));
            }
            if event.sequence_nr <= previous {
                return Err(JournalError::invalid(format!(
                    "sequence numbers of '{}' must be positive and increasing, got {} after {}",
                    self.persistence_id, event.sequence_nr, previous
                )));
            }
            previous = event.sequence_nr;
        }
        Ok(())
    }

    pub fn lowest_sequence_nr(&self) -> i64 {
        self.payload.first().map(|e| e.sequence_nr).unwrap_or(0)
    }

    pub fn highest_sequence_nr(&self) -> i64 {
        self.payload.last().map(|e| e.sequence_nr).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(pid: &str, seq: i64) -> PersistentRepr {
        PersistentRepr::new(pid, seq, vec![seq as u8])
    }

    #[test]
    fn test_atomic_write_accepts_increasing_sequence() {
        let write = AtomicWrite::new(vec![event("p", 3), event("p", 4), event("p", 7)]).unwrap();
        assert_eq!(write.persistence_id, "p");
        assert_eq!(write.lowest_sequence_nr(), 3);
        assert_eq!(write.highest_sequence_nr(), 7);
        assert_eq!(write.len(), 3);
    }

    #[test]
    fn test_atomic_write_rejects_bad_input() {
        assert!(AtomicWrite::new(vec![]).is_err());
        assert!(AtomicWrite::new(vec![event("", 1)]).is_err());
        assert!(AtomicWrite::new(vec![event("p", 0)]).is_err());
        assert!(AtomicWrite::new(vec![event("p", -4)]).is_err());
        assert!(AtomicWrite::new(vec![event("p", 2), event("p", 2)]).is_err());
        assert!(AtomicWrite::new(vec![event("p", 1), event("q", 2)]).is_err());
    }

    #[test]
    fn test_builders() {
        let event = PersistentRepr::new("p", 1, b"x".to_vec())
            .with_manifest("order-placed")
            .with_tags(["blue", "green", "blue"])
            .with_writer_uuid("w-1");
        assert_eq!(event.manifest, "order-placed");
        assert_eq!(event.tags.len(), 2);
        assert_eq!(event.writer_uuid, "w-1");
    }
}
