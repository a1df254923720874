//! Data types shared by the journal, snapshot store and queries

mod envelope;
mod persistent;
mod snapshot;

pub use envelope::{EventEnvelope, Offset};
pub use persistent::{AtomicWrite, PersistentRepr};
pub use snapshot::{SelectedSnapshot, SnapshotMetadata, SnapshotSelectionCriteria};
