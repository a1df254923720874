//! Table Journal
//!
//! Event-sourcing storage over a partitioned table store: an append-only
//! journal keyed by persistence id and sequence number, snapshots in a blob
//! container, and streaming queries over tag and global-offset indexes.
//!
//! # Features
//!
//! - **Atomic writes**: each `AtomicWrite` lands in one partition batch
//!   together with its highest-sequence marker
//! - **Paged replay**: range scans follow continuation tokens and read ahead
//! - **Delete-to**: prefix deletes in provider-sized batches
//! - **Snapshots**: most-recent-matching selection by sequence and time
//! - **Queries**: by persistence id, by tag, all events, all persistence ids;
//!   each as a bounded ("current") or unbounded ("live") stream
//!
//! # Modules
//!
//! - `utils`: row-key codec, partition-key escaper, tick clock, atomic files
//! - `storage`: `TableStore` / `BlobStore` contracts and local backends
//! - `entries`: stored record shapes
//! - `batch`: batch executor
//! - `journal`: write, replay, highest sequence number, delete
//! - `snapshot`: snapshot store
//! - `query`: cursors and the read journal
//! - `config`: settings
//! - `extension`: opens everything from one settings value
//!
//! # Example
//!
//! ```no_run
//! use table_journal::{AtomicWrite, PersistenceExtension, PersistentRepr, Settings};
//!
//! # async fn run() -> table_journal::JournalResult<()> {
//! let extension = PersistenceExtension::in_memory(Settings::development()).await?;
//! let journal = extension.journal();
//!
//! let write = AtomicWrite::new(vec![PersistentRepr::new("order-1", 1, b"placed".to_vec())])?;
//! for outcome in journal.write_messages(vec![write]).await {
//!     outcome?;
//! }
//!
//! journal
//!     .replay_messages("order-1", 1, i64::MAX, u64::MAX, |event| {
//!         println!("{} #{}", event.persistence_id, event.sequence_nr);
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod entries;
pub mod error;
pub mod extension;
pub mod journal;
pub mod query;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use batch::BatchExecutor;
pub use config::{JournalSettings, QuerySettings, Settings, SnapshotSettings};
pub use error::{JournalError, JournalResult};
pub use extension::PersistenceExtension;
pub use journal::TableJournal;
pub use query::{Cursor, CursorMode, CursorState, ReadJournal};
pub use snapshot::BlobSnapshotStore;
pub use storage::{BlobStore, FsBlobStore, MemoryBlobStore, MemoryTableStore, TableStore};
pub use types::{
    AtomicWrite, EventEnvelope, Offset, PersistentRepr, SelectedSnapshot, SnapshotMetadata,
    SnapshotSelectionCriteria,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
