//! Journal engine
//!
//! Append, replay, highest-sequence lookup and delete-to over a
//! [`TableStore`](crate::storage::TableStore).
//!
//! # Write path
//!
//! ```text
//! AtomicWrite(pid, [e1..en])
//!     │
//!     ├─► batch: upsert e1..en, upsert highestSequenceNr   (partition escape(pid))
//!     │          committed? ── no ──► outcome = Err, next write
//!     │
//!     ├─► best effort: allPersistenceIdsIdx, allEventsIdx, eventTagIdx|tag
//!     │
//!     └─► AppendNotifier ──► live cursors
//! ```
//!
//! Each atomic write gets its own outcome; one failing write does not stop
//! the others.

mod engine;
mod notifier;

pub use engine::TableJournal;
pub use notifier::{AppendNotification, AppendNotifier, DEFAULT_CAPACITY};
