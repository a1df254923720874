//! Query side: streaming cursors over the journal and its indexes
//!
//! Every query is a [`Cursor`] driving a [`CursorSource`]:
//!
//! | Query | Source | Order |
//! |---|---|---|
//! | events by persistence id | journal partition | sequence number |
//! | events by tag | `eventTagIdx\|tag` | write offset |
//! | all events | `allEventsIdx` | write offset |
//! | persistence ids | `allPersistenceIdsIdx` | none |
//!
//! Current queries stop at the bound captured when they start. Live queries
//! go idle when caught up and resume on the refresh tick or on an append
//! notification from the journal.

mod cursor;
mod machine;
mod read_journal;
mod source;

pub use cursor::Cursor;
pub use machine::{CursorEffect, CursorEvent, CursorMachine, CursorMode, CursorState};
pub use read_journal::{EventStream, PersistenceIdStream, ReadJournal};
pub use source::{
    CursorSource, EventIndexSource, EventsByPersistenceIdSource, Fetched, PersistenceIdsSource,
};
