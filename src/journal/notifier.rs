//! Append notifications for live queries
//!
//! Each journal owns one notifier. Successful writes publish a
//! notification; live cursors subscribe and leave their idle state as soon
//! as something relevant arrives instead of waiting for the next refresh
//! tick. Nobody listening is fine.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

/// Default channel capacity; slow subscribers lag and resynchronise by polling
pub const DEFAULT_CAPACITY: usize = 1024;

/// Published after an atomic write commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendNotification {
    pub persistence_id: String,
    pub tags: BTreeSet<String>,
    /// Highest sequence number of the write
    pub highest_sequence_nr: i64,
}

/// Broadcasts append notifications to live cursors
pub struct AppendNotifier {
    tx: broadcast::Sender<AppendNotification>,
    published: AtomicU64,
}

impl AppendNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            published: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, notification: AppendNotification) {
        self.published.fetch_add(1, Ordering::Relaxed);
        // No receivers is not an error
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppendNotification> {
        self.tx.subscribe()
    }

    /// Number of notifications published so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for AppendNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
