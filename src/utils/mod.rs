//! Utility functions and helpers
//!
//! Key encoding, partition-key escaping, tick clocks and atomic file writes.

pub mod atomic;
pub mod escape;
pub mod row_key;
pub mod time;

pub use escape::{escape, unescape};
pub use time::{current_millis, current_ticks, TickClock};
