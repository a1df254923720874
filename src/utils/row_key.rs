//! Sortable row keys
//!
//! Sequence numbers and tick offsets are stored as fixed-width, zero-padded
//! decimal strings so that lexicographic order over keys equals numeric
//! order over the values they encode.

use crate::error::{JournalError, JournalResult};

/// Width of an encoded key; `i64::MAX` has 19 decimal digits
pub const ROW_KEY_WIDTH: usize = 19;

/// Encode a non-negative number as a sortable row key
///
/// Fails with `InvalidArgument` for negative input.
pub fn encode(value: i64) -> JournalResult<String> {
    if value < 0 {
        return Err(JournalError::invalid(format!(
            "row keys require a non-negative value, got {}",
            value
        )));
    }
    Ok(format!("{:0width$}", value, width = ROW_KEY_WIDTH))
}

/// Encode a value already known to be in range
///
/// Negative values clamp to zero. Used for bounds derived from validated input.
pub(crate) fn encode_clamped(value: i64) -> String {
    format!("{:0width$}", value.max(0), width = ROW_KEY_WIDTH)
}

/// Parse the leading encoded number of a composite row key
pub(crate) fn leading_number(row_key: &str) -> Option<i64> {
    row_key.get(..ROW_KEY_WIDTH)?.parse().ok()
}
