//! Partition key escaping
//!
//! Persistence ids are often derived from actor paths and contain `/`,
//! which partition keys forbid. `$` cannot start an actor name, so it is
//! used as the escape marker:
//!
//! ```text
//! "$"  ->  "$$"
//! "/"  ->  "$_"
//! ```
//!
//! Every `$` in escaped output starts a two-character token, which makes
//! `unescape` an exact inverse of `escape` for any input.

/// Separator forbidden in partition keys
pub const SEPARATOR: char = '/';

/// Escape marker
pub const MARKER: char = '$';

const SEPARATOR_TOKEN: char = '_';

/// Escape a raw id into a partition-key-safe string
pub fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len() + 4);
    for ch in raw.chars() {
        match ch {
            MARKER => {
                escaped.push(MARKER);
                escaped.push(MARKER);
            }
            SEPARATOR => {
                escaped.push(MARKER);
                escaped.push(SEPARATOR_TOKEN);
            }
            other => escaped.push(other),
        }
    }
    escaped
}

/// Restore the raw id from an escaped partition key
///
/// Doubled markers are restored first within each token, so a marker
/// produced from `$$` never combines with a following `_`.
pub fn unescape(escaped: &str) -> String {
    let mut raw = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(ch) = chars.next() {
        if ch != MARKER {
            raw.push(ch);
            continue;
        }
        match chars.next() {
            Some(MARKER) => raw.push(MARKER),
            Some(SEPARATOR_TOKEN) => raw.push(SEPARATOR),
            // Not produced by `escape`; keep the input as-is.
            Some(other) => {
                raw.push(MARKER);
                raw.push(other);
            }
            None => raw.push(MARKER),
        }
    }
    raw
}
