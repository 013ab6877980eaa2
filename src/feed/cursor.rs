//! Match cursor (`since_id`) for the polling loop

use std::cmp::Ordering;
use std::fmt;

/// Sentinel meaning "no prior match"
pub const NO_PRIOR_MATCH: &str = "0";

/// Id of the most recently processed item
///
/// Ids are decimal snowflakes of varying length, so they are compared
/// numerically rather than as strings. The cursor never moves backwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn new() -> Self {
        Self(NO_PRIOR_MATCH.to_string())
    }

    /// Start from a known id (e.g. `--since-id`)
    pub fn starting_at(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.trim().is_empty() {
            Self::new()
        } else {
            Self(id.trim().to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True until the first match has been seen
    pub fn is_initial(&self) -> bool {
        self.0 == NO_PRIOR_MATCH
    }

    /// Move forward to `id` if it is newer; returns whether the cursor moved
    pub fn advance(&mut self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() || compare_ids(id, &self.0) != Ordering::Greater {
            return false;
        }
        self.0 = id.to_string();
        true
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric comparison for decimal ids of any length; lexicographic otherwise
fn compare_ids(a: &str, b: &str) -> Ordering {
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|c| c.is_ascii_digit());
    if numeric(a) && numeric(b) {
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}
