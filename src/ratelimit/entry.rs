//! Unit entries and their discriminators.

use std::fmt;

/// One admitted unit of consumption for a key.
///
/// Entries are ordered by timestamp first, so a sorted collection of them can
/// be pruned by splitting at a cutoff. `index` and `nonce` only exist to keep
/// entries that share a timestamp distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitEntry {
    /// Admission time in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Position of this unit within its admitting batch (or a per-key sequence)
    pub index: u64,
    /// Random value shared by every unit of one admitting call
    pub nonce: u64,
}

impl UnitEntry {
    /// Create an entry.
    pub fn new(timestamp_ms: u64, index: u64, nonce: u64) -> Self {
        Self {
            timestamp_ms,
            index,
            nonce,
        }
    }

    /// The smallest possible entry at `timestamp_ms`.
    ///
    /// Every entry with the same or a later timestamp compares greater or equal.
    pub fn floor(timestamp_ms: u64) -> Self {
        Self::new(timestamp_ms, 0, 0)
    }

    /// Render the entry as a sorted-set member.
    pub fn member(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UnitEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.timestamp_ms, self.index, self.nonce)
    }
}

/// Draw the random nonce for one admitting call.
pub fn batch_nonce() -> u64 {
    rand::random()
}

/// Earliest timestamp that is still live at `now_ms` for a window of `window_ms`.
///
/// Entries strictly older than this are expired.
pub fn live_cutoff(now_ms: u64, window_ms: u64) -> u64 {
    now_ms.saturating_sub(window_ms)
}
