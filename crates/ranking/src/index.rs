//! Sharded in-memory path index.
//!
//! This module provides:
//! - A byte arena of length-prefixed path entries per shard
//! - An open-addressed hash index over each arena
//! - [`PathIndex`], which routes paths to shards by hash and scans shards
//!   into a [`ResultContainer`](crate::container::ResultContainer)
//! - [`PathMaterializer`], which turns scanned entries back into paths

mod arena;
mod manager;
mod materialize;
mod shard;
mod table;

pub use manager::PathIndex;
pub use materialize::{PathMaterializer, PathRef, ROOT_PATH};

use xxhash_rust::xxh3::xxh3_64;

use crate::cancel::CANCEL_CHECK_INTERVAL;

/// Entries scanned between two cancellation checks.
pub const SCAN_CANCEL_INTERVAL: usize = CANCEL_CHECK_INTERVAL;

/// Full 64-bit XXH3 of an absolute path. Scan payloads carry it so a
/// materialized entry is checked against more than its 32-bit hash.
#[inline]
pub fn fingerprint_path(path: &str) -> u64 {
    xxh3_64(path.as_bytes())
}

/// 32-bit path hash used for shard routing and as the candidate identity.
#[inline]
pub fn hash_path(path: &str) -> u32 {
    // Truncation keeps the low half, which is as well mixed as the rest.
    fingerprint_path(path) as u32
}

/// Counters for one shard scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Live entries visited.
    pub scanned: usize,
    /// Candidates handed to the container.
    pub inserted: usize,
}

/// How a shard scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Every entry was visited.
    Completed(ScanStats),
    /// The container's generation went stale.
    Cancelled(ScanStats),
    /// The container refused further candidates.
    Saturated(ScanStats),
}

impl ScanOutcome {
    pub fn stats(&self) -> ScanStats {
        match *self {
            Self::Completed(stats) | Self::Cancelled(stats) | Self::Saturated(stats) => stats,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn is_saturated(&self) -> bool {
        matches!(self, Self::Saturated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(hash_path("/a/b/c"), hash_path("/a/b/c"));
        assert_ne!(hash_path("/a/b/c"), hash_path("/a/b/d"));
    }

    #[test]
    fn outcome_exposes_stats() {
        let stats = ScanStats {
            scanned: 4,
            inserted: 2,
        };
        assert_eq!(ScanOutcome::Saturated(stats).stats(), stats);
        assert!(ScanOutcome::Cancelled(stats).is_cancelled());
        assert!(!ScanOutcome::Completed(stats).is_saturated());
    }
}
