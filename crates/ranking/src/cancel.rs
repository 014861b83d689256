//! Generation tracking for cooperative query cancellation.
//!
//! Every query round gets a fresh generation id from the dispatcher's
//! [`GenerationTracker`]. Producers hold a [`CancellationToken`] for the
//! generation they were started with and compare it against the tracker's
//! current value while they work. A newer generation means the user typed
//! another key: the producer stops inserting and returns.
//!
//! ## Sparse Checking
//!
//! For tight loops over millions of paths, `is_cancelled_sparse()` only reads
//! the counter every `CANCEL_CHECK_INTERVAL` iterations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How often long-running loops should check whether their generation is stale.
/// Using a power of 2 allows efficient modulo via bitwise AND.
pub const CANCEL_CHECK_INTERVAL: usize = 0x1000; // 4,096

/// Dispatcher-held, monotonically increasing generation counter.
#[derive(Debug, Clone, Default)]
pub struct GenerationTracker {
    current: Arc<AtomicU64>,
}

impl GenerationTracker {
    /// Creates a tracker starting at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the current generation and returns the new value.
    ///
    /// Every token created for an older generation becomes stale.
    pub fn next_generation(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the current generation without incrementing.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Creates a token for `generation` that shares this tracker's counter.
    pub fn token(&self, generation: u64) -> CancellationToken {
        CancellationToken {
            current: Some(self.current.clone()),
            generation,
        }
    }
}

/// Staleness check for one query generation.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    /// Shared counter; `None` for tokens that never cancel.
    current: Option<Arc<AtomicU64>>,
    /// The generation this token was created with.
    generation: u64,
}

impl CancellationToken {
    /// Creates a token that is never cancelled.
    ///
    /// Useful for tests or one-off callers that are not tied to a dispatcher.
    #[inline]
    pub fn never() -> Self {
        Self {
            current: None,
            generation: 0,
        }
    }

    /// Returns the generation this token was created for.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` once the tracker has moved past this token's generation.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        match &self.current {
            Some(current) => current.load(Ordering::Relaxed) != self.generation,
            None => false,
        }
    }

    /// Sparse variant of [`is_cancelled`](Self::is_cancelled): only reads the
    /// counter when `counter` is a multiple of `CANCEL_CHECK_INTERVAL`.
    #[inline]
    pub fn is_cancelled_sparse(&self, counter: usize) -> bool {
        counter & (CANCEL_CHECK_INTERVAL - 1) == 0 && self.is_cancelled()
    }
}

impl Default for CancellationToken {
    /// Default creates a token that is never cancelled.
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_token_is_never_cancelled() {
        let token = CancellationToken::never();
        assert!(!token.is_cancelled());
        assert!(!CancellationToken::default().is_cancelled());
    }

    #[test]
    fn newer_generation_cancels_older_tokens() {
        let tracker = GenerationTracker::new();
        let first = tracker.next_generation();
        let token = tracker.token(first);
        assert!(!token.is_cancelled());

        let second = tracker.next_generation();
        assert_eq!(second, first + 1);
        assert!(token.is_cancelled());
        assert!(!tracker.token(second).is_cancelled());
    }

    #[test]
    fn sparse_check_skips_off_interval_counters() {
        let tracker = GenerationTracker::new();
        let token = tracker.token(tracker.next_generation());
        tracker.next_generation();

        assert!(token.is_cancelled_sparse(0));
        assert!(!token.is_cancelled_sparse(1));
        assert!(token.is_cancelled_sparse(CANCEL_CHECK_INTERVAL));
    }

    #[test]
    fn clones_share_the_counter() {
        let tracker = GenerationTracker::new();
        let clone = tracker.clone();
        let token = tracker.token(tracker.next_generation());
        clone.next_generation();
        assert!(token.is_cancelled());
    }
}
