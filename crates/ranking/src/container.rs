//! Per-query aggregation of scored candidates.
//!
//! This module provides:
//! - [`MatchCandidate`], the fixed-width record stored per candidate
//! - Fixed-capacity result sheets with a liveness bitmap
//! - [`ResultContainer`], the deduplicating, lazily materializing container
//!   every producer of a query round inserts into

mod record;
mod result_container;
mod sheet;

pub use record::{Location, MatchCandidate};
pub use result_container::ResultContainer;

/// Candidate slots per sheet.
pub const SHEET_CAPACITY: usize = 512;

/// Default bound on the number of sheets one container may allocate.
pub const MAX_SHEETS: usize = 256;
