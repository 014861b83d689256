use std::cmp::Ordering;

use crate::registry::SlotId;
use crate::score::Score;

/// Storage address of a candidate inside one container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub sheet: u16,
    pub item: u16,
}

/// One scored candidate. The payload lives beside it in the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCandidate {
    pub relevancy: Score,
    /// Producer-chosen deduplication key.
    pub identity: u32,
    pub location: Location,
    pub factory: SlotId,
    pub release: Option<SlotId>,
}

impl MatchCandidate {
    /// Result order: relevancy descending, then identity, then storage order.
    pub fn rank_cmp(a: &Self, b: &Self) -> Ordering {
        b.relevancy
            .cmp(&a.relevancy)
            .then(a.identity.cmp(&b.identity))
            .then(a.location.cmp(&b.location))
    }
}
