//! Fixed-capacity page of candidates.

use std::mem;

use super::record::MatchCandidate;
use super::SHEET_CAPACITY;
use crate::error::{allocation_error, Result};
use crate::registry::Payload;

const LIVE_WORDS: usize = SHEET_CAPACITY.div_ceil(64);

/// Records and payloads are parallel arrays; a slot is live while its bit is
/// set in `live`, and only live slots own a payload.
pub(super) struct ResultSheet {
    records: Vec<MatchCandidate>,
    payloads: Vec<Option<Payload>>,
    live: [u64; LIVE_WORDS],
}

impl ResultSheet {
    /// Allocates a sheet, reporting allocation failure instead of aborting.
    pub(super) fn try_new() -> Result<Self> {
        let mut records = Vec::new();
        records
            .try_reserve_exact(SHEET_CAPACITY)
            .map_err(|e| allocation_error("result sheet records", e))?;
        let mut payloads = Vec::new();
        payloads
            .try_reserve_exact(SHEET_CAPACITY)
            .map_err(|e| allocation_error("result sheet payloads", e))?;
        Ok(Self {
            records,
            payloads,
            live: [0; LIVE_WORDS],
        })
    }

    /// Slots used so far, live or consumed.
    pub(super) fn len(&self) -> usize {
        self.records.len()
    }

    pub(super) fn is_full(&self) -> bool {
        self.records.len() >= SHEET_CAPACITY
    }

    /// Appends a candidate whose location already names the next slot.
    /// Hands the payload back when the sheet is full.
    pub(super) fn push(
        &mut self,
        candidate: MatchCandidate,
        payload: Payload,
    ) -> std::result::Result<(), Payload> {
        if self.is_full() {
            return Err(payload);
        }
        let item = self.records.len();
        self.records.push(candidate);
        self.payloads.push(Some(payload));
        self.set_live(item, true);
        Ok(())
    }

    /// The candidate at `item`, if it has not been consumed.
    pub(super) fn get(&self, item: u16) -> Option<&MatchCandidate> {
        let item = usize::from(item);
        if self.is_live(item) {
            self.records.get(item)
        } else {
            None
        }
    }

    /// Overwrites a live slot and returns its previous occupant. A consumed
    /// slot is left alone and the payload is handed back.
    pub(super) fn replace(
        &mut self,
        item: u16,
        candidate: MatchCandidate,
        payload: Payload,
    ) -> std::result::Result<(MatchCandidate, Payload), Payload> {
        let index = usize::from(item);
        if !self.is_live(index) {
            return Err(payload);
        }
        let (Some(record), Some(slot)) = (self.records.get_mut(index), self.payloads.get_mut(index))
        else {
            return Err(payload);
        };
        let Some(previous_payload) = slot.take() else {
            return Err(payload);
        };
        *slot = Some(payload);
        Ok((mem::replace(record, candidate), previous_payload))
    }

    /// Consumes the slot at `item`, returning its candidate and payload.
    pub(super) fn take(&mut self, item: u16) -> Option<(MatchCandidate, Payload)> {
        let index = usize::from(item);
        if !self.is_live(index) {
            return None;
        }
        let payload = self.payloads.get_mut(index)?.take()?;
        self.set_live(index, false);
        Some((*self.records.get(index)?, payload))
    }

    /// Live candidates in storage order.
    pub(super) fn live(&self) -> impl Iterator<Item = &MatchCandidate> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(index, _)| self.is_live(*index))
            .map(|(_, record)| record)
    }

    /// Consumes every live slot.
    pub(super) fn drain(&mut self) -> Vec<(MatchCandidate, Payload)> {
        let mut drained = Vec::new();
        for (index, (record, payload)) in self.records.iter().zip(&mut self.payloads).enumerate() {
            if let Some(payload) = payload.take() {
                drained.push((*record, payload));
            }
            let (word, bit) = (index / 64, index % 64);
            if let Some(word) = self.live.get_mut(word) {
                *word &= !(1u64 << bit);
            }
        }
        drained
    }

    #[inline]
    fn is_live(&self, index: usize) -> bool {
        self.live
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    #[inline]
    fn set_live(&mut self, index: usize, live: bool) {
        if let Some(word) = self.live.get_mut(index / 64) {
            let mask = 1u64 << (index % 64);
            if live {
                *word |= mask;
            } else {
                *word &= !mask;
            }
        }
    }
}
