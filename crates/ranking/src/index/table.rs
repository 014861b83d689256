//! Open-addressed hash index from path hash to arena offset.
//!
//! Linear probing over a power-of-two slot array. Deletion shifts the rest
//! of the probe run back instead of leaving tombstones, so lookups never
//! walk past an empty slot.

use crate::error::{allocation_error, Result};

const EMPTY: u32 = u32::MAX;
const MIN_SLOTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    hash: u32,
    offset: u32,
}

impl Slot {
    const VACANT: Self = Self {
        hash: 0,
        offset: EMPTY,
    };

    #[inline]
    fn is_empty(&self) -> bool {
        self.offset == EMPTY
    }
}

#[derive(Debug, Default)]
pub(super) struct HashTable {
    slots: Vec<Slot>,
    len: usize,
}

impl HashTable {
    /// Creates a table with at least `slots` slots (rounded up to a power of
    /// two).
    pub fn with_slots(slots: usize) -> Result<Self> {
        Ok(Self {
            slots: Self::allocate(slots.max(MIN_SLOTS).next_power_of_two())?,
            len: 0,
        })
    }

    /// Table sized so `entries` stay below the resize threshold.
    pub fn for_entries(entries: usize) -> Result<Self> {
        Self::with_slots(entries.saturating_mul(4) / 3 + 1)
    }

    fn allocate(capacity: usize) -> Result<Vec<Slot>> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|e| allocation_error("path hash index", e))?;
        slots.resize(capacity, Slot::VACANT);
        Ok(slots)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.slots.len().wrapping_sub(1)
    }

    #[inline]
    fn ideal(&self, hash: u32) -> usize {
        hash as usize & self.mask()
    }

    /// Makes room for `additional` more entries, resizing once occupancy
    /// would cross 0.75. The grown table is built before the old one is
    /// replaced.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let needed = self.len + additional;
        if !self.slots.is_empty() && needed * 4 <= self.slots.len() * 3 {
            return Ok(());
        }
        let mut capacity = self.slots.len().max(MIN_SLOTS);
        while needed * 4 > capacity * 3 {
            capacity *= 2;
        }
        if capacity == self.slots.len() {
            return Ok(());
        }

        let mut grown = Self {
            slots: Self::allocate(capacity)?,
            len: 0,
        };
        for slot in self.slots.iter().filter(|slot| !slot.is_empty()) {
            grown.place(slot.hash, slot.offset);
        }
        log::debug!(
            "path hash index resized entries={} slots={}->{}",
            self.len,
            self.slots.len(),
            capacity
        );
        *self = grown;
        Ok(())
    }

    /// Inserts without checking for duplicates.
    pub fn insert(&mut self, hash: u32, offset: u32) -> Result<()> {
        self.reserve(1)?;
        self.place(hash, offset);
        Ok(())
    }

    /// Stores an entry in a table that already has room for it.
    pub fn place(&mut self, hash: u32, offset: u32) {
        let mask = self.mask();
        let mut index = self.ideal(hash);
        for _ in 0..self.slots.len() {
            if let Some(slot) = self.slots.get_mut(index) {
                if slot.is_empty() {
                    *slot = Slot { hash, offset };
                    self.len += 1;
                    return;
                }
            }
            index = (index + 1) & mask;
        }
    }

    fn find_index(&self, hash: u32, mut matches: impl FnMut(u32) -> bool) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.mask();
        let mut index = self.ideal(hash);
        for _ in 0..self.slots.len() {
            let slot = self.slots.get(index)?;
            if slot.is_empty() {
                return None;
            }
            if slot.hash == hash && matches(slot.offset) {
                return Some(index);
            }
            index = (index + 1) & mask;
        }
        None
    }

    /// Offset of the first entry with `hash` accepted by `matches`.
    pub fn find(&self, hash: u32, matches: impl FnMut(u32) -> bool) -> Option<u32> {
        self.find_index(hash, matches)
            .and_then(|index| self.slots.get(index))
            .map(|slot| slot.offset)
    }

    /// Removes the first entry with `hash` accepted by `matches` and returns
    /// its offset.
    pub fn remove(&mut self, hash: u32, matches: impl FnMut(u32) -> bool) -> Option<u32> {
        let mut hole = self.find_index(hash, matches)?;
        let removed = self.slots.get(hole)?.offset;
        let mask = self.mask();

        let mut next = (hole + 1) & mask;
        loop {
            let Some(slot) = self.slots.get(next).copied() else {
                break;
            };
            if slot.is_empty() {
                break;
            }
            let ideal = self.ideal(slot.hash);
            // Distance from the ideal slot, wrapping around the end.
            let to_hole = hole.wrapping_sub(ideal) & mask;
            let to_next = next.wrapping_sub(ideal) & mask;
            if to_hole < to_next {
                self.slots[hole] = slot;
                hole = next;
            }
            next = (next + 1) & mask;
        }
        self.slots[hole] = Slot::VACANT;
        self.len -= 1;
        Some(removed)
    }
}
