//! One independently locked partition of the path index.

use super::arena::{Arena, EntryFlags, EntryView};
use super::table::HashTable;
use crate::error::Result;

/// Arena plus hash index. Callers hold the shard lock around every method.
#[derive(Debug, Default)]
pub(super) struct ShardStore {
    arena: Arena,
    table: HashTable,
}

impl ShardStore {
    pub fn new(arena_bytes: usize, slots: usize) -> Result<Self> {
        Ok(Self {
            arena: Arena::with_capacity(arena_bytes)?,
            table: HashTable::with_slots(slots)?,
        })
    }

    pub fn len(&self) -> usize {
        self.arena.live_entries()
    }

    fn same_entry(arena: &Arena, offset: u32, flags: EntryFlags, stored: &[u8]) -> bool {
        arena.entry(offset).is_some_and(|entry| {
            entry.is_live()
                && entry.is_absolute() == flags.contains(EntryFlags::ABSOLUTE)
                && entry.path == stored
        })
    }

    /// Offset of the entry equal to (`hash`, `stored`).
    pub fn find(&self, hash: u32, flags: EntryFlags, stored: &[u8]) -> Option<u32> {
        self.table
            .find(hash, |offset| Self::same_entry(&self.arena, offset, flags, stored))
    }

    /// Adds an entry unless an equal one exists. Returns whether it was new.
    /// Nothing changes when growth fails.
    pub fn insert(&mut self, hash: u32, flags: EntryFlags, stored: &[u8]) -> Result<bool> {
        if self.find(hash, flags, stored).is_some() {
            return Ok(false);
        }
        self.table.reserve(1)?;
        let offset = self.arena.append(hash, flags, stored)?;
        self.table.place(hash, offset);
        Ok(true)
    }

    /// Removes the entry equal to (`hash`, `stored`).
    pub fn remove(&mut self, hash: u32, flags: EntryFlags, stored: &[u8]) -> bool {
        let arena = &self.arena;
        let Some(offset) = self
            .table
            .remove(hash, |offset| Self::same_entry(arena, offset, flags, stored))
        else {
            return false;
        };
        self.arena.kill(offset);
        self.maybe_compact();
        true
    }

    /// Removes every live entry accepted by `matches`: offsets are collected
    /// first, then removed.
    pub fn remove_where(&mut self, mut matches: impl FnMut(&EntryView<'_>) -> bool) -> usize {
        let doomed: Vec<(u32, u32)> = self
            .arena
            .iter()
            .filter(|(_, entry)| matches(entry))
            .map(|(offset, entry)| (entry.hash, offset))
            .collect();

        for &(hash, offset) in &doomed {
            self.table.remove(hash, |candidate| candidate == offset);
            self.arena.kill(offset);
        }
        if !doomed.is_empty() {
            self.maybe_compact();
        }
        doomed.len()
    }

    /// Live entries with their offsets.
    pub fn entries(&self) -> impl Iterator<Item = (u32, EntryView<'_>)> + '_ {
        self.arena.iter()
    }

    /// Resolves a previously handed out (`hash`, `offset`) pair. An entry is
    /// only returned when it is live, carries `hash` and passes `verify`. The
    /// offset is tried first; after compaction moved it, the live entries
    /// stored under `hash` are tried instead.
    pub fn resolve(
        &self,
        hash: u32,
        offset: u32,
        mut verify: impl FnMut(&EntryView<'_>) -> bool,
    ) -> Option<EntryView<'_>> {
        let arena = &self.arena;
        let mut accept = |offset: u32| {
            arena
                .entry(offset)
                .is_some_and(|entry| entry.is_live() && entry.hash == hash && verify(&entry))
        };
        if accept(offset) {
            return arena.entry(offset);
        }
        let offset = self.table.find(hash, accept)?;
        arena.entry(offset)
    }

    fn maybe_compact(&mut self) {
        if !self.arena.should_compact() {
            return;
        }
        let before = self.arena.len_bytes();
        let dead = self.arena.dead_bytes();
        match self.compact() {
            Ok(()) => log::debug!(
                "path shard compacted entries={} dead={} bytes={}->{}",
                self.len(),
                dead,
                before,
                self.arena.len_bytes()
            ),
            Err(e) => log::debug!("path shard compaction skipped error={}", e),
        }
    }

    /// Rebuilds arena and hash index from live entries, then swaps them in.
    pub fn compact(&mut self) -> Result<()> {
        let mut arena = Arena::with_capacity(self.arena.live_bytes())?;
        let mut table = HashTable::for_entries(self.arena.live_entries())?;
        for (_, entry) in self.arena.iter() {
            let offset = arena.append(entry.hash, entry.flags, entry.path)?;
            table.insert(entry.hash, offset)?;
        }
        self.arena = arena;
        self.table = table;
        Ok(())
    }

    /// Drops every entry and releases the storage.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
