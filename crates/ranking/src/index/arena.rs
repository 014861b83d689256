//! Append-mostly byte arena holding path entries.
//!
//! Entry layout (little-endian):
//!
//! ```text
//! +-----------+---------+-----------+---------------+
//! | hash: u32 | flags:u8| len: u16  | path bytes... |
//! +-----------+---------+-----------+---------------+
//! ```
//!
//! Removal only sets [`EntryFlags::DEAD`]; the bytes stay until the owning
//! shard compacts.

use bitflags::bitflags;

use crate::error::{allocation_error, RankingError, Result};

pub(super) const HEADER_LEN: usize = 7;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u8 {
        /// The full path is stored; otherwise it is relative to the index's
        /// common prefix.
        const ABSOLUTE = 1 << 0;
        /// Tombstone.
        const DEAD = 1 << 1;
    }
}

/// Borrowed view of one entry.
#[derive(Debug, Clone, Copy)]
pub(super) struct EntryView<'a> {
    pub hash: u32,
    pub flags: EntryFlags,
    pub path: &'a [u8],
}

impl EntryView<'_> {
    pub fn is_live(&self) -> bool {
        !self.flags.contains(EntryFlags::DEAD)
    }

    pub fn is_absolute(&self) -> bool {
        self.flags.contains(EntryFlags::ABSOLUTE)
    }

    fn encoded_len(&self) -> usize {
        HEADER_LEN + self.path.len()
    }
}

#[derive(Debug, Default)]
pub(super) struct Arena {
    bytes: Vec<u8>,
    dead_bytes: usize,
    live_entries: usize,
}

impl Arena {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(capacity)
            .map_err(|e| allocation_error("path arena", e))?;
        Ok(Self {
            bytes,
            dead_bytes: 0,
            live_entries: 0,
        })
    }

    /// Appends an entry and returns its offset. Fails without side effects
    /// when the arena cannot grow.
    pub fn append(&mut self, hash: u32, flags: EntryFlags, path: &[u8]) -> Result<u32> {
        let len = u16::try_from(path.len())
            .map_err(|_| RankingError::InvalidPath(format!("{} bytes exceeds {}", path.len(), u16::MAX)))?;
        let offset = u32::try_from(self.bytes.len())
            .ok()
            .filter(|offset| *offset < u32::MAX)
            .ok_or_else(|| RankingError::Allocation("path arena is full".to_string()))?;
        self.ensure_capacity(HEADER_LEN + path.len())?;

        self.bytes.extend_from_slice(&hash.to_le_bytes());
        self.bytes.push((flags - EntryFlags::DEAD).bits());
        self.bytes.extend_from_slice(&len.to_le_bytes());
        self.bytes.extend_from_slice(path);
        self.live_entries += 1;
        Ok(offset)
    }

    /// Doubles capacity until `additional` more bytes fit.
    fn ensure_capacity(&mut self, additional: usize) -> Result<()> {
        let required = self.bytes.len() + additional;
        if required <= self.bytes.capacity() {
            return Ok(());
        }
        let mut target = self.bytes.capacity().max(HEADER_LEN * 8);
        while target < required {
            target = target.saturating_mul(2);
        }
        self.bytes
            .try_reserve_exact(target - self.bytes.len())
            .map_err(|e| allocation_error("path arena", e))
    }

    /// Reads the entry starting at `offset`, dead or alive.
    pub fn entry(&self, offset: u32) -> Option<EntryView<'_>> {
        let start = usize::try_from(offset).ok()?;
        let header = self.bytes.get(start..start + HEADER_LEN)?;
        let hash = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let flags = EntryFlags::from_bits_truncate(header[4]);
        let len = usize::from(u16::from_le_bytes([header[5], header[6]]));
        let path_start = start + HEADER_LEN;
        let path = self.bytes.get(path_start..path_start + len)?;
        Some(EntryView { hash, flags, path })
    }

    /// Tombstones the entry at `offset`. Returns `false` if it was not live.
    pub fn kill(&mut self, offset: u32) -> bool {
        let Some(entry) = self.entry(offset) else {
            return false;
        };
        if !entry.is_live() {
            return false;
        }
        let encoded = entry.encoded_len();
        if let Some(flags) = self.bytes.get_mut(offset as usize + 4) {
            *flags |= EntryFlags::DEAD.bits();
        }
        self.dead_bytes += encoded;
        self.live_entries -= 1;
        true
    }

    /// Live entries with their offsets, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, EntryView<'_>)> + '_ {
        let mut cursor = 0usize;
        std::iter::from_fn(move || loop {
            let offset = u32::try_from(cursor).ok()?;
            let entry = self.entry(offset)?;
            cursor += entry.encoded_len();
            if entry.is_live() {
                return Some((offset, entry));
            }
        })
    }

    pub fn live_entries(&self) -> usize {
        self.live_entries
    }

    pub fn live_bytes(&self) -> usize {
        self.bytes.len() - self.dead_bytes
    }

    pub fn dead_bytes(&self) -> usize {
        self.dead_bytes
    }

    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Compaction pays off once more than half of the arena is dead.
    pub fn should_compact(&self) -> bool {
        self.dead_bytes > self.bytes.len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let mut arena = Arena::with_capacity(16).unwrap();
        let a = arena.append(7, EntryFlags::ABSOLUTE, b"/etc/hosts").unwrap();
        let b = arena.append(9, EntryFlags::empty(), b"/docs").unwrap();

        let first = arena.entry(a).unwrap();
        assert_eq!(first.hash, 7);
        assert!(first.is_absolute());
        assert_eq!(first.path, b"/etc/hosts");
        assert_eq!(arena.entry(b).unwrap().path, b"/docs");
        assert_eq!(b as usize, HEADER_LEN + 10);
        assert_eq!(arena.live_entries(), 2);
    }

    #[test]
    fn growth_keeps_existing_entries() {
        let mut arena = Arena::with_capacity(0).unwrap();
        let offsets: Vec<u32> = (0..200u32)
            .map(|i| arena.append(i, EntryFlags::ABSOLUTE, format!("/p/{i}").as_bytes()).unwrap())
            .collect();
        for (i, offset) in offsets.into_iter().enumerate() {
            assert_eq!(arena.entry(offset).unwrap().path, format!("/p/{i}").as_bytes());
        }
    }

    #[test]
    fn kill_tombstones_once() {
        let mut arena = Arena::with_capacity(64).unwrap();
        let a = arena.append(1, EntryFlags::ABSOLUTE, b"/a").unwrap();
        arena.append(2, EntryFlags::ABSOLUTE, b"/b").unwrap();

        assert!(arena.kill(a));
        assert!(!arena.kill(a));
        assert_eq!(arena.dead_bytes(), HEADER_LEN + 2);
        assert_eq!(arena.live_entries(), 1);
        let live: Vec<_> = arena.iter().map(|(_, e)| e.path.to_vec()).collect();
        assert_eq!(live, vec![b"/b".to_vec()]);
    }

    #[test]
    fn compaction_threshold_is_half() {
        let mut arena = Arena::with_capacity(64).unwrap();
        let a = arena.append(1, EntryFlags::ABSOLUTE, b"/x").unwrap();
        let b = arena.append(2, EntryFlags::ABSOLUTE, b"/y").unwrap();
        arena.kill(a);
        assert!(!arena.should_compact());
        arena.kill(b);
        assert!(arena.should_compact());
    }

    #[test]
    fn over_long_path_is_rejected() {
        let mut arena = Arena::with_capacity(0).unwrap();
        let long = vec![b'a'; usize::from(u16::MAX) + 1];
        assert!(matches!(
            arena.append(1, EntryFlags::ABSOLUTE, &long),
            Err(RankingError::InvalidPath(_))
        ));
        assert_eq!(arena.len_bytes(), 0);
    }
}
