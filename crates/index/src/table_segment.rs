//! One independently locked partition of the table.
//!
//! A table-segment owns a single [`Arena`] and an array of bucket heads. Each
//! bucket is a singly linked chain of entries living in the arena:
//!
//! ```text
//! [next: u32][hash: u64][key_len: u16][value: V::SERIALIZED_SIZE][key: key_len]
//! ```
//!
//! `next` is an arena offset, [`NIL`] ends the chain. The full hash is kept so
//! that resizing relinks entries without rehashing keys.

use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::arena::{Addr, Arena, NIL};
use crate::codec::ValueCodec;
use crate::error::IndexError;
use crate::stats::SegmentStats;

const NEXT: usize = 0;
const HASH: usize = 4;
const KEY_LEN: usize = 12;
pub(crate) const ENTRY_HEADER: usize = 14;

/// Hard ceiling for one bucket array.
const MAX_BUCKETS: usize = 1 << 30;

pub(crate) struct TableSegment<V> {
    index: usize,
    arena: Arena,
    buckets: Vec<u32>,
    entries: usize,
    load_factor: f32,
    rehashes: u64,
    defragmentations: u64,
    _value: PhantomData<V>,
}

impl<V: ValueCodec> TableSegment<V> {
    /// `buckets` must be a power of two.
    pub(crate) fn new(index: usize, buckets: usize, arena_bytes: usize, load_factor: f32) -> Self {
        Self {
            index,
            arena: Arena::new(index as u32, arena_bytes),
            buckets: vec![NIL; buckets],
            entries: 0,
            load_factor,
            rehashes: 0,
            defragmentations: 0,
            _value: PhantomData,
        }
    }

    fn entry_len(key_len: usize) -> usize {
        ENTRY_HEADER + V::SERIALIZED_SIZE + key_len
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn addr(&self, offset: u32) -> Addr {
        Addr {
            arena: self.arena.id(),
            offset,
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> IndexError {
        IndexError::Corrupt {
            segment: self.index,
            reason: reason.into(),
        }
    }

    fn check_live(&self) -> Result<(), IndexError> {
        if self.arena.is_released() {
            return Err(IndexError::Released);
        }
        Ok(())
    }

    /// Returns `(next, hash, key_len)` of the entry at `offset`.
    fn read_header(&self, offset: u32) -> Result<(u32, u64, usize), IndexError> {
        let h = self.arena.bytes(self.addr(offset), ENTRY_HEADER)?;
        Ok((
            LittleEndian::read_u32(&h[NEXT..NEXT + 4]),
            LittleEndian::read_u64(&h[HASH..HASH + 8]),
            LittleEndian::read_u16(&h[KEY_LEN..KEY_LEN + 2]) as usize,
        ))
    }

    fn set_next(&mut self, offset: u32, next: u32) -> Result<(), IndexError> {
        let addr = self.addr(offset);
        let h = self.arena.bytes_mut(addr, 4)?;
        LittleEndian::write_u32(h, next);
        Ok(())
    }

    fn value_at(&self, offset: u32) -> Result<V, IndexError> {
        let addr = self.addr(offset + ENTRY_HEADER as u32);
        Ok(V::decode(self.arena.bytes(addr, V::SERIALIZED_SIZE)?))
    }

    fn write_value(&mut self, offset: u32, value: &V) -> Result<(), IndexError> {
        let addr = self.addr(offset + ENTRY_HEADER as u32);
        value.encode(self.arena.bytes_mut(addr, V::SERIALIZED_SIZE)?);
        Ok(())
    }

    fn key_at(&self, offset: u32, key_len: usize) -> Result<&[u8], IndexError> {
        let addr = self.addr(offset + (ENTRY_HEADER + V::SERIALIZED_SIZE) as u32);
        self.arena.bytes(addr, key_len)
    }

    /// Locates `key`, returning `(previous, current)` chain offsets.
    fn find(&self, hash: u64, key: &[u8]) -> Result<Option<(u32, u32)>, IndexError> {
        let mut prev = NIL;
        let mut cur = self.buckets[self.bucket_of(hash)];
        let mut steps = 0usize;

        while cur != NIL {
            steps += 1;
            if steps > self.entries {
                return Err(self.corrupt("chain longer than the entry count"));
            }
            let (next, entry_hash, key_len) = self.read_header(cur)?;
            if entry_hash == hash && key_len == key.len() && self.key_at(cur, key_len)? == key {
                return Ok(Some((prev, cur)));
            }
            prev = cur;
            cur = next;
        }
        Ok(None)
    }

    pub(crate) fn get(&self, hash: u64, key: &[u8]) -> Result<Option<V>, IndexError> {
        self.check_live()?;
        match self.find(hash, key)? {
            Some((_, cur)) => self.value_at(cur).map(Some),
            None => Ok(None),
        }
    }

    /// Inserts or overwrites, returning the previous value.
    pub(crate) fn put(&mut self, hash: u64, key: &[u8], value: &V) -> Result<Option<V>, IndexError> {
        self.check_live()?;
        if let Some((_, cur)) = self.find(hash, key)? {
            let old = self.value_at(cur)?;
            self.write_value(cur, value)?;
            return Ok(Some(old));
        }

        let len = Self::entry_len(key.len());
        // Allocation may defragment and rebuild chains, so read the head after it.
        let offset = self.allocate(len)?;
        let bucket = self.bucket_of(hash);
        let head = self.buckets[bucket];
        let addr = self.addr(offset);
        let entry = self.arena.bytes_mut(addr, len)?;
        LittleEndian::write_u32(&mut entry[NEXT..NEXT + 4], head);
        LittleEndian::write_u64(&mut entry[HASH..HASH + 8], hash);
        LittleEndian::write_u16(&mut entry[KEY_LEN..KEY_LEN + 2], key.len() as u16);
        value.encode(&mut entry[ENTRY_HEADER..ENTRY_HEADER + V::SERIALIZED_SIZE]);
        entry[ENTRY_HEADER + V::SERIALIZED_SIZE..].copy_from_slice(key);
        self.buckets[bucket] = offset;
        self.entries += 1;

        if self.needs_resize() {
            self.resize()?;
        }
        Ok(None)
    }

    /// Overwrites the value only if it currently equals `expected`.
    pub(crate) fn replace(
        &mut self,
        hash: u64,
        key: &[u8],
        expected: &V,
        value: &V,
    ) -> Result<bool, IndexError> {
        self.check_live()?;
        let Some((_, cur)) = self.find(hash, key)? else {
            return Ok(false);
        };
        if self.value_at(cur)? != *expected {
            return Ok(false);
        }
        self.write_value(cur, value)?;
        Ok(true)
    }

    pub(crate) fn remove(&mut self, hash: u64, key: &[u8]) -> Result<Option<V>, IndexError> {
        self.check_live()?;
        let Some((prev, cur)) = self.find(hash, key)? else {
            return Ok(None);
        };
        let (next, _, key_len) = self.read_header(cur)?;
        let old = self.value_at(cur)?;
        if prev == NIL {
            let bucket = self.bucket_of(hash);
            self.buckets[bucket] = next;
        } else {
            self.set_next(prev, next)?;
        }
        let addr = self.addr(cur);
        self.arena.free(addr, Self::entry_len(key_len) as u32)?;
        self.entries -= 1;
        Ok(Some(old))
    }

    /// Visits every entry as `(key, value)`.
    pub(crate) fn for_each<F>(&self, f: &mut F) -> Result<(), IndexError>
    where
        F: FnMut(&[u8], &V),
    {
        self.check_live()?;
        let mut visited = 0usize;
        for &head in &self.buckets {
            let mut cur = head;
            while cur != NIL {
                visited += 1;
                if visited > self.entries {
                    return Err(self.corrupt("more chained entries than recorded"));
                }
                let (next, _, key_len) = self.read_header(cur)?;
                let value = self.value_at(cur)?;
                f(self.key_at(cur, key_len)?, &value);
                cur = next;
            }
        }
        Ok(())
    }

    fn allocate(&mut self, len: usize) -> Result<u32, IndexError> {
        if let Some(addr) = self.arena.alloc(len as u32)? {
            return Ok(addr.offset);
        }

        let free = self.arena.free_bytes();
        if free >= len && free * 2 >= self.arena.capacity() {
            self.defragment(len)?;
        } else {
            self.arena.grow(self.arena.allocated() + len)?;
        }

        match self.arena.alloc(len as u32)? {
            Some(addr) => Ok(addr.offset),
            None => Err(self.corrupt("allocation failed after growing the arena")),
        }
    }

    /// Copies every live entry into a fresh arena, dropping free-list holes.
    fn defragment(&mut self, headroom: usize) -> Result<(), IndexError> {
        let capacity = self
            .arena
            .capacity()
            .max(self.arena.live_bytes() + headroom);
        let mut fresh = Arena::new(self.arena.id(), capacity);
        let mut buckets = vec![NIL; self.buckets.len()];

        for bucket in 0..self.buckets.len() {
            let mut cur = self.buckets[bucket];
            while cur != NIL {
                let (next, _, key_len) = self.read_header(cur)?;
                let len = Self::entry_len(key_len);
                let Some(dst_addr) = fresh.alloc(len as u32)? else {
                    return Err(self.corrupt("defragmented entries overflow the new arena"));
                };
                let src = self.arena.bytes(self.addr(cur), len)?;
                let dst = fresh.bytes_mut(dst_addr, len)?;
                dst.copy_from_slice(src);
                LittleEndian::write_u32(&mut dst[NEXT..NEXT + 4], buckets[bucket]);
                buckets[bucket] = dst_addr.offset;
                cur = next;
            }
        }

        debug!(
            segment = self.index,
            reclaimed = self.arena.free_bytes(),
            capacity = fresh.capacity(),
            "table segment defragmented"
        );
        self.arena = fresh;
        self.buckets = buckets;
        self.defragmentations += 1;
        Ok(())
    }

    fn needs_resize(&self) -> bool {
        self.buckets.len() < MAX_BUCKETS
            && self.entries as f64 > self.buckets.len() as f64 * f64::from(self.load_factor)
    }

    /// Doubles the bucket array and relinks every entry by its stored hash.
    fn resize(&mut self) -> Result<(), IndexError> {
        let len = self.buckets.len() * 2;
        let mask = len - 1;
        let mut buckets = vec![NIL; len];
        let mut moved = 0usize;

        for bucket in 0..self.buckets.len() {
            let mut cur = self.buckets[bucket];
            while cur != NIL {
                moved += 1;
                if moved > self.entries {
                    return Err(self.corrupt("cycle detected while rehashing"));
                }
                let (next, hash, _) = self.read_header(cur)?;
                let target = (hash as usize) & mask;
                self.set_next(cur, buckets[target])?;
                buckets[target] = cur;
                cur = next;
            }
        }

        self.buckets = buckets;
        self.rehashes += 1;
        debug!(
            segment = self.index,
            buckets = len,
            entries = self.entries,
            "table segment resized"
        );
        Ok(())
    }

    /// Tears down the arena and the bucket array.
    pub(crate) fn release(&mut self) {
        self.arena.release();
        self.buckets = vec![NIL; 1];
        self.entries = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
    }

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }

    pub(crate) fn stats(&self) -> SegmentStats {
        SegmentStats {
            entries: self.entries,
            buckets: self.buckets.len(),
            arena_capacity: self.arena.capacity(),
            arena_live_bytes: self.arena.live_bytes(),
            arena_free_bytes: self.arena.free_bytes(),
            rehashes: self.rehashes,
            defragmentations: self.defragmentations,
        }
    }
}
