//! Explicitly managed memory regions backing the table-segments.
//!
//! An [`Arena`] is one contiguous, fixed-capacity byte region. Entries are
//! addressed by [`Addr`] (arena id + byte offset) instead of pointers, and
//! every access is checked against the allocated extent. Memory is returned
//! only through [`Arena::free`] (to an exact-size free list) or torn down as a
//! whole by [`Arena::release`].

use std::collections::HashMap;

use crate::error::IndexError;

/// Sentinel offset terminating a chain.
pub const NIL: u32 = u32::MAX;

/// Largest region an arena may hold. Offsets are `u32` and `NIL` is reserved.
pub const MAX_ARENA_BYTES: usize = (u32::MAX - 1) as usize;

/// Smallest region handed out by [`Arena::new`].
const MIN_ARENA_BYTES: usize = 64;

/// Location of an allocation inside a specific arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr {
    pub arena: u32,
    pub offset: u32,
}

/// A bump-allocated byte region with exact-size free lists.
pub struct Arena {
    id: u32,
    region: Box<[u8]>,
    /// End of the allocated extent. Bytes past `top` were never handed out.
    top: usize,
    /// Freed allocations keyed by their length.
    free: HashMap<u32, Vec<u32>>,
    free_bytes: usize,
    released: bool,
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id)
            .field("capacity", &self.region.len())
            .field("allocated", &self.top)
            .field("free_bytes", &self.free_bytes)
            .field("released", &self.released)
            .finish()
    }
}

impl Arena {
    /// Allocates a zeroed region of at least `capacity` bytes.
    pub fn new(id: u32, capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_ARENA_BYTES, MAX_ARENA_BYTES);
        Self {
            id,
            region: vec![0u8; capacity].into_boxed_slice(),
            top: 0,
            free: HashMap::new(),
            free_bytes: 0,
            released: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Total size of the region in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes between the start of the region and the bump pointer.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.top
    }

    /// Bytes sitting on free lists.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Bytes held by live allocations.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.top - self.free_bytes
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The allocated extent, for hashing bytes in place.
    pub fn region(&self) -> Result<&[u8], IndexError> {
        self.check_live()?;
        Ok(&self.region[..self.top])
    }

    /// Carves `len` bytes out of the arena.
    ///
    /// An exact-size free slot is reused first, then the bump region. Returns
    /// `Ok(None)` when neither has room; the caller decides whether to grow or
    /// defragment.
    pub fn alloc(&mut self, len: u32) -> Result<Option<Addr>, IndexError> {
        self.check_live()?;

        if let Some(offset) = self.free.get_mut(&len).and_then(Vec::pop) {
            self.free_bytes -= len as usize;
            return Ok(Some(Addr {
                arena: self.id,
                offset,
            }));
        }

        let end = self.top + len as usize;
        if end > self.region.len() {
            return Ok(None);
        }
        let offset = self.top as u32;
        self.top = end;
        Ok(Some(Addr {
            arena: self.id,
            offset,
        }))
    }

    /// Returns an allocation of `len` bytes to the free list.
    pub fn free(&mut self, addr: Addr, len: u32) -> Result<(), IndexError> {
        self.check(addr, len as usize)?;
        self.free.entry(len).or_default().push(addr.offset);
        self.free_bytes += len as usize;
        Ok(())
    }

    /// Bounds-checked shared view of `len` bytes at `addr`.
    pub fn bytes(&self, addr: Addr, len: usize) -> Result<&[u8], IndexError> {
        let start = self.check(addr, len)?;
        Ok(&self.region[start..start + len])
    }

    /// Bounds-checked mutable view of `len` bytes at `addr`.
    pub fn bytes_mut(&mut self, addr: Addr, len: usize) -> Result<&mut [u8], IndexError> {
        let start = self.check(addr, len)?;
        Ok(&mut self.region[start..start + len])
    }

    /// Reallocates the region so it holds at least `min_capacity` bytes.
    ///
    /// Capacity at least doubles. Allocated bytes are copied; addresses stay
    /// valid because they are offsets, not pointers.
    pub fn grow(&mut self, min_capacity: usize) -> Result<(), IndexError> {
        self.check_live()?;
        if min_capacity > MAX_ARENA_BYTES {
            return Err(IndexError::CapacityExceeded {
                arena: self.id,
                requested: min_capacity,
                limit: MAX_ARENA_BYTES,
            });
        }
        let target = self
            .region
            .len()
            .saturating_mul(2)
            .max(min_capacity)
            .min(MAX_ARENA_BYTES);
        if target <= self.region.len() {
            return Ok(());
        }
        let mut region = vec![0u8; target].into_boxed_slice();
        region[..self.top].copy_from_slice(&self.region[..self.top]);
        self.region = region;
        Ok(())
    }

    /// Tears the region down. Every later access fails with
    /// [`IndexError::Released`].
    pub fn release(&mut self) {
        self.region = Vec::new().into_boxed_slice();
        self.top = 0;
        self.free.clear();
        self.free_bytes = 0;
        self.released = true;
    }

    fn check_live(&self) -> Result<(), IndexError> {
        if self.released {
            return Err(IndexError::Released);
        }
        Ok(())
    }

    fn check(&self, addr: Addr, len: usize) -> Result<usize, IndexError> {
        self.check_live()?;
        if addr.arena != self.id {
            return Err(IndexError::ForeignArena {
                expected: self.id,
                found: addr.arena,
            });
        }
        let start = addr.offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.top => Ok(start),
            _ => Err(IndexError::OutOfBounds {
                arena: self.id,
                offset: addr.offset,
                len,
                extent: self.top,
            }),
        }
    }
}
