use std::sync::atomic::{AtomicBool, Ordering};

use hasher::Hasher;
use parking_lot::RwLock;
use tracing::debug;

use crate::codec::ValueCodec;
use crate::error::IndexError;
use crate::stats::TableStats;
use crate::table_segment::TableSegment;

/// Sizing knobs for an [`OffHeapTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableOptions {
    /// Number of independently locked table-segments. Power of two.
    pub segment_count: usize,
    /// Buckets per table-segment before the first resize. Power of two.
    pub initial_buckets: usize,
    /// Starting arena size per table-segment.
    pub initial_arena_bytes: usize,
    /// A table-segment doubles its buckets once `entries > buckets * load_factor`.
    pub load_factor: f32,
    /// Longest accepted key.
    pub max_key_size: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            segment_count: 16,
            initial_buckets: 256,
            initial_arena_bytes: 64 * 1024,
            load_factor: 0.75,
            max_key_size: 255,
        }
    }
}

impl TableOptions {
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidOptions`] describing the first bad field.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.segment_count == 0 || !self.segment_count.is_power_of_two() {
            return Err(IndexError::InvalidOptions(format!(
                "segment_count must be a power of two, got {}",
                self.segment_count
            )));
        }
        if self.segment_count > 1 << 16 {
            return Err(IndexError::InvalidOptions(format!(
                "segment_count {} exceeds 65536",
                self.segment_count
            )));
        }
        if self.initial_buckets == 0 || !self.initial_buckets.is_power_of_two() {
            return Err(IndexError::InvalidOptions(format!(
                "initial_buckets must be a power of two, got {}",
                self.initial_buckets
            )));
        }
        if !(self.load_factor > 0.0 && self.load_factor <= 16.0) {
            return Err(IndexError::InvalidOptions(format!(
                "load_factor must be in (0, 16], got {}",
                self.load_factor
            )));
        }
        if self.max_key_size == 0 || self.max_key_size > usize::from(u16::MAX) {
            return Err(IndexError::InvalidOptions(format!(
                "max_key_size must be in 1..=65535, got {}",
                self.max_key_size
            )));
        }
        Ok(())
    }
}

/// A concurrent hash table whose entries live in explicitly managed arenas.
///
/// The key hash picks the table-segment by its high bits and the bucket by
/// its low bits. Each table-segment sits behind its own reader/writer lock,
/// so operations on different table-segments never contend and a resize
/// blocks only the table-segment being resized.
///
/// Keys are stored in full and compared on every lookup; two keys with the
/// same hash are distinct entries.
pub struct OffHeapTable<V> {
    segments: Box<[RwLock<TableSegment<V>>]>,
    segment_bits: u32,
    hasher: Hasher,
    max_key_size: usize,
    released: AtomicBool,
}

impl<V> std::fmt::Debug for OffHeapTable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffHeapTable")
            .field("segments", &self.segments.len())
            .field("hasher", &self.hasher)
            .field("max_key_size", &self.max_key_size)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V: ValueCodec> OffHeapTable<V> {
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidOptions`] if `options` fails validation.
    pub fn new(hasher: Hasher, options: &TableOptions) -> Result<Self, IndexError> {
        options.validate()?;
        let segments = (0..options.segment_count)
            .map(|i| {
                RwLock::new(TableSegment::new(
                    i,
                    options.initial_buckets,
                    options.initial_arena_bytes,
                    options.load_factor,
                ))
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        debug!(
            segments = options.segment_count,
            buckets = options.initial_buckets,
            arena_bytes = options.initial_arena_bytes,
            "off-heap table created"
        );

        Ok(Self {
            segments,
            segment_bits: options.segment_count.trailing_zeros(),
            hasher,
            max_key_size: options.max_key_size,
            released: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn hasher(&self) -> Hasher {
        self.hasher
    }

    /// Hash used for placement of `key`.
    #[must_use]
    pub fn hash_key(&self, key: &[u8]) -> u64 {
        self.hasher.hash(key)
    }

    fn segment_for(&self, hash: u64) -> &RwLock<TableSegment<V>> {
        let idx = if self.segment_bits == 0 {
            0
        } else {
            (hash >> (64 - self.segment_bits)) as usize
        };
        &self.segments[idx]
    }

    fn check(&self, key: &[u8]) -> Result<(), IndexError> {
        if self.released.load(Ordering::Acquire) {
            return Err(IndexError::Released);
        }
        if key.len() > self.max_key_size {
            return Err(IndexError::KeyTooLarge {
                len: key.len(),
                max: self.max_key_size,
            });
        }
        Ok(())
    }

    /// Returns the value stored for `key`, if any.
    ///
    /// # Errors
    ///
    /// Fails only when the table was released or its memory is corrupt.
    pub fn get(&self, key: &[u8]) -> Result<Option<V>, IndexError> {
        self.get_hashed(self.hash_key(key), key)
    }

    pub fn get_hashed(&self, hash: u64, key: &[u8]) -> Result<Option<V>, IndexError> {
        self.check(key)?;
        self.segment_for(hash).read().get(hash, key)
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool, IndexError> {
        Ok(self.get(key)?.is_some())
    }

    /// Inserts or overwrites `key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::KeyTooLarge`] for oversized keys, or an arena
    /// error if the table-segment cannot grow.
    pub fn put(&self, key: &[u8], value: &V) -> Result<Option<V>, IndexError> {
        self.put_hashed(self.hash_key(key), key, value)
    }

    pub fn put_hashed(&self, hash: u64, key: &[u8], value: &V) -> Result<Option<V>, IndexError> {
        self.check(key)?;
        self.segment_for(hash).write().put(hash, key, value)
    }

    /// Compare-and-swap: stores `value` only if the current value equals
    /// `expected`. Returns whether the swap happened.
    pub fn replace(&self, key: &[u8], expected: &V, value: &V) -> Result<bool, IndexError> {
        self.replace_hashed(self.hash_key(key), key, expected, value)
    }

    pub fn replace_hashed(
        &self,
        hash: u64,
        key: &[u8],
        expected: &V,
        value: &V,
    ) -> Result<bool, IndexError> {
        self.check(key)?;
        self.segment_for(hash)
            .write()
            .replace(hash, key, expected, value)
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&self, key: &[u8]) -> Result<Option<V>, IndexError> {
        self.remove_hashed(self.hash_key(key), key)
    }

    pub fn remove_hashed(&self, hash: u64, key: &[u8]) -> Result<Option<V>, IndexError> {
        self.check(key)?;
        self.segment_for(hash).write().remove(hash, key)
    }

    /// Number of entries. Approximate while writers are active.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.read().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every entry, one table-segment at a time under its read lock.
    ///
    /// `f` must not call back into the table.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), IndexError>
    where
        F: FnMut(&[u8], &V),
    {
        if self.released.load(Ordering::Acquire) {
            return Err(IndexError::Released);
        }
        for segment in self.segments.iter() {
            segment.read().for_each(&mut f)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> TableStats {
        TableStats {
            segments: self.segments.iter().map(|s| s.read().stats()).collect(),
        }
    }

    /// Frees every arena. Idempotent; later operations return
    /// [`IndexError::Released`].
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        for segment in self.segments.iter() {
            segment.write().release();
        }
        debug!(segments = self.segments.len(), "off-heap table released");
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Bytes reserved by table-segment `idx`'s arena, for diagnostics.
    #[must_use]
    pub fn arena_capacity(&self, idx: usize) -> Option<usize> {
        self.segments.get(idx).map(|s| s.read().arena().capacity())
    }
}
