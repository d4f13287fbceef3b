//! Write path: `put()`, `delete()` and `rotate()`.
//!
//! Every mutation runs under the append lock: a sequence number is assigned,
//! the record (or tombstone) is appended, and only then is the new location
//! published in the index. A reader that sees the new metadata can therefore
//! always read the bytes it points at.

use std::sync::atomic::Ordering;

use index::IndexMeta;
use segment::format::{record_size, TombstoneEntry};
use tracing::debug;

use crate::{ActiveFiles, StoreError, StoreInner, MAX_KEY_SIZE, RECORD_HEADER_SIZE};

/// On-disk size of the record an [`IndexMeta`] points at.
pub(crate) fn stored_size(key_len: usize, value_size: u32) -> u32 {
    (RECORD_HEADER_SIZE + key_len) as u32 + value_size
}

pub(crate) fn check_key(key: &[u8]) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidArgument("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(StoreError::InvalidArgument(format!(
            "key too large: {} bytes (max {MAX_KEY_SIZE})",
            key.len()
        )));
    }
    Ok(())
}

impl StoreInner {
    /// Hands out the next sequence number. Caller holds the append lock.
    pub(crate) fn next_sequence(&self) -> Result<u64, StoreError> {
        let next = self
            .seq
            .load(Ordering::Acquire)
            .checked_add(1)
            .ok_or_else(|| StoreError::InvalidArgument("sequence number overflow".into()))?;
        self.seq.store(next, Ordering::Release);
        Ok(next)
    }

    pub(crate) fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_open()?;
        check_key(key)?;
        let size = record_size(key.len(), value.len());
        if size > u64::from(self.config.max_file_size) {
            return Err(StoreError::InvalidArgument(format!(
                "record of {size} bytes does not fit in a data file of {} bytes",
                self.config.max_file_size
            )));
        }
        let hash = self.index.hash_key(key);

        let mut w = self.writer.lock();
        self.check_open()?;
        self.ensure_room(&mut w, key.len(), value.len())?;

        let seq = self.next_sequence()?;
        let ActiveFiles { segment, buf, .. } = &mut *w;
        let location = segment.append(&self.hasher, key, value, seq, buf)?;
        let meta = IndexMeta {
            file_id: location.file_id,
            value_offset: location.value_offset,
            value_size: location.value_size,
            sequence_number: seq,
        };
        let previous = self.index.put_hashed(hash, key, &meta)?;

        let active_id = w.segment.id();
        let mut ledger = self.ledger.lock();
        ledger.record_live(location.file_id, location.record_size);
        if let Some(prev) = previous {
            ledger.record_superseded(prev.file_id, stored_size(key.len(), prev.value_size));
            self.schedule_locked(&mut ledger, prev.file_id, active_id);
        }
        drop(ledger);
        drop(w);

        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.check_open()?;
        check_key(key)?;
        let hash = self.index.hash_key(key);

        let mut w = self.writer.lock();
        self.check_open()?;
        if self.index.get_hashed(hash, key)?.is_none() {
            return Ok(());
        }

        let entry = TombstoneEntry {
            key: key.to_vec(),
            sequence_number: self.next_sequence()?,
        };
        let limit = u64::from(self.config.max_file_size);
        if w.tombstones.size() > 0 && w.tombstones.size() + entry.encoded_size() > limit {
            self.files.write().rotate_tombstone_file(&mut w.tombstones)?;
        }
        w.tombstones.append(&entry)?;

        if let Some(prev) = self.index.remove_hashed(hash, key)? {
            let active_id = w.segment.id();
            let mut ledger = self.ledger.lock();
            ledger.record_superseded(prev.file_id, stored_size(key.len(), prev.value_size));
            self.schedule_locked(&mut ledger, prev.file_id, active_id);
        }
        drop(w);

        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn rotate(&self) -> Result<(), StoreError> {
        self.check_open()?;
        let mut w = self.writer.lock();
        if w.segment.size() == 0 {
            return Ok(());
        }
        self.rotate_locked(&mut w)
    }

    /// Rotates the active data file if a record of this shape does not fit.
    pub(crate) fn ensure_room(
        &self,
        w: &mut ActiveFiles,
        key_len: usize,
        value_len: usize,
    ) -> Result<(), StoreError> {
        let limit = u64::from(self.config.max_file_size);
        if w.segment.has_room(key_len, value_len, limit) {
            return Ok(());
        }
        self.rotate_locked(w)
    }

    /// Seals the active data file and opens the next one. The sealed file
    /// may already be worth compacting.
    pub(crate) fn rotate_locked(&self, w: &mut ActiveFiles) -> Result<(), StoreError> {
        let sealed = w.segment.id();
        self.files.write().rotate(&mut w.segment)?;
        let active = w.segment.id();
        debug!(sealed, active, "rolled over to a new data file");

        let mut ledger = self.ledger.lock();
        self.schedule_locked(&mut ledger, sealed, active);
        Ok(())
    }
}
