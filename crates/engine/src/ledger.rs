//! Per-file space accounting that drives compaction.

use std::collections::{BTreeMap, BTreeSet};

use hasher::HashAlgorithm;
use index::TableStats;

/// Byte and record counts for one data file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    /// Bytes of every record ever appended.
    pub total_bytes: u64,
    /// Bytes of records that are overwritten, deleted, or lost a race.
    pub stale_bytes: u64,
    /// Records the index still points at.
    pub live_records: u64,
}

impl FileStats {
    #[must_use]
    pub fn stale_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.stale_bytes as f64 / self.total_bytes as f64
    }
}

/// What compaction bookkeeping knows about every data file.
#[derive(Debug, Default)]
pub(crate) struct FileLedger {
    files: BTreeMap<u32, FileStats>,
    /// Handed to the worker queue but not yet started.
    queued: BTreeSet<u32>,
    /// Currently being compacted.
    compacting: BTreeSet<u32>,
}

impl FileLedger {
    /// A record the index now points at.
    pub(crate) fn record_live(&mut self, file_id: u32, size: u32) {
        let f = self.files.entry(file_id).or_default();
        f.total_bytes += u64::from(size);
        f.live_records += 1;
    }

    /// A record found dead while rebuilding, never pointed at by the index.
    pub(crate) fn record_dead(&mut self, file_id: u32, size: u32) {
        let f = self.files.entry(file_id).or_default();
        f.total_bytes += u64::from(size);
        f.stale_bytes += u64::from(size);
    }

    /// A record the index stopped pointing at.
    pub(crate) fn record_superseded(&mut self, file_id: u32, size: u32) {
        let f = self.files.entry(file_id).or_default();
        f.stale_bytes += u64::from(size);
        f.live_records = f.live_records.saturating_sub(1);
    }

    pub(crate) fn get(&self, file_id: u32) -> FileStats {
        self.files.get(&file_id).copied().unwrap_or_default()
    }

    pub(crate) fn forget(&mut self, file_id: u32) {
        self.files.remove(&file_id);
        self.queued.remove(&file_id);
        self.compacting.remove(&file_id);
    }

    /// `true` if `file_id` is sealed, past `threshold`, and not already queued
    /// or running.
    pub(crate) fn is_eligible(&self, file_id: u32, active_id: u32, threshold: f64) -> bool {
        if file_id == active_id || self.queued.contains(&file_id) || self.compacting.contains(&file_id) {
            return false;
        }
        let f = self.get(file_id);
        f.stale_bytes > 0 && f.stale_fraction() >= threshold
    }

    /// Sealed files past `threshold` that are not queued or running.
    pub(crate) fn eligible(&self, active_id: u32, threshold: f64) -> Vec<u32> {
        self.files
            .keys()
            .copied()
            .filter(|&id| self.is_eligible(id, active_id, threshold))
            .collect()
    }

    /// Sealed files holding any stale bytes.
    pub(crate) fn with_stale_bytes(&self, active_id: u32) -> Vec<u32> {
        self.files
            .iter()
            .filter(|(&id, f)| id != active_id && f.stale_bytes > 0)
            .map(|(&id, _)| id)
            .collect()
    }

    pub(crate) fn mark_queued(&mut self, file_id: u32) {
        self.queued.insert(file_id);
    }

    /// Claims `file_id` for compaction. `false` if someone else holds it.
    pub(crate) fn begin_compaction(&mut self, file_id: u32) -> bool {
        self.queued.remove(&file_id);
        self.compacting.insert(file_id)
    }

    pub(crate) fn end_compaction(&mut self, file_id: u32) {
        self.compacting.remove(&file_id);
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<u32, FileStats> {
        self.files.clone()
    }
}

/// A point-in-time view of a store, returned by
/// [`Store::stats`](crate::Store::stats).
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub hash_algorithm: HashAlgorithm,
    /// Keys currently in the index.
    pub keys: usize,
    /// Last sequence number handed out.
    pub sequence_number: u64,
    pub active_file_id: u32,
    pub tombstone_files: usize,
    pub puts: u64,
    pub gets: u64,
    pub deletes: u64,
    /// Sealed data files removed by compaction.
    pub files_compacted: u64,
    pub records_copied: u64,
    /// Compaction copies discarded because a foreground write won the race.
    pub compaction_races_lost: u64,
    pub files: BTreeMap<u32, FileStats>,
    pub index: TableStats,
}

impl StoreStats {
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|f| f.total_bytes).sum()
    }

    #[must_use]
    pub fn stale_bytes(&self) -> u64 {
        self.files.values().map(|f| f.stale_bytes).sum()
    }
}
