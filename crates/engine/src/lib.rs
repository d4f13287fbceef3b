//! # Engine - EddyKV storage engine
//!
//! Ties the [`index`], [`segment`] and [`hasher`] crates together into an
//! embedded, log-structured key-value store. Only a fixed-size record of
//! metadata per key lives in memory; values stay on disk.
//!
//! ## Architecture
//!
//! ```text
//! Client threads (share one Store)
//!   |
//!   v
//! ┌──────────────────────────────────────────────────────────┐
//! │                          STORE                           │
//! │                                                          │
//! │ write.rs → append record to active data file             │
//! │             + index entry to its index file              │
//! │             → publish {key → IndexMeta} in the table     │
//! │             (file full? seal it, open the next one)      │
//! │                                                          │
//! │ read.rs  → table lookup → positional read → checksum     │
//! │                                                          │
//! │ compaction.rs (background workers)                       │
//! │          → scan sealed file → copy live records to the   │
//! │            active file → CAS the metadata → unlink file  │
//! │                                                          │
//! │ recovery.rs → tombstones + index/data files → table      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module           | Purpose                                               |
//! |------------------|-------------------------------------------------------|
//! | [`lib.rs`]       | `Store`, open/close, accessors, `Debug`, `Drop`       |
//! | [`write`]        | `put()`, `delete()`, `rotate()`                       |
//! | [`read`]         | `get()`, `contains_key()`                             |
//! | [`compaction`]   | per-file compactor, worker pool, scheduling           |
//! | [`recovery`]     | rebuilding the table and accounting at open           |
//! | [`ledger`]       | per-file live/stale byte accounting, `StoreStats`     |
//!
//! ## Locking
//!
//! One append lock (`writer`) serializes sequence assignment, appends to the
//! active data/index/tombstone files, index publication for writes and
//! compaction rewrites. Reads never take it. Lock order is
//! `writer → files → ledger`; no path acquires them in another order.
//!
//! ## Example
//!
//! ```rust,no_run
//! use engine::{Store, StoreConfig};
//!
//! let store = Store::open("data", StoreConfig::default()).unwrap();
//! store.put(b"name", b"alice").unwrap();
//! assert_eq!(store.get(b"name").unwrap(), Some(b"alice".to_vec()));
//! store.delete(b"name").unwrap();
//! store.close().unwrap();
//! ```

mod compaction;
mod error;
mod ledger;
mod read;
mod recovery;
mod write;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use hasher::Hasher;
use index::{IndexMeta, OffHeapTable, TableOptions};
use parking_lot::{Mutex, RwLock};
use segment::{ActiveSegment, FileSet, TombstoneFile};
use tracing::{info, warn};

use compaction::CompactionWorkers;
use ledger::FileLedger;

pub use compaction::{CompactionReport, CompactionState};
pub use config::{ConfigError, StoreConfig};
pub use error::StoreError;
pub use ledger::{FileStats, StoreStats};
pub use segment::format::{MAX_KEY_SIZE, RECORD_HEADER_SIZE};

/// Files written under the append lock.
pub(crate) struct ActiveFiles {
    pub(crate) segment: ActiveSegment,
    pub(crate) tombstones: TombstoneFile,
    /// Scratch buffer for encoding frames.
    pub(crate) buf: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) puts: AtomicU64,
    pub(crate) gets: AtomicU64,
    pub(crate) deletes: AtomicU64,
    pub(crate) files_compacted: AtomicU64,
    pub(crate) records_copied: AtomicU64,
    pub(crate) races_lost: AtomicU64,
}

/// State shared by the store handle and the compaction workers.
pub(crate) struct StoreInner {
    pub(crate) dir: PathBuf,
    pub(crate) config: StoreConfig,
    pub(crate) hasher: Hasher,
    pub(crate) index: OffHeapTable<IndexMeta>,
    pub(crate) files: RwLock<FileSet>,
    pub(crate) writer: Mutex<ActiveFiles>,
    pub(crate) ledger: Mutex<FileLedger>,
    /// Last sequence number handed out. Only advanced under `writer`.
    pub(crate) seq: AtomicU64,
    pub(crate) closed: AtomicBool,
    /// Asks running compactions to stop at the next record.
    pub(crate) stop: AtomicBool,
    pub(crate) paused: AtomicBool,
    /// `None` when background compaction is disabled.
    pub(crate) jobs: Option<Sender<u32>>,
    pub(crate) counters: Counters,
}

impl StoreInner {
    pub(crate) fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    pub(crate) fn table_options(config: &StoreConfig) -> TableOptions {
        TableOptions {
            segment_count: config.table_segments,
            initial_buckets: config.initial_buckets_per_segment,
            initial_arena_bytes: config.initial_arena_bytes,
            load_factor: config.load_factor,
            max_key_size: MAX_KEY_SIZE,
        }
    }
}

/// An open EddyKV store.
///
/// `Store` is `Send + Sync`: wrap it in an `Arc` and call it from as many
/// threads as needed. Writes are serialized internally; reads run in
/// parallel with writes and with each other.
///
/// Dropping the store closes it, ignoring errors; call
/// [`close`](Store::close) to observe them.
pub struct Store {
    inner: Arc<StoreInner>,
    workers: Mutex<Option<CompactionWorkers>>,
}

impl Store {
    /// Opens the store in `path`, creating the directory if needed, and
    /// rebuilds the in-memory index from the files found there.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Config`] if `config` is invalid or no hashing
    ///   algorithm is usable.
    /// - [`StoreError::Io`] / [`StoreError::Segment`] if the directory or its
    ///   files cannot be read.
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let hasher = config.resolve_hasher()?;
        let dir = path.as_ref().to_path_buf();

        let index = OffHeapTable::new(hasher, &StoreInner::table_options(&config))?;
        let mut files = FileSet::open(&dir, hasher, config.sync_writes)?;
        let recovered = recovery::recover(&config, &mut files, &index)?;
        let segment = files.create_active_segment()?;

        let (jobs, job_rx) = if config.compaction_threads > 0 {
            let (tx, rx) = crossbeam_channel::unbounded();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let threads = config.compaction_threads;

        let inner = Arc::new(StoreInner {
            dir,
            config,
            hasher,
            index,
            files: RwLock::new(files),
            writer: Mutex::new(ActiveFiles {
                segment,
                tombstones: recovered.tombstones,
                buf: Vec::with_capacity(4096),
            }),
            ledger: Mutex::new(recovered.ledger),
            seq: AtomicU64::new(recovered.max_sequence),
            closed: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            jobs,
            counters: Counters::default(),
        });

        let workers = match job_rx {
            Some(rx) => Some(CompactionWorkers::spawn(&inner, rx, threads)?),
            None => None,
        };
        inner.schedule_eligible();

        info!(
            dir = %inner.dir.display(),
            hash = %hasher.algorithm(),
            keys = inner.index.len(),
            sequence = recovered.max_sequence,
            compaction_threads = threads,
            "store opened"
        );

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Keys are 1 to [`MAX_KEY_SIZE`] bytes. The value must fit in a single
    /// data file together with its header and key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.put(key, value)
    }

    /// Returns the current value of `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Checksum`] if the record on disk is corrupt, and
    /// [`StoreError::IndexInconsistency`] if the index points at data that no
    /// longer exists.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    /// Deletes `key`. Deleting an absent key is a no-op.
    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner.delete(key)
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool, StoreError> {
        self.inner.contains_key(key)
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seals the active data file and starts a new one. A no-op while the
    /// active file is empty.
    pub fn rotate(&self) -> Result<(), StoreError> {
        self.inner.rotate()
    }

    /// Compacts one sealed data file now, on the calling thread.
    pub fn compact_file(&self, file_id: u32) -> Result<CompactionReport, StoreError> {
        self.inner.compact_file(file_id)
    }

    /// Compacts every sealed data file holding stale bytes, regardless of
    /// the configured threshold.
    pub fn compact_all(&self) -> Result<Vec<CompactionReport>, StoreError> {
        self.inner.compact_all()
    }

    /// Stops compactions at their next record and holds new ones back.
    pub fn pause_compaction(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    /// Lifts a pause and requeues every file that is past the threshold.
    pub fn resume_compaction(&self) {
        self.inner.paused.store(false, Ordering::Release);
        self.inner.schedule_eligible();
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.inner.stats()
    }

    /// Last sequence number handed out.
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.inner.seq.load(Ordering::Acquire)
    }

    /// Ids of all data files, ascending. The last one is the active file.
    #[must_use]
    pub fn data_file_ids(&self) -> Vec<u32> {
        self.inner.files.read().data_file_ids()
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Stops compaction, flushes and syncs the active files, and releases
    /// the index memory. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error hit while syncing. The store is closed
    /// either way.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.stop.store(true, Ordering::Release);
        if let Some(workers) = self.workers.lock().take() {
            workers.shutdown();
        }

        let synced = self.inner.sync_active();
        self.inner.index.release();

        info!(
            dir = %self.inner.dir.display(),
            sequence = self.sequence_number(),
            "store closed"
        );
        synced
    }
}

impl StoreInner {
    fn sync_active(&self) -> Result<(), StoreError> {
        let mut w = self.writer.lock();
        w.segment.sync()?;
        w.tombstones.sync()?;
        Ok(())
    }

    pub(crate) fn stats(&self) -> StoreStats {
        let active_file_id = self.writer.lock().segment.id();
        let tombstone_files = self.files.read().tombstone_file_ids().len();
        StoreStats {
            hash_algorithm: self.hasher.algorithm(),
            keys: self.index.len(),
            sequence_number: self.seq.load(Ordering::Acquire),
            active_file_id,
            tombstone_files,
            puts: self.counters.puts.load(Ordering::Relaxed),
            gets: self.counters.gets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            files_compacted: self.counters.files_compacted.load(Ordering::Relaxed),
            records_copied: self.counters.records_copied.load(Ordering::Relaxed),
            compaction_races_lost: self.counters.races_lost.load(Ordering::Relaxed),
            files: self.ledger.lock().snapshot(),
            index: self.index.stats(),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.inner.dir)
            .field("hash", &self.inner.hasher.algorithm())
            .field("keys", &self.inner.index.len())
            .field("seq", &self.sequence_number())
            .field("data_files", &self.data_file_ids())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Best-effort close: errors cannot be propagated from `Drop`, so they are
/// logged. Everything appended is already in the files; only the final
/// fsync may be missed.
impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error while closing store on drop");
        }
    }
}

#[cfg(test)]
mod tests;
