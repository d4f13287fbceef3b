//! Compaction: reclaims the space held by overwritten and deleted records.
//!
//! A sealed data file is scanned in file order. Each record the index still
//! points at is copied to the active data file and the index entry is swapped
//! with a compare-and-swap against the metadata seen during the scan, so a
//! foreground write to the same key always wins. Once every record is
//! scanned and none is live any more, the file and its index file are
//! unlinked.
//!
//! Background compaction runs on `compaction_threads` worker threads fed by
//! a job channel. Files are queued when their stale fraction reaches
//! `compaction_threshold`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver, Sender};
use index::IndexMeta;
use segment::{DataFile, Record, RecordLocation};
use tracing::{debug, info, warn};

use crate::ledger::FileLedger;
use crate::{ActiveFiles, StoreError, StoreInner};

/// Progress of one file through compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionState {
    /// Reading records and checking them against the index.
    Scanning,
    /// Copying a live record to the active file.
    Rewriting,
    /// Unlinking the drained file.
    Retiring,
    /// The file is gone.
    Done,
}

/// Outcome of compacting one data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    pub file_id: u32,
    /// State the run ended in. Anything but [`CompactionState::Done`] means
    /// the file is still on disk and will be compacted again later.
    pub state: CompactionState,
    pub records_scanned: u64,
    pub records_copied: u64,
    /// Copies discarded because a foreground write changed the key first.
    pub races_lost: u64,
    /// Size of the unlinked file.
    pub bytes_reclaimed: u64,
}

impl CompactionReport {
    fn new(file_id: u32) -> Self {
        Self {
            file_id,
            state: CompactionState::Scanning,
            records_scanned: 0,
            records_copied: 0,
            races_lost: 0,
            bytes_reclaimed: 0,
        }
    }

    /// `true` if the file was unlinked.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == CompactionState::Done
    }
}

impl StoreInner {
    /// Set by close, shutdown or pause. Checked before every record.
    fn compaction_interrupted(&self) -> bool {
        self.stop.load(Ordering::Acquire)
            || self.paused.load(Ordering::Acquire)
            || self.closed.load(Ordering::Acquire)
    }

    /// Queues `file_id` for the workers if it crossed the threshold.
    ///
    /// Caller holds the ledger lock (and usually the append lock).
    pub(crate) fn schedule_locked(&self, ledger: &mut FileLedger, file_id: u32, active_id: u32) {
        let Some(jobs) = &self.jobs else {
            return;
        };
        if self.paused.load(Ordering::Acquire)
            || !ledger.is_eligible(file_id, active_id, self.config.compaction_threshold)
        {
            return;
        }
        if jobs.send(file_id).is_ok() {
            ledger.mark_queued(file_id);
            debug!(file_id, "data file queued for compaction");
        }
    }

    /// Queues every sealed file past the threshold.
    pub(crate) fn schedule_eligible(&self) {
        if self.jobs.is_none() || self.closed.load(Ordering::Acquire) {
            return;
        }
        let w = self.writer.lock();
        let active_id = w.segment.id();
        let mut ledger = self.ledger.lock();
        for id in ledger.eligible(active_id, self.config.compaction_threshold) {
            self.schedule_locked(&mut ledger, id, active_id);
        }
    }

    pub(crate) fn compact_all(&self) -> Result<Vec<CompactionReport>, StoreError> {
        self.check_open()?;
        let ids = {
            let active_id = self.writer.lock().segment.id();
            self.ledger.lock().with_stale_bytes(active_id)
        };
        ids.into_iter().map(|id| self.compact_file(id)).collect()
    }

    /// Compacts `file_id` on the calling thread.
    ///
    /// A file already being compacted elsewhere is left alone and reported
    /// in [`CompactionState::Scanning`] with nothing scanned. A file that no
    /// longer exists is reported [`CompactionState::Done`].
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] for the active data file; I/O and
    /// checksum errors while reading the file or appending copies.
    pub(crate) fn compact_file(&self, file_id: u32) -> Result<CompactionReport, StoreError> {
        self.check_open()?;
        if file_id == self.writer.lock().segment.id() {
            return Err(StoreError::InvalidArgument(format!(
                "data file {file_id} is the active file"
            )));
        }

        let mut report = CompactionReport::new(file_id);
        let file = self.files.read().data_file(file_id);
        let Some(file) = file else {
            self.ledger.lock().forget(file_id);
            report.state = CompactionState::Done;
            return Ok(report);
        };
        if !self.ledger.lock().begin_compaction(file_id) {
            debug!(file_id, "data file is already being compacted");
            return Ok(report);
        }

        let result = self.drain_file(&file, &mut report);
        self.ledger.lock().end_compaction(file_id);
        result?;

        self.counters
            .records_copied
            .fetch_add(report.records_copied, Ordering::Relaxed);
        self.counters
            .races_lost
            .fetch_add(report.races_lost, Ordering::Relaxed);
        if report.is_done() {
            self.counters.files_compacted.fetch_add(1, Ordering::Relaxed);
            info!(
                file_id,
                scanned = report.records_scanned,
                copied = report.records_copied,
                races_lost = report.races_lost,
                reclaimed = report.bytes_reclaimed,
                "data file compacted"
            );
        } else {
            debug!(file_id, scanned = report.records_scanned, "compaction interrupted");
        }
        Ok(report)
    }

    fn drain_file(&self, file: &DataFile, report: &mut CompactionReport) -> Result<(), StoreError> {
        for item in file.iter()? {
            if self.compaction_interrupted() {
                return Ok(());
            }
            let (location, record) = item?;
            report.records_scanned += 1;

            let hash = self.index.hash_key(&record.key);
            let expected = match self.index.get_hashed(hash, &record.key)? {
                Some(meta) if meta.file_id == location.file_id
                    && meta.value_offset == location.value_offset =>
                {
                    meta
                }
                _ => continue,
            };

            report.state = CompactionState::Rewriting;
            if self.rewrite(hash, &record, &expected)? {
                report.records_copied += 1;
            } else {
                report.races_lost += 1;
            }
            report.state = CompactionState::Scanning;
        }

        let stats = self.ledger.lock().get(file.id());
        if stats.live_records > 0 {
            warn!(
                file_id = file.id(),
                live = stats.live_records,
                "scanned data file still has live records, keeping it"
            );
            return Ok(());
        }

        report.state = CompactionState::Retiring;
        report.bytes_reclaimed = file.size();
        self.files.write().retire_data_file(file.id())?;
        self.ledger.lock().forget(file.id());
        report.state = CompactionState::Done;
        Ok(())
    }

    /// Copies one live record to the active file and swaps the index entry
    /// if it still equals `expected`. Returns whether the swap happened.
    fn rewrite(&self, hash: u64, record: &Record, expected: &IndexMeta) -> Result<bool, StoreError> {
        let mut w = self.writer.lock();
        self.check_open()?;
        self.ensure_room(&mut w, record.key.len(), record.value.len())?;

        let ActiveFiles { segment, buf, .. } = &mut *w;
        let copy: RecordLocation = segment.append(
            &self.hasher,
            &record.key,
            &record.value,
            record.sequence_number,
            buf,
        )?;
        let moved = IndexMeta {
            file_id: copy.file_id,
            value_offset: copy.value_offset,
            value_size: copy.value_size,
            sequence_number: record.sequence_number,
        };
        let swapped = self.index.replace_hashed(hash, &record.key, expected, &moved)?;

        let mut ledger = self.ledger.lock();
        ledger.record_live(copy.file_id, copy.record_size);
        if swapped {
            ledger.record_superseded(expected.file_id, copy.record_size);
        } else {
            // The foreground write already accounted for the old record.
            ledger.record_superseded(copy.file_id, copy.record_size);
        }
        Ok(swapped)
    }
}

/// The background compaction threads.
pub(crate) struct CompactionWorkers {
    shutdown: Sender<()>,
    threads: Vec<JoinHandle<()>>,
}

impl CompactionWorkers {
    pub(crate) fn spawn(
        inner: &Arc<StoreInner>,
        jobs: Receiver<u32>,
        count: usize,
    ) -> Result<Self, StoreError> {
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let mut threads = Vec::with_capacity(count);
        for i in 0..count {
            let inner = Arc::clone(inner);
            let jobs = jobs.clone();
            let shutdown_rx = shutdown_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("eddy-compact-{i}"))
                .spawn(move || worker_loop(&inner, jobs, shutdown_rx))?;
            threads.push(handle);
        }
        debug!(threads = count, "compaction workers started");
        Ok(Self { shutdown, threads })
    }

    /// Disconnects the shutdown channel and waits for every worker.
    /// The caller sets the stop flag first so running scans end early.
    pub(crate) fn shutdown(self) {
        drop(self.shutdown);
        for handle in self.threads {
            if handle.join().is_err() {
                warn!("compaction worker panicked");
            }
        }
    }
}

fn worker_loop(inner: &StoreInner, jobs: Receiver<u32>, shutdown: Receiver<()>) {
    loop {
        select! {
            recv(shutdown) -> _ => return,
            recv(jobs) -> job => match job {
                Ok(file_id) => run_job(inner, file_id),
                Err(_) => return,
            },
        }
    }
}

fn run_job(inner: &StoreInner, file_id: u32) {
    if inner.stop.load(Ordering::Acquire) {
        return;
    }
    match inner.compact_file(file_id) {
        Ok(_) | Err(StoreError::Closed) => {}
        Err(e) => warn!(file_id, error = %e, "background compaction failed"),
    }
}
