//! Cold-start path: rebuilding the index and file accounting from disk.
//!
//! Tombstones are replayed first into a key → newest-deletion map. Data files
//! are then applied oldest first, each through its index file when that is
//! trustworthy and by scanning the records otherwise. A record survives if
//! no newer tombstone covers it and no newer version of the key was seen.

use std::collections::{HashMap, HashSet};

use config::StoreConfig;
use index::{IndexMeta, OffHeapTable};
use segment::{DataFile, FileSet, IndexEntry, IndexFile, TombstoneEntry, TombstoneFile};
use tracing::{debug, error, info, warn};

use crate::ledger::FileLedger;
use crate::write::stored_size;
use crate::StoreError;

/// What `Store::open` needs besides the rebuilt index.
pub(crate) struct Recovered {
    pub(crate) ledger: FileLedger,
    pub(crate) max_sequence: u64,
    /// The tombstone file new deletions go to.
    pub(crate) tombstones: TombstoneFile,
}

/// Newest deletion per key, and which of them still hide a record.
#[derive(Default)]
struct Tombstones {
    newest: HashMap<Vec<u8>, u64>,
    needed: HashSet<Vec<u8>>,
}

impl Tombstones {
    /// `true` if `key@sequence_number` was deleted afterwards.
    fn covers(&mut self, key: &[u8], sequence_number: u64) -> bool {
        match self.newest.get(key) {
            Some(&deleted_at) if deleted_at > sequence_number => {
                self.needed.insert(key.to_vec());
                true
            }
            _ => false,
        }
    }
}

pub(crate) fn recover(
    config: &StoreConfig,
    files: &mut FileSet,
    index: &OffHeapTable<IndexMeta>,
) -> Result<Recovered, StoreError> {
    let mut max_sequence = 0u64;
    let mut tombstones = load_tombstones(files, &mut max_sequence)?;
    let mut ledger = FileLedger::default();

    let ids = files.data_file_ids();
    let newest = ids.last().copied();
    for id in ids {
        let Some(file) = files.data_file(id) else {
            continue;
        };
        let is_newest = Some(id) == newest;
        let entries = if !is_newest && files.has_index_file(id) {
            match load_index_entries(files, &file) {
                Some(entries) => entries,
                None => scan_data_file(files, &file, false)?,
            }
        } else {
            scan_data_file(files, &file, is_newest)?
        };

        if entries.is_empty() && file.size() == 0 {
            debug!(file_id = id, "removing empty data file");
            files.retire_data_file(id)?;
            continue;
        }

        let count = entries.len();
        for entry in entries {
            max_sequence = max_sequence.max(entry.sequence_number);
            apply_entry(id, &entry, index, &mut ledger, &mut tombstones)?;
        }
        debug!(file_id = id, records = count, "data file recovered");
    }

    let active_tombstones = if config.clean_up_tombstones_during_open {
        rewrite_tombstones(files, &tombstones, config.max_file_size)?
    } else {
        files.create_tombstone_file()?
    };

    info!(
        keys = index.len(),
        data_files = files.data_file_ids().len(),
        tombstones = tombstones.newest.len(),
        tombstones_needed = tombstones.needed.len(),
        sequence = max_sequence,
        "recovery complete"
    );

    Ok(Recovered {
        ledger,
        max_sequence,
        tombstones: active_tombstones,
    })
}

fn load_tombstones(files: &FileSet, max_sequence: &mut u64) -> Result<Tombstones, StoreError> {
    let mut tombstones = Tombstones::default();
    for id in files.tombstone_file_ids() {
        let mut iter = TombstoneFile::iter(&files.tombstone_path(id), id)?;
        for entry in iter.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(file_id = id, error = %e, "ignoring torn tail of tombstone file");
                    break;
                }
            };
            *max_sequence = (*max_sequence).max(entry.sequence_number);
            let newest = tombstones.newest.entry(entry.key).or_insert(0);
            *newest = (*newest).max(entry.sequence_number);
        }
        debug!(file_id = id, bytes = iter.valid_len(), "tombstone file replayed");
    }
    Ok(tombstones)
}

/// Reads the index file of a sealed data file. `None` if it is unreadable or
/// does not describe the whole data file.
fn load_index_entries(files: &FileSet, file: &DataFile) -> Option<Vec<IndexEntry>> {
    let id = file.id();
    let iter = match IndexFile::iter(&files.index_path(id), id) {
        Ok(iter) => iter,
        Err(e) => {
            warn!(file_id = id, error = %e, "cannot open index file, scanning data file");
            return None;
        }
    };

    let mut entries = Vec::new();
    let mut covered = 0u64;
    for entry in iter {
        match entry {
            Ok(entry) => {
                covered += u64::from(entry.record_size);
                entries.push(entry);
            }
            Err(e) => {
                warn!(file_id = id, error = %e, "damaged index file, scanning data file");
                return None;
            }
        }
    }
    if covered != file.size() {
        warn!(
            file_id = id,
            covered,
            size = file.size(),
            "index file does not cover its data file, scanning data file"
        );
        return None;
    }
    Some(entries)
}

/// Scans the records of `file` and writes a fresh index file for it.
///
/// Only the newest file can end in a torn append, so only its tail is cut
/// off at the first bad frame. A sealed file is never modified: a record
/// with a bad checksum keeps its index entry so reads of that key fail, and
/// a frame that cannot even be delimited ends the scan.
fn scan_data_file(
    files: &mut FileSet,
    file: &DataFile,
    newest: bool,
) -> Result<Vec<IndexEntry>, StoreError> {
    let id = file.id();
    let mut iter = file.iter()?;
    let mut entries = Vec::new();
    while let Some(item) = iter.next() {
        match item {
            Ok((location, record)) => entries.push(IndexEntry {
                key: record.key,
                record_size: location.record_size,
                record_offset: location.record_offset,
                sequence_number: record.sequence_number,
            }),
            Err(e) if newest => {
                warn!(file_id = id, error = %e, "damaged record, dropping the rest of the file");
                break;
            }
            Err(e) => match iter.skip_damaged() {
                Some(entry) => {
                    error!(
                        file_id = id,
                        offset = entry.record_offset,
                        error = %e,
                        "damaged record in sealed data file"
                    );
                    entries.push(entry);
                }
                None => {
                    error!(
                        file_id = id,
                        offset = iter.valid_len(),
                        error = %e,
                        "unreadable record in sealed data file, ignoring the rest of it"
                    );
                    break;
                }
            },
        }
    }
    if newest {
        file.repair(iter.valid_len())?;
    }

    // A partial index would be rejected at the next open anyway.
    if !entries.is_empty() && iter.valid_len() == file.size() {
        let mut index_file = files.regenerate_index_file(id)?;
        for entry in &entries {
            index_file.append(entry)?;
        }
        index_file.seal()?;
    }
    debug!(file_id = id, records = entries.len(), "data file scanned");
    Ok(entries)
}

fn apply_entry(
    file_id: u32,
    entry: &IndexEntry,
    index: &OffHeapTable<IndexMeta>,
    ledger: &mut FileLedger,
    tombstones: &mut Tombstones,
) -> Result<(), StoreError> {
    if tombstones.covers(&entry.key, entry.sequence_number) {
        ledger.record_dead(file_id, entry.record_size);
        return Ok(());
    }
    if let Some(current) = index.get(&entry.key)? {
        if current.sequence_number > entry.sequence_number {
            ledger.record_dead(file_id, entry.record_size);
            return Ok(());
        }
    }

    let meta = IndexMeta {
        file_id,
        value_offset: entry.value_offset(),
        value_size: entry.value_size(),
        sequence_number: entry.sequence_number,
    };
    ledger.record_live(file_id, entry.record_size);
    if let Some(previous) = index.put(&entry.key, &meta)? {
        ledger.record_superseded(
            previous.file_id,
            stored_size(entry.key.len(), previous.value_size),
        );
    }
    Ok(())
}

/// Copies the tombstones that still hide a record into fresh files and
/// deletes the old ones. Returns the file new deletions go to.
fn rewrite_tombstones(
    files: &mut FileSet,
    tombstones: &Tombstones,
    max_file_size: u32,
) -> Result<TombstoneFile, StoreError> {
    let old = files.tombstone_file_ids();
    let mut active = files.create_tombstone_file()?;
    let limit = u64::from(max_file_size);

    for key in &tombstones.needed {
        let Some(&sequence_number) = tombstones.newest.get(key) else {
            continue;
        };
        let entry = TombstoneEntry {
            key: key.clone(),
            sequence_number,
        };
        if active.size() > 0 && active.size() + entry.encoded_size() > limit {
            files.rotate_tombstone_file(&mut active)?;
        }
        active.append(&entry)?;
    }
    active.sync()?;

    for id in &old {
        files.delete_tombstone_file(*id)?;
    }
    debug!(
        kept = tombstones.needed.len(),
        dropped = tombstones.newest.len() - tombstones.needed.len(),
        files_removed = old.len(),
        "tombstone files rewritten"
    );
    Ok(active)
}
