use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hasher::Hasher;
use tracing::{debug, info, warn};

use crate::data_file::DataFile;
use crate::error::SegmentError;
use crate::format::{record_size, RecordLocation};
use crate::index_file::IndexFile;
use crate::naming::{file_path, FileKind, TEMP_SUFFIX};
use crate::tombstone_file::TombstoneFile;

/// The writable data file together with its index file.
#[derive(Debug)]
pub struct ActiveSegment {
    data: Arc<DataFile>,
    index: IndexFile,
}

impl ActiveSegment {
    #[must_use]
    pub fn id(&self) -> u32 {
        self.data.id()
    }

    #[must_use]
    pub fn data(&self) -> &Arc<DataFile> {
        &self.data
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.size()
    }

    /// `true` if a record of this shape can be appended without pushing the
    /// file past `max_file_size`. An empty file accepts any record.
    #[must_use]
    pub fn has_room(&self, key_len: usize, value_len: usize, max_file_size: u64) -> bool {
        let size = self.size();
        size == 0 || size + record_size(key_len, value_len) <= max_file_size
    }

    /// Appends the record to the data file, then its entry to the index file.
    pub fn append(
        &mut self,
        hasher: &Hasher,
        key: &[u8],
        value: &[u8],
        sequence_number: u64,
        buf: &mut Vec<u8>,
    ) -> Result<RecordLocation, SegmentError> {
        let location = self.data.append(hasher, key, value, sequence_number, buf)?;
        self.index.append_location(key, &location, sequence_number)?;
        Ok(location)
    }

    /// Flushes the index buffer and fsyncs both files.
    pub fn sync(&mut self) -> Result<(), SegmentError> {
        self.index.sync()?;
        self.data.sync()
    }

    fn seal(self) -> Result<(), SegmentError> {
        self.index.seal()?;
        self.data.seal()
    }
}

/// Sole owner of the files in a store directory.
///
/// Tracks which data, index and tombstone files exist, hands out file ids
/// (monotonic, never reused) and performs every creation and deletion.
/// Readers obtain `Arc<DataFile>` handles and keep them for the duration of
/// a read, so retiring a file never invalidates an in-flight read.
#[derive(Debug)]
pub struct FileSet {
    dir: PathBuf,
    data_files: BTreeMap<u32, Arc<DataFile>>,
    index_ids: BTreeSet<u32>,
    tombstone_ids: BTreeSet<u32>,
    next_id: u32,
    hasher: Hasher,
    sync_writes: bool,
}

impl FileSet {
    /// Scans `dir` (creating it if needed) and opens every data file sealed.
    ///
    /// Leftover `*.tmp` files and index files without a data file are removed.
    /// Unrecognized names are ignored.
    pub fn open(dir: &Path, hasher: Hasher, sync_writes: bool) -> Result<Self, SegmentError> {
        fs::create_dir_all(dir)?;

        let mut data_files = BTreeMap::new();
        let mut index_ids = BTreeSet::new();
        let mut tombstone_ids = BTreeSet::new();
        let mut max_id = 0u32;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(TEMP_SUFFIX) {
                debug!(path = %path.display(), "removing leftover temporary file");
                remove_if_exists(&path)?;
                continue;
            }
            let Some((id, kind)) = FileKind::parse(name) else {
                continue;
            };
            max_id = max_id.max(id);

            match kind {
                FileKind::Data | FileKind::Compacted => {
                    let clash = data_files.get(&id).map(|f: &Arc<DataFile>| f.kind());
                    if clash.is_some() {
                        warn!(file_id = id, "both .data and .datac exist, keeping .data");
                        if kind == FileKind::Compacted {
                            continue;
                        }
                    }
                    let file = DataFile::open(&path, id, kind)?;
                    data_files.insert(id, Arc::new(file));
                }
                FileKind::Index => {
                    index_ids.insert(id);
                }
                FileKind::Tombstone => {
                    tombstone_ids.insert(id);
                }
            }
        }

        let orphans: Vec<u32> = index_ids
            .iter()
            .copied()
            .filter(|id| !data_files.contains_key(id))
            .collect();
        for id in orphans {
            debug!(file_id = id, "removing index file without data file");
            remove_if_exists(&file_path(dir, id, FileKind::Index))?;
            index_ids.remove(&id);
        }

        info!(
            dir = %dir.display(),
            data_files = data_files.len(),
            tombstone_files = tombstone_ids.len(),
            "file set opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            data_files,
            index_ids,
            tombstone_ids,
            next_id: max_id + 1,
            hasher,
            sync_writes,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The id the next created file will get.
    #[must_use]
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Creates a fresh writable data file and its index file.
    pub fn create_active_segment(&mut self) -> Result<ActiveSegment, SegmentError> {
        let id = self.allocate_id();
        let data = Arc::new(DataFile::create(&self.dir, id, self.sync_writes)?);
        let index = IndexFile::create(&self.dir, id, self.hasher)?;
        self.data_files.insert(id, Arc::clone(&data));
        self.index_ids.insert(id);
        Ok(ActiveSegment { data, index })
    }

    /// Replaces `active` with a new segment and seals the old one.
    ///
    /// The new segment is installed before sealing, so `active` stays
    /// writable even if sealing the old files fails.
    pub fn rotate(&mut self, active: &mut ActiveSegment) -> Result<(), SegmentError> {
        let next = self.create_active_segment()?;
        let old = std::mem::replace(active, next);
        let old_id = old.id();
        old.seal()?;
        debug!(sealed = old_id, active = active.id(), "data file rotated");
        Ok(())
    }

    pub fn create_tombstone_file(&mut self) -> Result<TombstoneFile, SegmentError> {
        let id = self.allocate_id();
        let file = TombstoneFile::create(&self.dir, id, self.hasher, self.sync_writes)?;
        self.tombstone_ids.insert(id);
        Ok(file)
    }

    /// Replaces `active` with a new tombstone file, syncing the old one.
    pub fn rotate_tombstone_file(&mut self, active: &mut TombstoneFile) -> Result<(), SegmentError> {
        let next = self.create_tombstone_file()?;
        let old = std::mem::replace(active, next);
        old.sync()?;
        debug!(sealed = old.id(), active = active.id(), "tombstone file rotated");
        Ok(())
    }

    #[must_use]
    pub fn data_file(&self, id: u32) -> Option<Arc<DataFile>> {
        self.data_files.get(&id).cloned()
    }

    /// Data file ids in ascending order.
    #[must_use]
    pub fn data_file_ids(&self) -> Vec<u32> {
        self.data_files.keys().copied().collect()
    }

    #[must_use]
    pub fn data_files(&self) -> Vec<Arc<DataFile>> {
        self.data_files.values().cloned().collect()
    }

    /// Tombstone file ids in ascending order.
    #[must_use]
    pub fn tombstone_file_ids(&self) -> Vec<u32> {
        self.tombstone_ids.iter().copied().collect()
    }

    #[must_use]
    pub fn has_index_file(&self, id: u32) -> bool {
        self.index_ids.contains(&id)
    }

    #[must_use]
    pub fn index_path(&self, id: u32) -> PathBuf {
        file_path(&self.dir, id, FileKind::Index)
    }

    #[must_use]
    pub fn tombstone_path(&self, id: u32) -> PathBuf {
        file_path(&self.dir, id, FileKind::Tombstone)
    }

    /// Starts writing a replacement index for data file `id`.
    pub fn regenerate_index_file(&mut self, id: u32) -> Result<IndexFile, SegmentError> {
        let file = IndexFile::create_temp(&self.dir, id, self.hasher)?;
        self.index_ids.insert(id);
        Ok(file)
    }

    /// Forgets data file `id` and unlinks it together with its index file.
    ///
    /// Handles already held by readers stay usable until dropped.
    pub fn retire_data_file(&mut self, id: u32) -> Result<Option<Arc<DataFile>>, SegmentError> {
        let Some(path) = self.data_files.get(&id).map(|f| f.path().to_path_buf()) else {
            return Ok(None);
        };
        remove_if_exists(&path)?;
        let file = self.data_files.remove(&id);
        if self.index_ids.remove(&id) {
            if let Err(e) = remove_if_exists(&self.index_path(id)) {
                // Recovery treats an index file without its data file as garbage.
                warn!(file_id = id, error = %e, "failed to unlink index file");
            }
        }
        debug!(file_id = id, "data file retired");
        Ok(file)
    }

    pub fn delete_tombstone_file(&mut self, id: u32) -> Result<(), SegmentError> {
        if self.tombstone_ids.remove(&id) {
            remove_if_exists(&self.tombstone_path(id))?;
            debug!(file_id = id, "tombstone file deleted");
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), SegmentError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
