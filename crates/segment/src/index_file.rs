use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use hasher::Hasher;
use tracing::debug;

use crate::entry_iter::{EntryIter, IndexIter};
use crate::error::SegmentError;
use crate::format::{IndexEntry, RecordLocation};
use crate::naming::{file_path, temp_path, FileKind};

/// Writer for the `<id>.index` file of a data file.
///
/// Holds one [`IndexEntry`] per record in the data file, in the same order,
/// so the table can be rebuilt without reading any values. Appends are
/// buffered; the file is complete once [`seal`](IndexFile::seal) returns.
pub struct IndexFile {
    id: u32,
    path: PathBuf,
    /// Set when writing to a temporary file that `seal` renames into place.
    final_path: Option<PathBuf>,
    writer: BufWriter<File>,
    hasher: Hasher,
    buf: Vec<u8>,
}

impl std::fmt::Debug for IndexFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

impl IndexFile {
    /// Creates (or truncates) `<id>.index` in `dir`.
    pub fn create(dir: &Path, id: u32, hasher: Hasher) -> Result<Self, SegmentError> {
        let path = file_path(dir, id, FileKind::Index);
        Self::create_at(id, path, None, hasher)
    }

    /// Writes to `<id>.index.tmp`; [`seal`](IndexFile::seal) renames it over
    /// `<id>.index`. Used when regenerating an index during recovery.
    pub fn create_temp(dir: &Path, id: u32, hasher: Hasher) -> Result<Self, SegmentError> {
        let final_path = file_path(dir, id, FileKind::Index);
        Self::create_at(id, temp_path(&final_path), Some(final_path), hasher)
    }

    fn create_at(
        id: u32,
        path: PathBuf,
        final_path: Option<PathBuf>,
        hasher: Hasher,
    ) -> Result<Self, SegmentError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            id,
            path,
            final_path,
            writer: BufWriter::with_capacity(64 * 1024, file),
            hasher,
            buf: Vec::with_capacity(256),
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Opens `path` for a sequential scan.
    pub fn iter(path: &Path, file_id: u32) -> Result<IndexIter, SegmentError> {
        EntryIter::open(path, file_id)
    }

    pub fn append(&mut self, entry: &IndexEntry) -> Result<(), SegmentError> {
        entry.encode(&self.hasher, &mut self.buf)?;
        self.writer.write_all(&self.buf)?;
        Ok(())
    }

    /// Appends the entry describing a record just written to the data file.
    pub fn append_location(
        &mut self,
        key: &[u8],
        location: &RecordLocation,
        sequence_number: u64,
    ) -> Result<(), SegmentError> {
        self.append(&IndexEntry {
            key: key.to_vec(),
            record_size: location.record_size,
            record_offset: location.record_offset,
            sequence_number,
        })
    }

    /// Flushes buffered entries and fsyncs.
    pub fn sync(&mut self) -> Result<(), SegmentError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Completes the file, moving a temporary file into place.
    pub fn seal(mut self) -> Result<(), SegmentError> {
        self.sync()?;
        if let Some(final_path) = self.final_path.take() {
            fs::rename(&self.path, &final_path)?;
            debug!(file_id = self.id, path = %final_path.display(), "index file regenerated");
        }
        Ok(())
    }
}
