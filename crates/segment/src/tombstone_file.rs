use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use hasher::Hasher;
use tracing::{debug, warn};

use crate::entry_iter::{EntryIter, TombstoneIter};
use crate::error::SegmentError;
use crate::format::TombstoneEntry;
use crate::naming::{file_path, FileKind};

/// Append-only file of deletion markers.
///
/// Entries are written unbuffered so a delete is on disk (or in the page
/// cache, without `sync_writes`) when `append` returns, like data records.
pub struct TombstoneFile {
    id: u32,
    path: PathBuf,
    file: File,
    size: u64,
    sync_writes: bool,
    hasher: Hasher,
    buf: Vec<u8>,
}

impl std::fmt::Debug for TombstoneFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TombstoneFile")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish()
    }
}

impl TombstoneFile {
    /// Creates a new, empty `<id>.tombstone` in `dir`.
    pub fn create(
        dir: &Path,
        id: u32,
        hasher: Hasher,
        sync_writes: bool,
    ) -> Result<Self, SegmentError> {
        let path = file_path(dir, id, FileKind::Tombstone);
        let file = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&path)?;
        debug!(file_id = id, "tombstone file created");
        Ok(Self {
            id,
            path,
            file,
            size: 0,
            sync_writes,
            hasher,
            buf: Vec::with_capacity(256),
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Opens `path` for a sequential scan.
    pub fn iter(path: &Path, file_id: u32) -> Result<TombstoneIter, SegmentError> {
        EntryIter::open(path, file_id)
    }

    pub fn append(&mut self, entry: &TombstoneEntry) -> Result<(), SegmentError> {
        entry.encode(&self.hasher, &mut self.buf)?;
        if let Err(e) = self.file.write_all(&self.buf) {
            if let Err(trunc) = self.file.set_len(self.size) {
                warn!(file_id = self.id, error = %trunc, "failed to discard partial tombstone");
            }
            return Err(e.into());
        }
        if self.sync_writes {
            self.file.sync_data()?;
        }
        self.size += self.buf.len() as u64;
        Ok(())
    }

    pub fn sync(&self) -> Result<(), SegmentError> {
        self.file.sync_all()?;
        Ok(())
    }
}
