use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Take, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use hasher::Hasher;
use tracing::{debug, warn};

use crate::error::SegmentError;
use crate::format::{
    decode_record, encode_record, read_frame, FrameRead, IndexEntry, Record, RecordHeader,
    RecordLocation, RECORD_HEADER_SIZE,
};
use crate::io::read_exact_at;
use crate::naming::{file_path, FileKind};

/// An append-only file of data records.
///
/// Exactly one data file per store is writable at a time. Appends are
/// serialized by the caller; `read_at` and `read_record` may run concurrently
/// with them from any thread because they use positional reads and never
/// look past the published size.
///
/// The published size is only advanced after a record's bytes are fully
/// written, so an offset handed out by [`append`](DataFile::append) is always
/// readable.
pub struct DataFile {
    id: u32,
    kind: FileKind,
    path: PathBuf,
    file: File,
    size: AtomicU64,
    sealed: AtomicBool,
    sync_writes: bool,
}

impl std::fmt::Debug for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFile")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &self.size())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

impl DataFile {
    /// Creates a new, empty, writable data file `<id>.data` in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the file already exists or cannot be created.
    pub fn create(dir: &Path, id: u32, sync_writes: bool) -> Result<Self, SegmentError> {
        let path = file_path(dir, id, FileKind::Data);
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(&path)?;
        debug!(file_id = id, path = %path.display(), "data file created");
        Ok(Self {
            id,
            kind: FileKind::Data,
            path,
            file,
            size: AtomicU64::new(0),
            sealed: AtomicBool::new(false),
            sync_writes,
        })
    }

    /// Opens an existing data or compacted file. The result is sealed.
    pub fn open(path: &Path, id: u32, kind: FileKind) -> Result<Self, SegmentError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            id,
            kind,
            path: path.to_path_buf(),
            file,
            size: AtomicU64::new(size),
            sealed: AtomicBool::new(true),
            sync_writes: false,
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of complete records in the file.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Appends one record and returns where it landed.
    ///
    /// `buf` is scratch space reused across calls. The caller must hold the
    /// store's append lock.
    ///
    /// # Errors
    ///
    /// [`SegmentError::Sealed`] after [`seal`](DataFile::seal), or I/O errors.
    /// A failed write is truncated away so the next append starts on a frame
    /// boundary.
    pub fn append(
        &self,
        hasher: &Hasher,
        key: &[u8],
        value: &[u8],
        sequence_number: u64,
        buf: &mut Vec<u8>,
    ) -> Result<RecordLocation, SegmentError> {
        if self.is_sealed() {
            return Err(SegmentError::Sealed(self.id));
        }
        encode_record(hasher, key, value, sequence_number, buf)?;

        let offset = self.size();
        let end = offset + buf.len() as u64;
        if end > u64::from(u32::MAX) {
            return Err(SegmentError::RecordTooLarge {
                size: buf.len() as u64,
                limit: u64::from(u32::MAX) - offset,
            });
        }

        if let Err(e) = (&self.file).write_all(buf) {
            if let Err(trunc) = self.file.set_len(offset) {
                warn!(file_id = self.id, error = %trunc, "failed to discard partial record");
            }
            return Err(e.into());
        }
        if self.sync_writes {
            self.file.sync_data()?;
        }
        self.size.store(end, Ordering::Release);

        let record_offset = offset as u32;
        let value_offset = record_offset + (RECORD_HEADER_SIZE + key.len()) as u32;
        Ok(RecordLocation {
            file_id: self.id,
            record_offset,
            record_size: buf.len() as u32,
            value_offset,
            value_size: value.len() as u32,
        })
    }

    /// Fills `buf` from `offset`, refusing to read past the published size.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), SegmentError> {
        let truncated = SegmentError::Truncated {
            file_id: self.id,
            offset,
        };
        match offset.checked_add(buf.len() as u64) {
            Some(end) if end <= self.size() => {}
            _ => return Err(truncated),
        }
        match read_exact_at(&self.file, buf, offset) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(truncated),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads and verifies the `record_size`-byte record at `record_offset`.
    pub fn read_record(&self, record_offset: u32, record_size: u32) -> Result<Record, SegmentError> {
        let mut frame = vec![0u8; record_size as usize];
        self.read_at(u64::from(record_offset), &mut frame)?;
        decode_record(&frame, self.id, u64::from(record_offset))
    }

    /// Sequential scan over every record, in file order.
    ///
    /// The iterator stops after the first error; [`RecordIter::valid_len`]
    /// then tells how many leading bytes held intact records.
    pub fn iter(&self) -> Result<RecordIter, SegmentError> {
        let size = self.size();
        let file = File::open(&self.path)?;
        Ok(RecordIter {
            file_id: self.id,
            reader: BufReader::with_capacity(64 * 1024, file.take(size)),
            limit: size,
            offset: 0,
            buf: Vec::with_capacity(1024),
            done: false,
            damaged: None,
        })
    }

    /// Flushes file contents to disk.
    pub fn sync(&self) -> Result<(), SegmentError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Makes the file immutable. Idempotent.
    pub fn seal(&self) -> Result<(), SegmentError> {
        if self.sealed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.file.sync_all()?;
        debug!(file_id = self.id, size = self.size(), "data file sealed");
        Ok(())
    }

    /// Cuts the file back to `valid_len` bytes, dropping a torn tail.
    pub fn repair(&self, valid_len: u64) -> Result<(), SegmentError> {
        let before = self.size();
        if valid_len >= before {
            return Ok(());
        }
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(valid_len)?;
        file.sync_all()?;
        self.size.store(valid_len, Ordering::Release);
        warn!(
            file_id = self.id,
            dropped = before - valid_len,
            "truncated torn tail of data file"
        );
        Ok(())
    }
}

/// Sequential reader over the records of one data file.
pub struct RecordIter {
    file_id: u32,
    reader: BufReader<Take<File>>,
    limit: u64,
    offset: u64,
    buf: Vec<u8>,
    done: bool,
    /// Offset of a complete frame whose checksum just failed.
    damaged: Option<u64>,
}

impl RecordIter {
    /// End offset of the last record successfully yielded.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    /// Steps over the record whose checksum failed on the previous call to
    /// `next` and resumes iteration after it.
    ///
    /// Returns the entry its header describes. The key is taken from the
    /// unverified frame. `None` if the previous item was not a checksum
    /// failure or the header is not self-consistent, in which case the
    /// iterator stays finished.
    pub fn skip_damaged(&mut self) -> Option<IndexEntry> {
        let offset = self.damaged.take()?;
        if offset != self.offset || self.buf.len() < RECORD_HEADER_SIZE {
            return None;
        }
        let header = RecordHeader::decode(&self.buf);
        if header.key_size == 0 || header.record_size() != self.buf.len() as u64 {
            return None;
        }
        let key_end = RECORD_HEADER_SIZE + usize::from(header.key_size);
        let record_size = self.buf.len() as u32;
        self.offset += u64::from(record_size);
        self.done = false;
        Some(IndexEntry {
            key: self.buf[RECORD_HEADER_SIZE..key_end].to_vec(),
            record_size,
            record_offset: offset as u32,
            sequence_number: header.sequence_number,
        })
    }

    fn read_next(&mut self) -> Result<Option<(RecordLocation, Record)>, SegmentError> {
        let offset = self.offset;
        let status = read_frame(
            &mut self.reader,
            &mut self.buf,
            RECORD_HEADER_SIZE,
            self.limit - offset,
            |h| usize::from(h[9]) + LittleEndian::read_u32(&h[10..14]) as usize,
        )?;
        match status {
            FrameRead::Eof => return Ok(None),
            FrameRead::Partial => {
                return Err(SegmentError::Truncated {
                    file_id: self.file_id,
                    offset,
                })
            }
            FrameRead::Complete => {}
        }

        let record = match decode_record(&self.buf, self.file_id, offset) {
            Ok(record) => record,
            Err(e) => {
                if matches!(e, SegmentError::Checksum { .. }) {
                    self.damaged = Some(offset);
                }
                return Err(e);
            }
        };
        if record.key.is_empty() {
            return Err(SegmentError::Corrupt {
                file_id: self.file_id,
                offset,
                reason: "empty key".to_string(),
            });
        }
        let record_size = self.buf.len() as u32;
        let location = RecordLocation {
            file_id: self.file_id,
            record_offset: offset as u32,
            record_size,
            value_offset: offset as u32 + (RECORD_HEADER_SIZE + record.key.len()) as u32,
            value_size: record.value.len() as u32,
        };
        self.offset += u64::from(record_size);
        Ok(Some((location, record)))
    }
}

impl Iterator for RecordIter {
    type Item = Result<(RecordLocation, Record), SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for RecordIter {}
