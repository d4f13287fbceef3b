use std::fs::File;
use std::io::BufReader;
use std::marker::PhantomData;
use std::path::Path;

use crate::error::SegmentError;
use crate::format::{read_frame, FrameRead, IndexEntry, TombstoneEntry};
use crate::format::{INDEX_ENTRY_HEADER_SIZE, TOMBSTONE_HEADER_SIZE};

/// A frame type whose variable part is only the key, with `key_size` at byte 9.
pub trait KeyedFrame: Sized {
    const HEADER_SIZE: usize;

    fn decode(frame: &[u8], file_id: u32, offset: u64) -> Result<Self, SegmentError>;
}

impl KeyedFrame for IndexEntry {
    const HEADER_SIZE: usize = INDEX_ENTRY_HEADER_SIZE;

    fn decode(frame: &[u8], file_id: u32, offset: u64) -> Result<Self, SegmentError> {
        IndexEntry::decode(frame, file_id, offset)
    }
}

impl KeyedFrame for TombstoneEntry {
    const HEADER_SIZE: usize = TOMBSTONE_HEADER_SIZE;

    fn decode(frame: &[u8], file_id: u32, offset: u64) -> Result<Self, SegmentError> {
        TombstoneEntry::decode(frame, file_id, offset)
    }
}

/// Sequential reader over an index or tombstone file.
///
/// Yields entries in file order and stops after the first error.
pub struct EntryIter<T> {
    file_id: u32,
    reader: BufReader<File>,
    offset: u64,
    buf: Vec<u8>,
    done: bool,
    _entry: PhantomData<T>,
}

pub type IndexIter = EntryIter<IndexEntry>;
pub type TombstoneIter = EntryIter<TombstoneEntry>;

impl<T: KeyedFrame> EntryIter<T> {
    pub(crate) fn open(path: &Path, file_id: u32) -> Result<Self, SegmentError> {
        let file = File::open(path)?;
        Ok(Self {
            file_id,
            reader: BufReader::with_capacity(64 * 1024, file),
            offset: 0,
            buf: Vec::with_capacity(T::HEADER_SIZE + 256),
            done: false,
            _entry: PhantomData,
        })
    }

    /// End offset of the last entry successfully yielded.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    fn read_next(&mut self) -> Result<Option<T>, SegmentError> {
        let offset = self.offset;
        match read_frame(&mut self.reader, &mut self.buf, T::HEADER_SIZE, u64::MAX, |h| {
            usize::from(h[9])
        })? {
            FrameRead::Eof => Ok(None),
            FrameRead::Partial => Err(SegmentError::Truncated {
                file_id: self.file_id,
                offset,
            }),
            FrameRead::Complete => {
                let entry = T::decode(&self.buf, self.file_id, offset)?;
                self.offset += self.buf.len() as u64;
                Ok(Some(entry))
            }
        }
    }
}

impl<T: KeyedFrame> Iterator for EntryIter<T> {
    type Item = Result<T, SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(entry)) => Some(Ok(entry)),
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
