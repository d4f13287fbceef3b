//! Binary framing shared by data, index and tombstone files.
//!
//! Every frame starts with a checksum followed by the tag of the hash
//! algorithm that produced it. The checksum covers every byte after the
//! checksum field, so a frame can be verified with nothing but its own bytes.
//!
//! ## Data record (22-byte header)
//!
//! ```text
//! [checksum: u64][hash_tag: u8][key_size: u8][value_size: u32][seq: u64][key][value]
//! ```
//!
//! ## Tombstone entry (18-byte header)
//!
//! ```text
//! [checksum: u64][hash_tag: u8][key_size: u8][seq: u64][key]
//! ```
//!
//! ## Index entry (26-byte header)
//!
//! ```text
//! [checksum: u64][hash_tag: u8][key_size: u8][record_size: u32][record_offset: u32][seq: u64][key]
//! ```
//!
//! All integers are little-endian.

use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use hasher::{HashError, Hasher};

use crate::error::SegmentError;

/// Size of the leading checksum field.
pub const CHECKSUM_SIZE: usize = 8;

/// checksum + hash_tag + key_size + value_size + seq.
pub const RECORD_HEADER_SIZE: usize = 8 + 1 + 1 + 4 + 8;

/// checksum + hash_tag + key_size + seq.
pub const TOMBSTONE_HEADER_SIZE: usize = 8 + 1 + 1 + 8;

/// checksum + hash_tag + key_size + record_size + record_offset + seq.
pub const INDEX_ENTRY_HEADER_SIZE: usize = 8 + 1 + 1 + 4 + 4 + 8;

/// Keys are length-prefixed by a single byte.
pub const MAX_KEY_SIZE: usize = u8::MAX as usize;

/// Rejects empty keys and keys that do not fit the one-byte length field.
pub fn check_key(key: &[u8]) -> Result<(), SegmentError> {
    if key.is_empty() || key.len() > MAX_KEY_SIZE {
        return Err(SegmentError::InvalidKey(key.len()));
    }
    Ok(())
}

/// On-disk size of a data record.
#[must_use]
pub fn record_size(key_len: usize, value_len: usize) -> u64 {
    (RECORD_HEADER_SIZE + key_len) as u64 + value_len as u64
}

/// Writes the checksum of `frame[CHECKSUM_SIZE..]` into the first 8 bytes.
fn seal(hasher: &Hasher, frame: &mut [u8]) {
    let sum = hasher.hash(&frame[CHECKSUM_SIZE..]);
    LittleEndian::write_u64(&mut frame[..CHECKSUM_SIZE], sum);
}

/// Recomputes a frame's checksum with the algorithm named by its tag.
///
/// An unknown tag is reported as a checksum failure: it is what garbage at a
/// torn tail looks like. A known tag whose algorithm is not compiled in is a
/// real [`HashError`].
pub(crate) fn verify(frame: &[u8], file_id: u32, offset: u64) -> Result<(), SegmentError> {
    let stored = LittleEndian::read_u64(&frame[..CHECKSUM_SIZE]);
    let hasher = match Hasher::for_tag(frame[CHECKSUM_SIZE]) {
        Ok(h) => h,
        Err(HashError::UnknownTag(_)) => return Err(SegmentError::Checksum { file_id, offset }),
        Err(e) => return Err(e.into()),
    };
    if hasher.hash(&frame[CHECKSUM_SIZE..]) != stored {
        return Err(SegmentError::Checksum { file_id, offset });
    }
    Ok(())
}

// -------------------- Data records --------------------

/// A key/value pair as stored in a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub sequence_number: u64,
}

/// Where a record sits inside its data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub file_id: u32,
    pub record_offset: u32,
    pub record_size: u32,
    pub value_offset: u32,
    pub value_size: u32,
}

/// Decoded fixed part of a data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub checksum: u64,
    pub hash_tag: u8,
    pub key_size: u8,
    pub value_size: u32,
    pub sequence_number: u64,
}

impl RecordHeader {
    /// `buf` must hold at least [`RECORD_HEADER_SIZE`] bytes.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            checksum: LittleEndian::read_u64(&buf[0..8]),
            hash_tag: buf[8],
            key_size: buf[9],
            value_size: LittleEndian::read_u32(&buf[10..14]),
            sequence_number: LittleEndian::read_u64(&buf[14..22]),
        }
    }

    #[must_use]
    pub fn record_size(&self) -> u64 {
        record_size(usize::from(self.key_size), self.value_size as usize)
    }
}

/// Serializes a data record into `buf`, replacing its contents.
///
/// # Errors
///
/// Returns [`SegmentError::InvalidKey`] for empty or oversized keys and
/// [`SegmentError::RecordTooLarge`] if the value length overflows `u32`.
pub fn encode_record(
    hasher: &Hasher,
    key: &[u8],
    value: &[u8],
    sequence_number: u64,
    buf: &mut Vec<u8>,
) -> Result<(), SegmentError> {
    check_key(key)?;
    let value_size = u32::try_from(value.len()).map_err(|_| SegmentError::RecordTooLarge {
        size: record_size(key.len(), value.len()),
        limit: u64::from(u32::MAX),
    })?;

    buf.clear();
    buf.reserve(RECORD_HEADER_SIZE + key.len() + value.len());
    buf.extend_from_slice(&[0u8; CHECKSUM_SIZE]);
    buf.write_u8(hasher.tag())?;
    buf.write_u8(key.len() as u8)?;
    buf.write_u32::<LittleEndian>(value_size)?;
    buf.write_u64::<LittleEndian>(sequence_number)?;
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    seal(hasher, buf);
    Ok(())
}

/// Verifies and parses a complete record frame.
pub fn decode_record(frame: &[u8], file_id: u32, offset: u64) -> Result<Record, SegmentError> {
    if frame.len() < RECORD_HEADER_SIZE {
        return Err(SegmentError::Truncated { file_id, offset });
    }
    let header = RecordHeader::decode(frame);
    if header.record_size() != frame.len() as u64 {
        return Err(SegmentError::Corrupt {
            file_id,
            offset,
            reason: format!(
                "header describes {} bytes, frame holds {}",
                header.record_size(),
                frame.len()
            ),
        });
    }
    verify(frame, file_id, offset)?;

    let key_end = RECORD_HEADER_SIZE + usize::from(header.key_size);
    Ok(Record {
        key: frame[RECORD_HEADER_SIZE..key_end].to_vec(),
        value: frame[key_end..].to_vec(),
        sequence_number: header.sequence_number,
    })
}

// -------------------- Tombstones --------------------

/// A durable record of a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TombstoneEntry {
    pub key: Vec<u8>,
    pub sequence_number: u64,
}

impl TombstoneEntry {
    #[must_use]
    pub fn encoded_size(&self) -> u64 {
        (TOMBSTONE_HEADER_SIZE + self.key.len()) as u64
    }

    pub fn encode(&self, hasher: &Hasher, buf: &mut Vec<u8>) -> Result<(), SegmentError> {
        check_key(&self.key)?;
        buf.clear();
        buf.extend_from_slice(&[0u8; CHECKSUM_SIZE]);
        buf.write_u8(hasher.tag())?;
        buf.write_u8(self.key.len() as u8)?;
        buf.write_u64::<LittleEndian>(self.sequence_number)?;
        buf.extend_from_slice(&self.key);
        seal(hasher, buf);
        Ok(())
    }

    pub fn decode(frame: &[u8], file_id: u32, offset: u64) -> Result<Self, SegmentError> {
        if frame.len() < TOMBSTONE_HEADER_SIZE
            || frame.len() != TOMBSTONE_HEADER_SIZE + usize::from(frame[9])
        {
            return Err(SegmentError::Truncated { file_id, offset });
        }
        verify(frame, file_id, offset)?;
        Ok(Self {
            sequence_number: LittleEndian::read_u64(&frame[10..18]),
            key: frame[TOMBSTONE_HEADER_SIZE..].to_vec(),
        })
    }
}

// -------------------- Index entries --------------------

/// Points at one record of the same-id data file, without its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub record_size: u32,
    pub record_offset: u32,
    pub sequence_number: u64,
}

impl IndexEntry {
    /// Byte offset of the value inside the data file.
    #[must_use]
    pub fn value_offset(&self) -> u32 {
        self.record_offset + (RECORD_HEADER_SIZE + self.key.len()) as u32
    }

    #[must_use]
    pub fn value_size(&self) -> u32 {
        self.record_size
            .saturating_sub((RECORD_HEADER_SIZE + self.key.len()) as u32)
    }

    pub fn encode(&self, hasher: &Hasher, buf: &mut Vec<u8>) -> Result<(), SegmentError> {
        check_key(&self.key)?;
        buf.clear();
        buf.extend_from_slice(&[0u8; CHECKSUM_SIZE]);
        buf.write_u8(hasher.tag())?;
        buf.write_u8(self.key.len() as u8)?;
        buf.write_u32::<LittleEndian>(self.record_size)?;
        buf.write_u32::<LittleEndian>(self.record_offset)?;
        buf.write_u64::<LittleEndian>(self.sequence_number)?;
        buf.extend_from_slice(&self.key);
        seal(hasher, buf);
        Ok(())
    }

    pub fn decode(frame: &[u8], file_id: u32, offset: u64) -> Result<Self, SegmentError> {
        if frame.len() < INDEX_ENTRY_HEADER_SIZE
            || frame.len() != INDEX_ENTRY_HEADER_SIZE + usize::from(frame[9])
        {
            return Err(SegmentError::Truncated { file_id, offset });
        }
        verify(frame, file_id, offset)?;
        Ok(Self {
            record_size: LittleEndian::read_u32(&frame[10..14]),
            record_offset: LittleEndian::read_u32(&frame[14..18]),
            sequence_number: LittleEndian::read_u64(&frame[18..26]),
            key: frame[INDEX_ENTRY_HEADER_SIZE..].to_vec(),
        })
    }
}

// -------------------- Sequential frame reading --------------------

/// Outcome of pulling one frame off a sequential reader.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameRead {
    /// Clean end of input at a frame boundary.
    Eof,
    /// Input ended part-way through a frame.
    Partial,
    Complete,
}

/// Reads until `buf` is full or the input ends. Returns the bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads one frame into `buf`: a fixed header, then `tail_len(header)` bytes.
///
/// A header announcing a frame longer than `max_len` is reported as
/// [`FrameRead::Partial`] without allocating for it.
pub(crate) fn read_frame<R, F>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    header_len: usize,
    max_len: u64,
    tail_len: F,
) -> io::Result<FrameRead>
where
    R: Read,
    F: Fn(&[u8]) -> usize,
{
    buf.clear();
    buf.resize(header_len, 0);
    match fill(reader, buf)? {
        0 => return Ok(FrameRead::Eof),
        n if n < header_len => return Ok(FrameRead::Partial),
        _ => {}
    }

    let tail = tail_len(buf);
    if (header_len + tail) as u64 > max_len {
        return Ok(FrameRead::Partial);
    }
    buf.resize(header_len + tail, 0);
    if fill(reader, &mut buf[header_len..])? < tail {
        return Ok(FrameRead::Partial);
    }
    Ok(FrameRead::Complete)
}
