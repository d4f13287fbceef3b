//! Fixed-size value encoding and the record metadata stored in the index.

use byteorder::{ByteOrder, LittleEndian};

/// A value type the table can store inline in its entries.
///
/// Every value occupies exactly [`SERIALIZED_SIZE`](ValueCodec::SERIALIZED_SIZE)
/// bytes, which keeps the per-entry overhead fixed. `encode` and `decode` are
/// always handed slices of exactly that length.
pub trait ValueCodec: Copy + PartialEq + std::fmt::Debug {
    const SERIALIZED_SIZE: usize;

    fn encode(&self, buf: &mut [u8]);

    fn decode(buf: &[u8]) -> Self;
}

/// Where the current value of a key lives on disk.
///
/// Layout (20 bytes, little-endian):
///
/// ```text
/// [file_id: u32][value_offset: u32][value_size: u32][sequence_number: u64]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexMeta {
    /// Numeric id of the data segment holding the record.
    pub file_id: u32,
    /// Byte offset of the value (not the record header) inside that segment.
    pub value_offset: u32,
    /// Length of the value in bytes.
    pub value_size: u32,
    /// Sequence number the record was written with.
    pub sequence_number: u64,
}

impl IndexMeta {
    pub const SERIALIZED_SIZE: usize = 4 + 4 + 4 + 8;

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut buf = [0u8; Self::SERIALIZED_SIZE];
        self.encode(&mut buf);
        buf
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8; Self::SERIALIZED_SIZE]) -> Self {
        Self::decode(buf)
    }

    /// `true` if both point at the same bytes on disk.
    #[must_use]
    pub fn same_location(&self, other: &IndexMeta) -> bool {
        self.file_id == other.file_id && self.value_offset == other.value_offset
    }
}

impl ValueCodec for IndexMeta {
    const SERIALIZED_SIZE: usize = IndexMeta::SERIALIZED_SIZE;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.file_id);
        LittleEndian::write_u32(&mut buf[4..8], self.value_offset);
        LittleEndian::write_u32(&mut buf[8..12], self.value_size);
        LittleEndian::write_u64(&mut buf[12..20], self.sequence_number);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            file_id: LittleEndian::read_u32(&buf[0..4]),
            value_offset: LittleEndian::read_u32(&buf[4..8]),
            value_size: LittleEndian::read_u32(&buf[8..12]),
            sequence_number: LittleEndian::read_u64(&buf[12..20]),
        }
    }
}
