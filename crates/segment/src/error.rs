use std::io;

use hasher::HashError;
use thiserror::Error;

/// Errors that can occur while reading or writing segment files.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A frame's stored checksum does not match its contents.
    #[error("checksum mismatch in file {file_id} at offset {offset}")]
    Checksum { file_id: u32, offset: u64 },

    /// A frame runs past the end of the written data.
    #[error("truncated frame in file {file_id} at offset {offset}")]
    Truncated { file_id: u32, offset: u64 },

    /// A frame header holds values that cannot be valid.
    #[error("corrupt frame in file {file_id} at offset {offset}: {reason}")]
    Corrupt {
        file_id: u32,
        offset: u64,
        reason: String,
    },

    /// Keys must be 1..=255 bytes.
    #[error("invalid key length {0} (expected 1..=255)")]
    InvalidKey(usize),

    /// The record would not fit in a single segment.
    #[error("record of {size} bytes exceeds the segment limit of {limit} bytes")]
    RecordTooLarge { size: u64, limit: u64 },

    /// An append was attempted on a sealed segment.
    #[error("file {0} is sealed")]
    Sealed(u32),

    /// The checksum algorithm tag of a frame is unknown or not compiled in.
    #[error(transparent)]
    Hash(#[from] HashError),
}
