use std::io;

use config::ConfigError;
use index::IndexError;
use segment::SegmentError;
use thiserror::Error;

/// Errors returned by [`Store`](crate::Store) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid configuration, including "no usable hashing algorithm".
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record read back from disk does not match its checksum.
    #[error("checksum mismatch in data file {file_id} at offset {offset}")]
    Checksum { file_id: u32, offset: u64 },

    /// The index points at data that is missing or belongs to another key.
    #[error("index entry for key {key:?} is inconsistent: {reason}")]
    IndexInconsistency { key: String, reason: String },

    /// The in-memory index is unusable.
    #[error("index error: {0}")]
    Index(IndexError),

    /// A segment file could not be read or written.
    #[error("segment error: {0}")]
    Segment(SegmentError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl From<IndexError> for StoreError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Released => StoreError::Closed,
            other => StoreError::Index(other),
        }
    }
}

impl From<SegmentError> for StoreError {
    fn from(e: SegmentError) -> Self {
        match e {
            SegmentError::Io(io) => StoreError::Io(io),
            SegmentError::Checksum { file_id, offset } => StoreError::Checksum { file_id, offset },
            other => StoreError::Segment(other),
        }
    }
}

impl StoreError {
    pub(crate) fn inconsistency(key: &[u8], reason: impl Into<String>) -> Self {
        StoreError::IndexInconsistency {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: reason.into(),
        }
    }
}
