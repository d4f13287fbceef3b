//! # Segment - log-structured files for EddyKV
//!
//! All persistent state of a store lives in one directory as numbered,
//! append-only files:
//!
//! | File             | Contents                                          |
//! |------------------|---------------------------------------------------|
//! | `<id>.data`      | Records (key, value, sequence number)             |
//! | `<id>.datac`     | Records, produced by an offline compaction pass    |
//! | `<id>.index`     | One entry per record of the same-id data file     |
//! | `<id>.tombstone` | Deletion markers                                   |
//!
//! Every frame carries its own checksum and the tag of the algorithm that
//! computed it (see [`format`]). Ids come from a single counter owned by the
//! [`FileSet`] and are never reused.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hasher::Hasher;
//! use segment::FileSet;
//!
//! let mut files = FileSet::open("db".as_ref(), Hasher::Crc32, false).unwrap();
//! let mut active = files.create_active_segment().unwrap();
//! let mut buf = Vec::new();
//! let loc = active.append(&Hasher::Crc32, b"k", b"v", 1, &mut buf).unwrap();
//! let rec = active.data().read_record(loc.record_offset, loc.record_size).unwrap();
//! assert_eq!(rec.value, b"v");
//! ```

mod data_file;
mod entry_iter;
mod error;
mod file_set;
pub mod format;
mod index_file;
mod io;
pub mod naming;
mod tombstone_file;

pub use data_file::{DataFile, RecordIter};
pub use entry_iter::{EntryIter, IndexIter, KeyedFrame, TombstoneIter};
pub use error::SegmentError;
pub use file_set::{ActiveSegment, FileSet};
pub use format::{IndexEntry, Record, RecordLocation, TombstoneEntry};
pub use index_file::IndexFile;
pub use naming::FileKind;
pub use tombstone_file::TombstoneFile;

#[cfg(test)]
mod tests;
