//! # Index - off-heap hash table for EddyKV
//!
//! Maps keys to fixed-size values ([`IndexMeta`] in the store) without a heap
//! allocation per entry. Entries are packed into [`Arena`]s: contiguous byte
//! regions addressed by offset, bounds-checked on every access and released
//! explicitly.
//!
//! ## Layout
//!
//! ```text
//! OffHeapTable
//!   ├─ table-segment 0: RwLock { Arena, buckets[] }
//!   ├─ table-segment 1: RwLock { Arena, buckets[] }
//!   └─ ...
//! ```
//!
//! The high bits of the key hash select the table-segment, the low bits the
//! bucket. Buckets hold singly linked chains threaded through the arena.
//!
//! ## Example
//!
//! ```rust
//! use hasher::Hasher;
//! use index::{IndexMeta, OffHeapTable, TableOptions};
//!
//! let table: OffHeapTable<IndexMeta> =
//!     OffHeapTable::new(Hasher::Crc32, &TableOptions::default()).unwrap();
//! let meta = IndexMeta { file_id: 1, value_offset: 30, value_size: 5, sequence_number: 7 };
//! table.put(b"key", &meta).unwrap();
//! assert_eq!(table.get(b"key").unwrap(), Some(meta));
//! ```

mod arena;
mod codec;
mod error;
mod stats;
mod table;
mod table_segment;

pub use arena::{Addr, Arena, MAX_ARENA_BYTES, NIL};
pub use codec::{IndexMeta, ValueCodec};
pub use error::IndexError;
pub use stats::{SegmentStats, TableStats};
pub use table::{OffHeapTable, TableOptions};

#[cfg(test)]
mod tests;
