use thiserror::Error;

/// Errors raised by the off-heap table and its arenas.
///
/// Apart from [`IndexError::KeyTooLarge`] every variant means the table can
/// no longer be trusted: out-of-bounds addresses and broken chains only occur
/// when arena memory has been corrupted.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The table (or one of its arenas) was torn down by `release()`.
    #[error("table memory has been released")]
    Released,

    /// An access fell outside the allocated extent of an arena.
    #[error("address {offset}+{len} is outside arena {arena} (allocated extent {extent} bytes)")]
    OutOfBounds {
        arena: u32,
        offset: u32,
        len: usize,
        extent: usize,
    },

    /// An address minted by one arena was presented to another.
    #[error("address belongs to arena {found}, not arena {expected}")]
    ForeignArena { expected: u32, found: u32 },

    /// An arena would have to grow past the addressable limit.
    #[error("arena {arena} cannot grow to {requested} bytes (limit {limit})")]
    CapacityExceeded {
        arena: u32,
        requested: usize,
        limit: usize,
    },

    /// Key longer than the table accepts.
    #[error("key of {len} bytes exceeds the maximum of {max}")]
    KeyTooLarge { len: usize, max: usize },

    /// A chain walk or relink found an impossible structure.
    #[error("table segment {segment} is corrupt: {reason}")]
    Corrupt { segment: usize, reason: String },

    /// The table was constructed with unusable options.
    #[error("invalid table options: {0}")]
    InvalidOptions(String),
}
