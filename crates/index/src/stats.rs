/// Point-in-time counters for one table-segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentStats {
    pub entries: usize,
    pub buckets: usize,
    pub arena_capacity: usize,
    pub arena_live_bytes: usize,
    pub arena_free_bytes: usize,
    pub rehashes: u64,
    pub defragmentations: u64,
}

/// Aggregated counters for the whole table.
///
/// Gathered one table-segment at a time, so under concurrent writes the
/// totals are approximate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    pub segments: Vec<SegmentStats>,
}

impl TableStats {
    #[must_use]
    pub fn entries(&self) -> usize {
        self.segments.iter().map(|s| s.entries).sum()
    }

    #[must_use]
    pub fn buckets(&self) -> usize {
        self.segments.iter().map(|s| s.buckets).sum()
    }

    /// Bytes reserved by all arenas.
    #[must_use]
    pub fn arena_capacity(&self) -> usize {
        self.segments.iter().map(|s| s.arena_capacity).sum()
    }

    #[must_use]
    pub fn arena_live_bytes(&self) -> usize {
        self.segments.iter().map(|s| s.arena_live_bytes).sum()
    }

    #[must_use]
    pub fn arena_free_bytes(&self) -> usize {
        self.segments.iter().map(|s| s.arena_free_bytes).sum()
    }

    #[must_use]
    pub fn rehashes(&self) -> u64 {
        self.segments.iter().map(|s| s.rehashes).sum()
    }

    #[must_use]
    pub fn defragmentations(&self) -> u64 {
        self.segments.iter().map(|s| s.defragmentations).sum()
    }
}
