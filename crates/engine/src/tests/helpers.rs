use std::fs;
use std::path::{Path, PathBuf};

use segment::naming::file_path;
use segment::FileKind;

use crate::StoreConfig;

/// Small files and no background workers, so tests decide when compaction
/// runs.
pub fn small_config() -> StoreConfig {
    StoreConfig {
        max_file_size: 4096,
        table_segments: 4,
        initial_buckets_per_segment: 16,
        initial_arena_bytes: 4096,
        compaction_threads: 0,
        ..StoreConfig::default()
    }
}

pub fn count_files(dir: &Path, suffix: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(suffix))
        .count()
}

pub fn data_path(dir: &Path, id: u32) -> PathBuf {
    file_path(dir, id, FileKind::Data)
}

pub fn index_path(dir: &Path, id: u32) -> PathBuf {
    file_path(dir, id, FileKind::Index)
}

/// A value that makes every record exactly 128 bytes with a 6-byte key.
pub fn value_100(tag: usize) -> Vec<u8> {
    format!("{tag:0>100}").into_bytes()
}
