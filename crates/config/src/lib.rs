//! # Config - tuning knobs for an EddyKV store
//!
//! [`StoreConfig`] is a plain struct with sensible defaults. Build one with
//! struct update syntax, or load overrides from `EDDY_*` environment
//! variables with [`StoreConfig::from_env`]:
//!
//! ```text
//! EDDY_HASH                  hash algorithm: xx | murmur3 | crc32   (default: xx)
//! EDDY_MAX_FILE_SIZE         data file rotation size in bytes       (default: 67108864)
//! EDDY_TABLE_SEGMENTS        index table-segments, power of two     (default: 16)
//! EDDY_INITIAL_BUCKETS       buckets per table-segment, power of 2  (default: 1024)
//! EDDY_ARENA_BYTES           initial arena bytes per table-segment  (default: 262144)
//! EDDY_LOAD_FACTOR           bucket load factor before resizing     (default: 0.75)
//! EDDY_COMPACTION_THRESHOLD  stale fraction that triggers compaction (default: 0.75)
//! EDDY_COMPACTION_THREADS    background compaction workers, 0 = off (default: 1)
//! EDDY_SYNC_WRITES           fsync every append                     (default: false)
//! EDDY_CLEANUP_TOMBSTONES    compact tombstone files on open        (default: true)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use config::StoreConfig;
//! use hasher::HashAlgorithm;
//!
//! let cfg = StoreConfig {
//!     hash_algorithm: HashAlgorithm::Murmur3,
//!     max_file_size: 4 * 1024 * 1024,
//!     ..StoreConfig::default()
//! };
//! cfg.validate().unwrap();
//! ```

use std::fmt;
use std::str::FromStr;

use hasher::{HashAlgorithm, HashError, Hasher};
use thiserror::Error;
use tracing::debug;

/// Smallest accepted `max_file_size`.
pub const MIN_FILE_SIZE: u32 = 256;

/// Errors produced while building or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// An environment variable is set but cannot be parsed.
    #[error("cannot parse {var}={value:?}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// No usable hashing algorithm for the requested one.
    #[error(transparent)]
    Hasher(#[from] HashError),
}

/// Probe deciding whether a hash algorithm may be used in this process.
pub type HashProbe = fn(HashAlgorithm) -> bool;

/// Everything a store needs to know before it opens.
#[derive(Clone)]
pub struct StoreConfig {
    /// Algorithm for key placement and record checksums. `Xx` degrades to
    /// `Crc32` when unavailable.
    pub hash_algorithm: HashAlgorithm,
    /// A data file is sealed once the next record would push it past this.
    /// Capped at `u32::MAX` because index metadata stores 32-bit offsets.
    pub max_file_size: u32,
    /// Number of independently locked index table-segments (power of two).
    pub table_segments: usize,
    /// Starting bucket count per table-segment (power of two).
    pub initial_buckets_per_segment: usize,
    /// Starting arena size per table-segment.
    pub initial_arena_bytes: usize,
    /// Bucket load factor that triggers a table-segment resize.
    pub load_factor: f32,
    /// A sealed data file is compacted once `stale / total >= threshold`.
    pub compaction_threshold: f64,
    /// Background compaction workers. `0` leaves compaction to explicit calls.
    pub compaction_threads: usize,
    /// fsync after every record and tombstone append.
    pub sync_writes: bool,
    /// Rewrite tombstone files at open, keeping only those still needed.
    pub clean_up_tombstones_during_open: bool,
    /// Availability probe consulted by hasher selection.
    pub hash_probe: HashProbe,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            max_file_size: 64 * 1024 * 1024,
            table_segments: 16,
            initial_buckets_per_segment: 1024,
            initial_arena_bytes: 256 * 1024,
            load_factor: 0.75,
            compaction_threshold: 0.75,
            compaction_threads: 1,
            sync_writes: false,
            clean_up_tombstones_during_open: true,
            hash_probe: HashAlgorithm::is_available,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("hash_algorithm", &self.hash_algorithm)
            .field("max_file_size", &self.max_file_size)
            .field("table_segments", &self.table_segments)
            .field("initial_buckets_per_segment", &self.initial_buckets_per_segment)
            .field("initial_arena_bytes", &self.initial_arena_bytes)
            .field("load_factor", &self.load_factor)
            .field("compaction_threshold", &self.compaction_threshold)
            .field("compaction_threads", &self.compaction_threads)
            .field("sync_writes", &self.sync_writes)
            .field(
                "clean_up_tombstones_during_open",
                &self.clean_up_tombstones_during_open,
            )
            .finish_non_exhaustive()
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl StoreConfig {
    /// Checks every field against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_size < MIN_FILE_SIZE {
            return Err(invalid(
                "max_file_size",
                format!("{} is below the minimum of {MIN_FILE_SIZE}", self.max_file_size),
            ));
        }
        if !self.table_segments.is_power_of_two() || self.table_segments > 1 << 16 {
            return Err(invalid(
                "table_segments",
                format!("{} is not a power of two in 1..=65536", self.table_segments),
            ));
        }
        if !self.initial_buckets_per_segment.is_power_of_two() {
            return Err(invalid(
                "initial_buckets_per_segment",
                format!("{} is not a power of two", self.initial_buckets_per_segment),
            ));
        }
        if !(self.load_factor > 0.0 && self.load_factor <= 16.0) {
            return Err(invalid(
                "load_factor",
                format!("{} is outside (0, 16]", self.load_factor),
            ));
        }
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return Err(invalid(
                "compaction_threshold",
                format!("{} is outside (0, 1]", self.compaction_threshold),
            ));
        }
        if self.compaction_threads > 64 {
            return Err(invalid(
                "compaction_threads",
                format!("{} exceeds 64", self.compaction_threads),
            ));
        }
        Ok(())
    }

    /// Resolves the configured algorithm through its fallback chain.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Hasher`] when no candidate is usable.
    pub fn resolve_hasher(&self) -> Result<Hasher, ConfigError> {
        Ok(Hasher::select(self.hash_algorithm, self.hash_probe)?)
    }

    /// Defaults overridden by any `EDDY_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](StoreConfig::from_env) but reads variables through
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let cfg = Self {
            hash_algorithm: env_or(&lookup, "EDDY_HASH", d.hash_algorithm)?,
            max_file_size: env_or(&lookup, "EDDY_MAX_FILE_SIZE", d.max_file_size)?,
            table_segments: env_or(&lookup, "EDDY_TABLE_SEGMENTS", d.table_segments)?,
            initial_buckets_per_segment: env_or(
                &lookup,
                "EDDY_INITIAL_BUCKETS",
                d.initial_buckets_per_segment,
            )?,
            initial_arena_bytes: env_or(&lookup, "EDDY_ARENA_BYTES", d.initial_arena_bytes)?,
            load_factor: env_or(&lookup, "EDDY_LOAD_FACTOR", d.load_factor)?,
            compaction_threshold: env_or(
                &lookup,
                "EDDY_COMPACTION_THRESHOLD",
                d.compaction_threshold,
            )?,
            compaction_threads: env_or(&lookup, "EDDY_COMPACTION_THREADS", d.compaction_threads)?,
            sync_writes: env_or(&lookup, "EDDY_SYNC_WRITES", d.sync_writes)?,
            clean_up_tombstones_during_open: env_or(
                &lookup,
                "EDDY_CLEANUP_TOMBSTONES",
                d.clean_up_tombstones_during_open,
            )?,
            hash_probe: d.hash_probe,
        };
        debug!(config = ?cfg, "configuration loaded");
        Ok(cfg)
    }
}

/// Parses `var` if set, otherwise returns `default`.
fn env_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Env {
                var,
                reason: e.to_string(),
                value,
            })
        }
    }
}
