//! # Hasher - pluggable key hashing for EddyKV
//!
//! Every key that enters the store is hashed twice for two different reasons:
//! the off-heap index uses the hash for table-segment and bucket placement,
//! and the segment files use it as the per-record checksum. Both consumers go
//! through the same [`Hasher`], so the hash of a byte sequence must not depend
//! on where those bytes live. [`Hasher::hash`] and [`Hasher::hash_region`]
//! return identical values for identical content.
//!
//! ## Algorithms
//!
//! | Algorithm | Tag | Notes                                              |
//! |-----------|-----|----------------------------------------------------|
//! | `Xx`      | 1   | XXH64, seed 0. Default. Optional cargo feature.    |
//! | `Murmur3` | 2   | MurmurHash3 x64-128, first 64-bit lane.            |
//! | `Crc32`   | 3   | CRC-32 folded into both halves of a `u64`.         |
//!
//! The tag is persisted in every framed on-disk entry so the reader can verify
//! a checksum with the algorithm that produced it, regardless of which
//! algorithm is active today.
//!
//! ## Selection
//!
//! The algorithm is chosen once, at store open, by walking an ordered
//! fallback list ([`HashAlgorithm::fallback_chain`]). A candidate is used when
//! the probe reports it available **and** it is compiled into this build.
//!
//! ```rust
//! use hasher::{HashAlgorithm, Hasher};
//!
//! // Pretend the fast digest is missing at runtime.
//! let h = Hasher::select(HashAlgorithm::Xx, |alg| alg != HashAlgorithm::Xx).unwrap();
//! assert_eq!(h.algorithm(), HashAlgorithm::Crc32);
//! ```

mod murmur3;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

/// Errors produced while selecting or applying a hash algorithm.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Neither the requested algorithm nor any of its fallbacks can be used.
    #[error("no usable hash algorithm: {requested} and its fallbacks are unavailable")]
    Unavailable {
        /// The algorithm the configuration asked for.
        requested: HashAlgorithm,
    },

    /// A persisted entry carries a tag that maps to no known algorithm.
    #[error("unknown hash algorithm tag {0}")]
    UnknownTag(u8),

    /// `hash_region` was asked to read outside the supplied region.
    #[error("hash range {offset}+{length} is outside a region of {region_len} bytes")]
    OutOfBounds {
        offset: usize,
        length: usize,
        region_len: usize,
    },

    /// The algorithm name could not be parsed.
    #[error("unknown hash algorithm name '{0}' (expected xx, murmur3 or crc32)")]
    UnknownName(String),
}

/// The closed set of hashing strategies the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// XXH64 — the fast non-cryptographic default.
    #[default]
    Xx,
    /// MurmurHash3 x64-128 — stronger distribution, reproduced bit-for-bit.
    Murmur3,
    /// CRC-32 based fallback, always available.
    Crc32,
}

impl HashAlgorithm {
    /// Every algorithm, in tag order.
    pub const ALL: [HashAlgorithm; 3] = [HashAlgorithm::Xx, HashAlgorithm::Murmur3, HashAlgorithm::Crc32];

    /// The one-byte tag written into framed on-disk entries.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            HashAlgorithm::Xx => 1,
            HashAlgorithm::Murmur3 => 2,
            HashAlgorithm::Crc32 => 3,
        }
    }

    /// Maps a persisted tag back to its algorithm.
    pub fn from_tag(tag: u8) -> Result<Self, HashError> {
        match tag {
            1 => Ok(HashAlgorithm::Xx),
            2 => Ok(HashAlgorithm::Murmur3),
            3 => Ok(HashAlgorithm::Crc32),
            other => Err(HashError::UnknownTag(other)),
        }
    }

    /// Short lowercase name, also accepted by [`FromStr`].
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Xx => "xx",
            HashAlgorithm::Murmur3 => "murmur3",
            HashAlgorithm::Crc32 => "crc32",
        }
    }

    /// Ordered list of candidates tried by [`Hasher::select`].
    ///
    /// Only the fast digest degrades; an explicit choice of the mixing digest
    /// or of the CRC fallback is honoured or fails.
    #[must_use]
    pub fn fallback_chain(self) -> &'static [HashAlgorithm] {
        match self {
            HashAlgorithm::Xx => &[HashAlgorithm::Xx, HashAlgorithm::Crc32],
            HashAlgorithm::Murmur3 => &[HashAlgorithm::Murmur3],
            HashAlgorithm::Crc32 => &[HashAlgorithm::Crc32],
        }
    }

    /// Default feature probe: reports whether the implementation is compiled in.
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            HashAlgorithm::Xx => cfg!(feature = "xxhash"),
            HashAlgorithm::Murmur3 | HashAlgorithm::Crc32 => true,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xx" | "xxhash" | "xxh64" => Ok(HashAlgorithm::Xx),
            "murmur3" | "murmur" => Ok(HashAlgorithm::Murmur3),
            "crc32" | "crc" => Ok(HashAlgorithm::Crc32),
            _ => Err(HashError::UnknownName(s.to_string())),
        }
    }
}

/// A resolved hashing strategy.
///
/// Cheap to copy; holds no state. Resolved once at store open and shared by
/// the index and the segment layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hasher {
    #[cfg(feature = "xxhash")]
    Xx,
    Murmur3,
    Crc32,
}

impl Hasher {
    /// Resolves `requested` through its fallback chain.
    ///
    /// `probe` decides whether a candidate may be used in this environment;
    /// [`HashAlgorithm::is_available`] is the production probe.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Unavailable`] when no candidate survives.
    pub fn select<P>(requested: HashAlgorithm, probe: P) -> Result<Self, HashError>
    where
        P: Fn(HashAlgorithm) -> bool,
    {
        for &candidate in requested.fallback_chain() {
            if !probe(candidate) {
                continue;
            }
            if let Some(hasher) = Self::instantiate(candidate) {
                if candidate != requested {
                    warn!(
                        requested = %requested,
                        using = %candidate,
                        "hash algorithm unavailable, falling back"
                    );
                }
                return Ok(hasher);
            }
        }
        Err(HashError::Unavailable { requested })
    }

    /// Builds exactly the algorithm identified by a persisted tag.
    ///
    /// Used to verify checksums; never falls back.
    pub fn for_tag(tag: u8) -> Result<Self, HashError> {
        let algorithm = HashAlgorithm::from_tag(tag)?;
        Self::instantiate(algorithm).ok_or(HashError::Unavailable { requested: algorithm })
    }

    fn instantiate(algorithm: HashAlgorithm) -> Option<Self> {
        match algorithm {
            #[cfg(feature = "xxhash")]
            HashAlgorithm::Xx => Some(Hasher::Xx),
            #[cfg(not(feature = "xxhash"))]
            HashAlgorithm::Xx => None,
            HashAlgorithm::Murmur3 => Some(Hasher::Murmur3),
            HashAlgorithm::Crc32 => Some(Hasher::Crc32),
        }
    }

    /// The algorithm this hasher implements.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            #[cfg(feature = "xxhash")]
            Hasher::Xx => HashAlgorithm::Xx,
            Hasher::Murmur3 => HashAlgorithm::Murmur3,
            Hasher::Crc32 => HashAlgorithm::Crc32,
        }
    }

    /// Tag persisted alongside checksums produced by this hasher.
    #[must_use]
    pub fn tag(&self) -> u8 {
        self.algorithm().tag()
    }

    /// Hashes a byte slice.
    #[must_use]
    pub fn hash(&self, bytes: &[u8]) -> u64 {
        match self {
            #[cfg(feature = "xxhash")]
            Hasher::Xx => xxhash_rust::xxh64::xxh64(bytes, 0),
            Hasher::Murmur3 => murmur3::hash64(bytes),
            Hasher::Crc32 => {
                let crc = u64::from(crc32fast::hash(bytes));
                crc | (crc << 32)
            }
        }
    }

    /// Hashes `length` bytes of `region` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::OutOfBounds`] if the range does not fit in the
    /// region.
    pub fn hash_region(&self, region: &[u8], offset: usize, length: usize) -> Result<u64, HashError> {
        let bytes = offset
            .checked_add(length)
            .and_then(|end| region.get(offset..end))
            .ok_or(HashError::OutOfBounds {
                offset,
                length,
                region_len: region.len(),
            })?;
        Ok(self.hash(bytes))
    }
}
