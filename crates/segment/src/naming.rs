//! File naming: `<decimal id><suffix>` inside the store directory.

use std::path::{Path, PathBuf};

/// Suffix of in-progress files, removed when a file set is opened.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Role of a file in the store directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Data file written by foreground puts (and compaction copies).
    Data,
    /// Data file produced by an offline compaction pass. Read-only here.
    Compacted,
    /// Index entries for the same-id data file.
    Index,
    /// Deletion markers.
    Tombstone,
}

impl FileKind {
    pub const ALL: [FileKind; 4] = [
        FileKind::Data,
        FileKind::Compacted,
        FileKind::Index,
        FileKind::Tombstone,
    ];

    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            FileKind::Data => ".data",
            FileKind::Compacted => ".datac",
            FileKind::Index => ".index",
            FileKind::Tombstone => ".tombstone",
        }
    }

    #[must_use]
    pub fn is_data(self) -> bool {
        matches!(self, FileKind::Data | FileKind::Compacted)
    }

    /// Splits `"17.data"` into `(17, Data)`. Anything else is `None`.
    #[must_use]
    pub fn parse(file_name: &str) -> Option<(u32, FileKind)> {
        Self::ALL.iter().find_map(|&kind| {
            let stem = file_name.strip_suffix(kind.suffix())?;
            if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            stem.parse::<u32>().ok().map(|id| (id, kind))
        })
    }
}

#[must_use]
pub fn file_name(id: u32, kind: FileKind) -> String {
    format!("{id}{}", kind.suffix())
}

#[must_use]
pub fn file_path(dir: &Path, id: u32, kind: FileKind) -> PathBuf {
    dir.join(file_name(id, kind))
}

/// Path of the in-progress version of `final_path`.
#[must_use]
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}
