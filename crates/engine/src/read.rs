//! Read path: `get()` and `contains_key()`.
//!
//! A read takes no store-wide lock: it copies the key's metadata out of the
//! index, grabs a handle on the data file and does one positional read of
//! the whole record so the checksum can be verified.

use std::sync::atomic::Ordering;

use index::IndexMeta;
use segment::{DataFile, SegmentError};
use tracing::error;

use crate::write::{check_key, stored_size};
use crate::{StoreError, StoreInner, RECORD_HEADER_SIZE};

/// Lookups retried when compaction moves a record mid-read.
const MAX_READ_ATTEMPTS: usize = 8;

impl StoreInner {
    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        check_key(key)?;
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        let hash = self.index.hash_key(key);
        let Some(mut meta) = self.index.get_hashed(hash, key)? else {
            return Ok(None);
        };

        for _ in 0..MAX_READ_ATTEMPTS {
            let file = self.files.read().data_file(meta.file_id);
            if let Some(file) = file {
                return self.read_value(&file, key, &meta).map(Some);
            }

            // The file is gone. Either compaction moved the record and retired
            // the file after our lookup, or the index is wrong.
            match self.index.get_hashed(hash, key)? {
                None => return Ok(None),
                Some(current) if current.same_location(&meta) => {
                    error!(
                        file_id = meta.file_id,
                        key = %String::from_utf8_lossy(key),
                        "index points at a missing data file"
                    );
                    return Err(StoreError::inconsistency(
                        key,
                        format!("data file {} does not exist", meta.file_id),
                    ));
                }
                Some(current) => meta = current,
            }
        }
        Err(StoreError::inconsistency(
            key,
            format!("record moved {MAX_READ_ATTEMPTS} times during a single read"),
        ))
    }

    pub(crate) fn contains_key(&self, key: &[u8]) -> Result<bool, StoreError> {
        self.check_open()?;
        check_key(key)?;
        Ok(self.index.contains_key(key)?)
    }

    fn read_value(
        &self,
        file: &DataFile,
        key: &[u8],
        meta: &IndexMeta,
    ) -> Result<Vec<u8>, StoreError> {
        let header_and_key = (RECORD_HEADER_SIZE + key.len()) as u32;
        let record_offset = meta.value_offset.checked_sub(header_and_key).ok_or_else(|| {
            StoreError::inconsistency(
                key,
                format!("value offset {} precedes a record header", meta.value_offset),
            )
        })?;

        let record = match file.read_record(record_offset, stored_size(key.len(), meta.value_size)) {
            Ok(record) => record,
            Err(SegmentError::Checksum { file_id, offset })
            | Err(SegmentError::Corrupt { file_id, offset, .. }) => {
                error!(file_id, offset, "corrupt record on read");
                return Err(StoreError::Checksum { file_id, offset });
            }
            Err(SegmentError::Truncated { file_id, offset }) => {
                error!(file_id, offset, "index points past the end of a data file");
                return Err(StoreError::inconsistency(
                    key,
                    format!("record at {file_id}:{offset} is past the end of the file"),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if record.key != key || record.sequence_number != meta.sequence_number {
            error!(
                file_id = meta.file_id,
                offset = record_offset,
                "record does not match its index entry"
            );
            return Err(StoreError::inconsistency(
                key,
                format!(
                    "record at {}:{record_offset} belongs to another key or version",
                    meta.file_id
                ),
            ));
        }
        Ok(record.value)
    }
}
