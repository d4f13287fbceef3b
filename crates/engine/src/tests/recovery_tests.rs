use super::helpers::{count_files, data_path, index_path, small_config, value_100};
use crate::*;
use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use tempfile::tempdir;

// --------------------- Reopen ---------------------

#[test]
fn reopen_restores_last_values() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = Store::open(dir.path(), small_config())?;
        store.put(b"a", b"1")?;
        store.put(b"b", b"2")?;
        store.put(b"a", b"3")?;
        store.delete(b"b")?;
        store.put(b"c", b"4")?;
        store.close()?;
    }

    let store = Store::open(dir.path(), small_config())?;
    assert_eq!(store.get(b"a")?, Some(b"3".to_vec()));
    assert!(store.get(b"b")?.is_none());
    assert_eq!(store.get(b"c")?, Some(b"4".to_vec()));
    assert_eq!(store.len(), 2);
    Ok(())
}

#[test]
fn reopen_without_explicit_close() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = Store::open(dir.path(), small_config())?;
        store.put(b"k", b"v")?;
        // dropped here
    }

    let store = Store::open(dir.path(), small_config())?;
    assert_eq!(store.get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn sequence_resumes_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = Store::open(dir.path(), small_config())?;
        for i in 0..10 {
            store.put(format!("k{i}").as_bytes(), b"v")?;
        }
        store.delete(b"k0")?;
        assert_eq!(store.sequence_number(), 11);
    }

    let store = Store::open(dir.path(), small_config())?;
    assert_eq!(store.sequence_number(), 11);
    store.put(b"k0", b"back")?;
    assert_eq!(store.sequence_number(), 12);
    Ok(())
}

#[test]
fn many_files_recover() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = Store::open(dir.path(), small_config())?;
        for round in 0..3 {
            for i in 0..60 {
                store.put(format!("key{i:03}").as_bytes(), &value_100(round * 1000 + i))?;
            }
        }
        for i in (0..60).step_by(3) {
            store.delete(format!("key{i:03}").as_bytes())?;
        }
    }

    let store = Store::open(dir.path(), small_config())?;
    for i in 0..60 {
        let got = store.get(format!("key{i:03}").as_bytes())?;
        if i % 3 == 0 {
            assert!(got.is_none(), "key{i:03} should stay deleted");
        } else {
            assert_eq!(got, Some(value_100(2000 + i)));
        }
    }
    assert_eq!(store.len(), 40);
    Ok(())
}

#[test]
fn empty_data_files_are_removed() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = Store::open(dir.path(), small_config())?;
        store.close()?;
    }
    {
        let store = Store::open(dir.path(), small_config())?;
        store.close()?;
    }
    assert_eq!(count_files(dir.path(), ".data"), 1);
    Ok(())
}

// --------------------- Damaged files ---------------------

#[test]
fn torn_tail_is_truncated() -> Result<()> {
    let dir = tempdir()?;
    let (file_id, good_len) = {
        let store = Store::open(dir.path(), small_config())?;
        store.put(b"a", b"1")?;
        store.put(b"b", b"2")?;
        let id = store.stats().active_file_id;
        store.close()?;
        (id, fs::metadata(data_path(dir.path(), id))?.len())
    };

    // Half a header, as left by a crash in the middle of an append.
    let mut file = OpenOptions::new().append(true).open(data_path(dir.path(), file_id))?;
    file.write_all(&[0xAB; 10])?;
    drop(file);

    let store = Store::open(dir.path(), small_config())?;
    assert_eq!(store.get(b"a")?, Some(b"1".to_vec()));
    assert_eq!(store.get(b"b")?, Some(b"2".to_vec()));
    assert_eq!(fs::metadata(data_path(dir.path(), file_id))?.len(), good_len);

    store.put(b"c", b"3")?;
    assert_eq!(store.get(b"c")?, Some(b"3".to_vec()));
    Ok(())
}

#[test]
fn corrupt_last_record_is_dropped() -> Result<()> {
    let dir = tempdir()?;
    let file_id = {
        let store = Store::open(dir.path(), small_config())?;
        store.put(b"a", b"kept")?;
        store.put(b"b", b"lost")?;
        store.stats().active_file_id
    };

    // Flip the last value byte of "b".
    let path = data_path(dir.path(), file_id);
    let mut bytes = fs::read(&path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, &bytes)?;

    let store = Store::open(dir.path(), small_config())?;
    assert_eq!(store.get(b"a")?, Some(b"kept".to_vec()));
    assert!(store.get(b"b")?.is_none());
    Ok(())
}

#[test]
fn missing_index_file_is_regenerated() -> Result<()> {
    let dir = tempdir()?;
    let sealed = {
        let store = Store::open(dir.path(), small_config())?;
        store.put(b"a", b"1")?;
        let id = store.stats().active_file_id;
        store.rotate()?;
        store.put(b"b", b"2")?;
        id
    };
    fs::remove_file(index_path(dir.path(), sealed))?;

    let store = Store::open(dir.path(), small_config())?;
    assert_eq!(store.get(b"a")?, Some(b"1".to_vec()));
    assert_eq!(store.get(b"b")?, Some(b"2".to_vec()));
    assert!(index_path(dir.path(), sealed).exists());
    Ok(())
}

#[test]
fn truncated_index_file_falls_back_to_scan() -> Result<()> {
    let dir = tempdir()?;
    let sealed = {
        let store = Store::open(dir.path(), small_config())?;
        for i in 0..5 {
            store.put(format!("k{i}").as_bytes(), b"v")?;
        }
        let id = store.stats().active_file_id;
        store.rotate()?;
        store.put(b"other", b"x")?;
        id
    };
    let path = index_path(dir.path(), sealed);
    let len = fs::metadata(&path)?.len();
    OpenOptions::new().write(true).open(&path)?.set_len(len - 5)?;

    let store = Store::open(dir.path(), small_config())?;
    for i in 0..5 {
        assert_eq!(store.get(format!("k{i}").as_bytes())?, Some(b"v".to_vec()));
    }
    assert_eq!(fs::metadata(&path)?.len(), len);
    Ok(())
}

/// Writes k1..k3 into one data file, seals it behind a newer file and
/// removes its index file so the next open has to scan it.
fn sealed_file_without_index(dir: &std::path::Path) -> Result<u32> {
    let store = Store::open(dir, small_config())?;
    for i in 1..=3 {
        store.put(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())?;
    }
    let id = store.stats().active_file_id;
    store.rotate()?;
    store.put(b"newer", b"x")?;
    store.close()?;
    fs::remove_file(index_path(dir, id))?;
    Ok(id)
}

#[test]
fn damaged_record_in_sealed_file_is_not_repaired() -> Result<()> {
    let dir = tempdir()?;
    let sealed = sealed_file_without_index(dir.path())?;

    // First value byte of k1: 22-byte header, 2-byte key.
    let path = data_path(dir.path(), sealed);
    let mut bytes = fs::read(&path)?;
    let len = bytes.len() as u64;
    bytes[24] ^= 0xFF;
    fs::write(&path, &bytes)?;

    for _ in 0..2 {
        let store = Store::open(dir.path(), small_config())?;
        assert!(matches!(store.get(b"k1"), Err(StoreError::Checksum { .. })));
        assert_eq!(store.get(b"k2")?, Some(b"v2".to_vec()));
        assert_eq!(store.get(b"k3")?, Some(b"v3".to_vec()));
        assert_eq!(store.get(b"newer")?, Some(b"x".to_vec()));
        assert_eq!(fs::metadata(&path)?.len(), len);
        assert!(index_path(dir.path(), sealed).exists());
        store.close()?;
    }
    Ok(())
}

#[test]
fn undelimited_record_in_sealed_file_keeps_the_file() -> Result<()> {
    let dir = tempdir()?;
    let sealed = sealed_file_without_index(dir.path())?;

    // High byte of k2's value size, so its frame runs past the file end.
    let path = data_path(dir.path(), sealed);
    let mut bytes = fs::read(&path)?;
    let len = bytes.len() as u64;
    bytes[26 + 13] = 0x7F;
    fs::write(&path, &bytes)?;

    let store = Store::open(dir.path(), small_config())?;
    assert_eq!(store.get(b"k1")?, Some(b"v1".to_vec()));
    assert_eq!(store.get(b"newer")?, Some(b"x".to_vec()));
    assert!(store.data_file_ids().contains(&sealed));
    assert_eq!(fs::metadata(&path)?.len(), len);
    Ok(())
}

// --------------------- Tombstones ---------------------

#[test]
fn delete_survives_reopen_while_record_remains() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = Store::open(dir.path(), small_config())?;
        store.put(b"gone", b"v")?;
        store.put(b"kept", b"v")?;
        store.delete(b"gone")?;
    }
    for _ in 0..3 {
        let store = Store::open(dir.path(), small_config())?;
        assert!(store.get(b"gone")?.is_none());
        assert_eq!(store.get(b"kept")?, Some(b"v".to_vec()));
        assert_eq!(store.stats().tombstone_files, 1);
    }
    Ok(())
}

#[test]
fn unneeded_tombstones_are_dropped_at_open() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = Store::open(dir.path(), small_config())?;
        store.put(b"a", b"1")?;
        store.put(b"b", b"2")?;
        store.delete(b"a")?;
        store.rotate()?;
        store.compact_all()?;
        assert!(store.get(b"a")?.is_none());
    }

    let store = Store::open(dir.path(), small_config())?;
    assert!(store.get(b"a")?.is_none());
    assert_eq!(store.get(b"b")?, Some(b"2".to_vec()));

    let tombstone_id = store.stats().active_file_id - 1;
    let size = fs::metadata(dir.path().join(format!("{tombstone_id}.tombstone")))?.len();
    assert_eq!(size, 0, "the record for `a` is gone, so is its tombstone");
    Ok(())
}

#[test]
fn tombstone_files_kept_without_cleanup() -> Result<()> {
    let dir = tempdir()?;
    let config = StoreConfig {
        clean_up_tombstones_during_open: false,
        ..small_config()
    };
    {
        let store = Store::open(dir.path(), config.clone())?;
        store.put(b"a", b"1")?;
        store.delete(b"a")?;
    }
    let store = Store::open(dir.path(), config)?;
    assert!(store.get(b"a")?.is_none());
    assert_eq!(store.stats().tombstone_files, 2);
    Ok(())
}
