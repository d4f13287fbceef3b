use crate::*;
use anyhow::Result;
use hasher::Hasher;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const H: Hasher = Hasher::Crc32;

fn names(dir: &Path) -> Result<Vec<String>> {
    let mut names = fs::read_dir(dir)?
        .map(|e| Ok(e?.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

// --------------------- Naming ---------------------

#[test]
fn file_names_parse_by_suffix() {
    assert_eq!(FileKind::parse("12.data"), Some((12, FileKind::Data)));
    assert_eq!(FileKind::parse("12.datac"), Some((12, FileKind::Compacted)));
    assert_eq!(FileKind::parse("3.index"), Some((3, FileKind::Index)));
    assert_eq!(FileKind::parse("40.tombstone"), Some((40, FileKind::Tombstone)));
    assert_eq!(FileKind::parse("x.data"), None);
    assert_eq!(FileKind::parse(".data"), None);
    assert_eq!(FileKind::parse("+1.data"), None);
    assert_eq!(FileKind::parse("1.data.tmp"), None);
    assert_eq!(FileKind::parse("notes.txt"), None);
}

// --------------------- Open / ids ---------------------

#[test]
fn ids_are_monotonic_across_roles() -> Result<()> {
    let dir = tempdir()?;
    let mut files = FileSet::open(dir.path(), H, false)?;
    assert_eq!(files.next_id(), 1);

    let active = files.create_active_segment()?;
    let tombstones = files.create_tombstone_file()?;
    assert_eq!(active.id(), 1);
    assert_eq!(tombstones.id(), 2);
    assert_eq!(
        names(dir.path())?,
        vec!["1.data", "1.index", "2.tombstone"]
    );
    Ok(())
}

#[test]
fn reopen_resumes_after_highest_id_and_seals_data() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut files = FileSet::open(dir.path(), H, false)?;
        let mut active = files.create_active_segment()?;
        active.append(&H, b"k", b"v", 1, &mut Vec::new())?;
        active.sync()?;
        files.create_tombstone_file()?;
        files.create_tombstone_file()?;
    }

    let files = FileSet::open(dir.path(), H, false)?;
    assert_eq!(files.next_id(), 4);
    assert_eq!(files.data_file_ids(), vec![1]);
    assert_eq!(files.tombstone_file_ids(), vec![2, 3]);
    assert!(files.has_index_file(1));

    let data = files.data_file(1).expect("data file 1");
    assert!(data.is_sealed());
    assert_eq!(data.iter()?.count(), 1);
    Ok(())
}

#[test]
fn open_cleans_temporary_and_orphan_files() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("5.index.tmp"), b"partial")?;
    fs::write(dir.path().join("9.index"), b"")?;
    fs::write(dir.path().join("README"), b"not ours")?;

    let files = FileSet::open(dir.path(), H, false)?;
    assert_eq!(names(dir.path())?, vec!["README"]);
    // The orphan's id is still never handed out again.
    assert_eq!(files.next_id(), 10);
    Ok(())
}

#[test]
fn compacted_files_are_opened_read_only() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut files = FileSet::open(dir.path(), H, false)?;
        let mut active = files.create_active_segment()?;
        active.append(&H, b"k", b"compacted", 1, &mut Vec::new())?;
        active.sync()?;
    }
    fs::rename(dir.path().join("1.data"), dir.path().join("1.datac"))?;

    let files = FileSet::open(dir.path(), H, false)?;
    let data = files.data_file(1).expect("compacted file");
    assert_eq!(data.kind(), FileKind::Compacted);
    let (loc, rec) = data.iter()?.next().expect("one record")?;
    assert_eq!(rec.value, b"compacted");
    assert_eq!(data.read_record(loc.record_offset, loc.record_size)?, rec);
    Ok(())
}

// --------------------- Rotation ---------------------

#[test]
fn rotate_seals_old_segment_and_completes_its_index() -> Result<()> {
    let dir = tempdir()?;
    let mut files = FileSet::open(dir.path(), H, false)?;
    let mut active = files.create_active_segment()?;
    let mut buf = Vec::new();
    let a = active.append(&H, b"a", b"1", 1, &mut buf)?;
    let b = active.append(&H, b"bb", b"22", 2, &mut buf)?;
    let old = active.data().clone();

    files.rotate(&mut active)?;
    assert_eq!(active.id(), 2);
    assert!(old.is_sealed());
    assert!(!active.data().is_sealed());
    assert_eq!(files.data_file_ids(), vec![1, 2]);

    let entries = IndexFile::iter(&files.index_path(1), 1)?.collect::<Result<Vec<_>, _>>()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key, b"a");
    assert_eq!(entries[0].record_offset, a.record_offset);
    assert_eq!(entries[1].value_offset(), b.value_offset);
    assert_eq!(entries[1].value_size(), b.value_size);
    assert_eq!(entries[1].sequence_number, 2);
    Ok(())
}

#[test]
fn has_room_respects_max_file_size() -> Result<()> {
    let dir = tempdir()?;
    let mut files = FileSet::open(dir.path(), H, false)?;
    let mut active = files.create_active_segment()?;

    // An empty segment accepts even an oversized record.
    assert!(active.has_room(1, 1_000, 64));
    active.append(&H, b"k", &[0u8; 20], 1, &mut Vec::new())?;
    assert_eq!(active.size(), 43);
    assert!(active.has_room(1, 20, 86));
    assert!(!active.has_room(1, 21, 86));
    Ok(())
}

// --------------------- Retirement ---------------------

#[test]
fn retire_unlinks_data_and_index() -> Result<()> {
    let dir = tempdir()?;
    let mut files = FileSet::open(dir.path(), H, false)?;
    let mut active = files.create_active_segment()?;
    let loc = active.append(&H, b"k", b"v", 1, &mut Vec::new())?;
    files.rotate(&mut active)?;

    let held = files.data_file(1).expect("file 1");
    let retired = files.retire_data_file(1)?;
    assert!(retired.is_some());
    assert!(files.retire_data_file(1)?.is_none());
    assert_eq!(files.data_file_ids(), vec![2]);
    assert!(!dir.path().join("1.data").exists());
    assert!(!dir.path().join("1.index").exists());

    // A handle taken before retirement still reads.
    assert_eq!(held.read_record(loc.record_offset, loc.record_size)?.value, b"v");
    Ok(())
}

// --------------------- Tombstones / index regeneration ---------------------

#[test]
fn tombstones_append_scan_and_rotate() -> Result<()> {
    let dir = tempdir()?;
    let mut files = FileSet::open(dir.path(), H, false)?;
    let mut tombstones = files.create_tombstone_file()?;
    for seq in 1..=3u64 {
        tombstones.append(&TombstoneEntry {
            key: format!("dead-{seq}").into_bytes(),
            sequence_number: seq,
        })?;
    }
    assert_eq!(tombstones.size(), 3 * (18 + 6));

    files.rotate_tombstone_file(&mut tombstones)?;
    assert_eq!(tombstones.id(), 2);
    assert_eq!(tombstones.size(), 0);

    let entries = TombstoneFile::iter(&files.tombstone_path(1), 1)?
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].key, b"dead-3");
    assert_eq!(entries[2].sequence_number, 3);

    files.delete_tombstone_file(1)?;
    assert_eq!(files.tombstone_file_ids(), vec![2]);
    assert!(!files.tombstone_path(1).exists());
    Ok(())
}

#[test]
fn regenerated_index_replaces_old_one_atomically() -> Result<()> {
    let dir = tempdir()?;
    let mut files = FileSet::open(dir.path(), H, false)?;
    let active = files.create_active_segment()?;
    drop(active);

    let mut index = files.regenerate_index_file(1)?;
    index.append(&IndexEntry {
        key: b"k".to_vec(),
        record_size: 24,
        record_offset: 0,
        sequence_number: 1,
    })?;
    assert!(dir.path().join("1.index.tmp").exists());
    index.seal()?;

    assert!(!dir.path().join("1.index.tmp").exists());
    let entries = IndexFile::iter(&files.index_path(1), 1)?.collect::<Result<Vec<_>, _>>()?;
    assert_eq!(entries.len(), 1);
    Ok(())
}

#[test]
fn torn_tombstone_tail_ends_the_scan() -> Result<()> {
    let dir = tempdir()?;
    let mut files = FileSet::open(dir.path(), H, false)?;
    let mut tombstones = files.create_tombstone_file()?;
    tombstones.append(&TombstoneEntry {
        key: b"k".to_vec(),
        sequence_number: 1,
    })?;
    let path = files.tombstone_path(1);
    let mut bytes = fs::read(&path)?;
    bytes.extend_from_slice(&[1, 2, 3]);
    fs::write(&path, bytes)?;

    let mut iter = TombstoneFile::iter(&path, 1)?;
    assert!(iter.next().transpose()?.is_some());
    assert!(matches!(iter.next(), Some(Err(SegmentError::Truncated { .. }))));
    assert!(iter.next().is_none());
    Ok(())
}
