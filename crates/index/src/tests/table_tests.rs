use crate::*;
use anyhow::Result;
use hasher::Hasher;
use std::sync::Arc;
use std::thread;

// --------------------- Helpers ---------------------

fn meta(file_id: u32, value_offset: u32, seq: u64) -> IndexMeta {
    IndexMeta {
        file_id,
        value_offset,
        value_size: 8,
        sequence_number: seq,
    }
}

fn table(options: TableOptions) -> Result<OffHeapTable<IndexMeta>> {
    Ok(OffHeapTable::new(Hasher::Murmur3, &options)?)
}

fn small() -> TableOptions {
    TableOptions {
        segment_count: 2,
        initial_buckets: 2,
        initial_arena_bytes: 64,
        ..TableOptions::default()
    }
}

// --------------------- Basic put / get / remove ---------------------

#[test]
fn put_then_get() -> Result<()> {
    let t = table(TableOptions::default())?;
    assert_eq!(t.put(b"alpha", &meta(1, 30, 1))?, None);
    assert_eq!(t.get(b"alpha")?, Some(meta(1, 30, 1)));
    assert!(t.contains_key(b"alpha")?);
    assert_eq!(t.len(), 1);
    Ok(())
}

#[test]
fn get_missing_is_none() -> Result<()> {
    let t = table(TableOptions::default())?;
    assert_eq!(t.get(b"nope")?, None);
    assert_eq!(t.remove(b"nope")?, None);
    assert!(t.is_empty());
    Ok(())
}

#[test]
fn put_overwrites_and_returns_previous() -> Result<()> {
    let t = table(TableOptions::default())?;
    t.put(b"k", &meta(1, 10, 1))?;
    let old = t.put(b"k", &meta(2, 20, 2))?;
    assert_eq!(old, Some(meta(1, 10, 1)));
    assert_eq!(t.get(b"k")?, Some(meta(2, 20, 2)));
    assert_eq!(t.len(), 1);
    Ok(())
}

#[test]
fn remove_returns_value_and_frees_entry() -> Result<()> {
    let t = table(TableOptions::default())?;
    t.put(b"k", &meta(1, 10, 1))?;
    assert_eq!(t.remove(b"k")?, Some(meta(1, 10, 1)));
    assert_eq!(t.get(b"k")?, None);
    assert_eq!(t.len(), 0);
    assert!(t.stats().arena_free_bytes() > 0);
    Ok(())
}

#[test]
fn oversized_key_is_rejected() -> Result<()> {
    let t = table(TableOptions::default())?;
    let key = vec![b'x'; 256];
    let err = t.put(&key, &meta(1, 1, 1)).unwrap_err();
    assert!(matches!(err, IndexError::KeyTooLarge { len: 256, max: 255 }));
    Ok(())
}

// --------------------- Compare-and-swap ---------------------

#[test]
fn replace_only_swaps_on_expected_value() -> Result<()> {
    let t = table(TableOptions::default())?;
    let original = meta(1, 10, 5);
    let moved = meta(7, 22, 5);
    t.put(b"k", &original)?;

    assert!(!t.replace(b"k", &meta(1, 99, 5), &moved)?);
    assert_eq!(t.get(b"k")?, Some(original));

    assert!(t.replace(b"k", &original, &moved)?);
    assert_eq!(t.get(b"k")?, Some(moved));

    assert!(!t.replace(b"absent", &original, &moved)?);
    assert_eq!(t.get(b"absent")?, None);
    Ok(())
}

// --------------------- Collisions ---------------------

#[test]
fn colliding_hashes_are_distinct_entries() -> Result<()> {
    let t = table(TableOptions::default())?;
    let hash = 0xDEAD_BEEF_u64;
    t.put_hashed(hash, b"first", &meta(1, 1, 1))?;
    t.put_hashed(hash, b"second", &meta(2, 2, 2))?;

    assert_eq!(t.get_hashed(hash, b"first")?, Some(meta(1, 1, 1)));
    assert_eq!(t.get_hashed(hash, b"second")?, Some(meta(2, 2, 2)));

    assert_eq!(t.remove_hashed(hash, b"first")?, Some(meta(1, 1, 1)));
    assert_eq!(t.get_hashed(hash, b"first")?, None);
    assert_eq!(t.get_hashed(hash, b"second")?, Some(meta(2, 2, 2)));
    assert_eq!(t.len(), 1);
    Ok(())
}

#[test]
fn removing_middle_of_chain_keeps_neighbours() -> Result<()> {
    let t = table(TableOptions::default())?;
    let hash = 7;
    for (i, key) in [&b"a"[..], b"b", b"c"].iter().enumerate() {
        t.put_hashed(hash, key, &meta(i as u32, 0, i as u64))?;
    }
    t.remove_hashed(hash, b"b")?;
    assert_eq!(t.get_hashed(hash, b"a")?, Some(meta(0, 0, 0)));
    assert_eq!(t.get_hashed(hash, b"c")?, Some(meta(2, 0, 2)));
    assert_eq!(t.get_hashed(hash, b"b")?, None);
    Ok(())
}

// --------------------- Growth ---------------------

#[test]
fn many_inserts_resize_and_grow() -> Result<()> {
    let t = table(small())?;
    for i in 0..5_000u32 {
        t.put(format!("key-{i}").as_bytes(), &meta(i, i * 2, u64::from(i)))?;
    }
    assert_eq!(t.len(), 5_000);
    for i in 0..5_000u32 {
        assert_eq!(
            t.get(format!("key-{i}").as_bytes())?,
            Some(meta(i, i * 2, u64::from(i))),
            "key-{i}"
        );
    }

    let stats = t.stats();
    assert_eq!(stats.entries(), 5_000);
    assert!(stats.rehashes() > 0);
    assert!(stats.buckets() >= 4);
    assert!(stats.arena_capacity() > 128);
    Ok(())
}

#[test]
fn full_arena_with_holes_is_defragmented() -> Result<()> {
    let t = table(TableOptions {
        segment_count: 1,
        initial_buckets: 1024,
        initial_arena_bytes: 4000,
        ..TableOptions::default()
    })?;

    // 100 entries of 38 bytes each.
    for i in 0..100u32 {
        t.put(format!("k{i:03}").as_bytes(), &meta(i, 0, 1))?;
    }
    for i in 10..100u32 {
        t.remove(format!("k{i:03}").as_bytes())?;
    }
    // Longer keys cannot reuse the 38-byte holes.
    for i in 0..10u32 {
        t.put(format!("long-{i:05}").as_bytes(), &meta(1000 + i, 0, 2))?;
    }

    assert_eq!(t.stats().defragmentations(), 1);
    assert_eq!(t.arena_capacity(0), Some(4000));
    for i in 0..10u32 {
        assert_eq!(t.get(format!("k{i:03}").as_bytes())?, Some(meta(i, 0, 1)));
        assert_eq!(
            t.get(format!("long-{i:05}").as_bytes())?,
            Some(meta(1000 + i, 0, 2))
        );
    }
    assert_eq!(t.get(b"k050")?, None);
    assert_eq!(t.len(), 20);
    Ok(())
}

#[test]
fn for_each_visits_every_entry() -> Result<()> {
    let t = table(small())?;
    for i in 0..200u32 {
        t.put(format!("e{i}").as_bytes(), &meta(i, 0, 0))?;
    }
    let mut seen = Vec::new();
    t.for_each(|key, value| seen.push((key.to_vec(), value.file_id)))?;
    seen.sort_by_key(|(_, id)| *id);

    assert_eq!(seen.len(), 200);
    assert_eq!(seen[17], (b"e17".to_vec(), 17));
    Ok(())
}

// --------------------- Options / release ---------------------

#[test]
fn invalid_options_are_rejected() {
    let bad = [
        TableOptions {
            segment_count: 3,
            ..TableOptions::default()
        },
        TableOptions {
            initial_buckets: 0,
            ..TableOptions::default()
        },
        TableOptions {
            load_factor: 0.0,
            ..TableOptions::default()
        },
        TableOptions {
            max_key_size: 70_000,
            ..TableOptions::default()
        },
    ];
    for options in bad {
        assert!(matches!(
            OffHeapTable::<IndexMeta>::new(Hasher::Crc32, &options),
            Err(IndexError::InvalidOptions(_))
        ));
    }
}

#[test]
fn release_is_idempotent_and_final() -> Result<()> {
    let t = table(TableOptions::default())?;
    t.put(b"k", &meta(1, 1, 1))?;
    t.release();
    t.release();

    assert!(t.is_released());
    assert!(matches!(t.get(b"k"), Err(IndexError::Released)));
    assert!(matches!(t.put(b"k", &meta(1, 1, 1)), Err(IndexError::Released)));
    assert!(matches!(t.for_each(|_, _| {}), Err(IndexError::Released)));
    assert_eq!(t.stats().arena_capacity(), 0);
    Ok(())
}

// --------------------- Concurrency ---------------------

#[test]
fn concurrent_writers_on_shared_table() -> Result<()> {
    let t = Arc::new(table(small())?);
    let handles: Vec<_> = (0..8u32)
        .map(|w| {
            let t = Arc::clone(&t);
            thread::spawn(move || -> Result<(), IndexError> {
                for i in 0..1_000u32 {
                    t.put(format!("{w}-{i}").as_bytes(), &meta(w, i, u64::from(i)))?;
                }
                Ok(())
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer panicked")?;
    }

    assert_eq!(t.len(), 8_000);
    assert_eq!(t.get(b"3-999")?, Some(meta(3, 999, 999)));
    Ok(())
}
