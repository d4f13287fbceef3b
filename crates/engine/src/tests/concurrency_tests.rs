use super::helpers::{small_config, value_100};
use crate::*;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

#[test]
fn parallel_writers_on_distinct_keys() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(Store::open(dir.path(), small_config())?);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || -> Result<()> {
                for i in 0..200 {
                    store.put(format!("t{t}-{i:03}").as_bytes(), format!("{t}:{i}").as_bytes())?;
                }
                Ok(())
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap()?;
    }

    assert_eq!(store.len(), 1600);
    assert_eq!(store.sequence_number(), 1600);
    for t in 0..8 {
        for i in 0..200 {
            assert_eq!(
                store.get(format!("t{t}-{i:03}").as_bytes())?,
                Some(format!("{t}:{i}").into_bytes())
            );
        }
    }
    Ok(())
}

#[test]
fn readers_never_see_torn_values() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(Store::open(dir.path(), small_config())?);
    for i in 0..10 {
        store.put(format!("key{i:03}").as_bytes(), &value_100(0))?;
    }

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || -> Result<()> {
                while !done.load(Ordering::Acquire) {
                    for i in 0..10 {
                        let value = store.get(format!("key{i:03}").as_bytes())?;
                        let value = value.expect("key is never deleted");
                        assert_eq!(value.len(), 100);
                        assert!(value.iter().all(|b| b.is_ascii_digit()));
                    }
                }
                Ok(())
            })
        })
        .collect();

    for round in 1..50 {
        for i in 0..10 {
            store.put(format!("key{i:03}").as_bytes(), &value_100(round))?;
        }
    }
    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap()?;
    }
    Ok(())
}

#[test]
fn foreground_writes_win_over_compaction() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(Store::open(dir.path(), small_config())?);

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || -> Result<()> {
            for round in 0..60 {
                for i in 0..20 {
                    store.put(format!("key{i:03}").as_bytes(), &value_100(round * 100 + i))?;
                }
            }
            Ok(())
        })
    };

    while !writer.is_finished() {
        store.rotate()?;
        store.compact_all()?;
    }
    writer.join().unwrap()?;

    store.rotate()?;
    store.compact_all()?;
    for i in 0..20 {
        assert_eq!(
            store.get(format!("key{i:03}").as_bytes())?,
            Some(value_100(5900 + i))
        );
    }
    assert_eq!(store.stats().stale_bytes(), 0);
    Ok(())
}

#[test]
fn background_compaction_under_load() -> Result<()> {
    let dir = tempdir()?;
    let config = StoreConfig {
        compaction_threads: 2,
        compaction_threshold: 0.5,
        ..small_config()
    };
    let store = Arc::new(Store::open(dir.path(), config)?);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || -> Result<()> {
                for round in 0..30 {
                    for i in 0..10 {
                        let key = format!("t{t}k{i:02}");
                        store.put(key.as_bytes(), &value_100(round * 100 + i))?;
                        assert_eq!(store.get(key.as_bytes())?, Some(value_100(round * 100 + i)));
                    }
                }
                Ok(())
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap()?;
    }

    for t in 0..4 {
        for i in 0..10 {
            assert_eq!(
                store.get(format!("t{t}k{i:02}").as_bytes())?,
                Some(value_100(2900 + i))
            );
        }
    }
    store.close()?;

    let store = Store::open(dir.path(), small_config())?;
    assert_eq!(store.len(), 40);
    for t in 0..4 {
        for i in 0..10 {
            assert_eq!(
                store.get(format!("t{t}k{i:02}").as_bytes())?,
                Some(value_100(2900 + i))
            );
        }
    }
    Ok(())
}
