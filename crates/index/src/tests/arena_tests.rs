use crate::*;
use anyhow::Result;
use hasher::{HashAlgorithm, Hasher};

// --------------------- Allocation ---------------------

#[test]
fn bump_allocation_is_sequential() -> Result<()> {
    let mut arena = Arena::new(3, 128);
    let a = arena.alloc(32)?.unwrap();
    let b = arena.alloc(32)?.unwrap();
    assert_eq!(a, Addr { arena: 3, offset: 0 });
    assert_eq!(b, Addr { arena: 3, offset: 32 });
    assert_eq!(arena.allocated(), 64);
    Ok(())
}

#[test]
fn freed_slot_is_reused_for_same_length() -> Result<()> {
    let mut arena = Arena::new(0, 128);
    let a = arena.alloc(32)?.unwrap();
    let _b = arena.alloc(32)?.unwrap();
    arena.free(a, 32)?;
    assert_eq!(arena.free_bytes(), 32);
    assert_eq!(arena.live_bytes(), 32);

    let c = arena.alloc(32)?.unwrap();
    assert_eq!(c, a);
    assert_eq!(arena.free_bytes(), 0);
    assert_eq!(arena.allocated(), 64);
    Ok(())
}

#[test]
fn full_arena_reports_none_then_grows() -> Result<()> {
    let mut arena = Arena::new(0, 64);
    let a = arena.alloc(64)?.unwrap();
    arena.bytes_mut(a, 4)?.copy_from_slice(b"abcd");
    assert!(arena.alloc(1)?.is_none());

    arena.grow(65)?;
    assert_eq!(arena.capacity(), 128);
    let b = arena.alloc(1)?.unwrap();
    assert_eq!(b.offset, 64);
    assert_eq!(arena.bytes(a, 4)?, b"abcd");
    Ok(())
}

#[test]
fn grow_past_limit_is_rejected() {
    let mut arena = Arena::new(0, 64);
    let err = arena.grow(MAX_ARENA_BYTES + 1).unwrap_err();
    assert!(matches!(err, IndexError::CapacityExceeded { .. }));
}

// --------------------- Bounds checking ---------------------

#[test]
fn access_beyond_allocated_extent_fails() -> Result<()> {
    let mut arena = Arena::new(0, 128);
    arena.alloc(64)?.unwrap();

    let err = arena.bytes(Addr { arena: 0, offset: 60 }, 10).unwrap_err();
    assert!(matches!(
        err,
        IndexError::OutOfBounds {
            offset: 60,
            len: 10,
            extent: 64,
            ..
        }
    ));
    // Within capacity but never handed out.
    assert!(arena.bytes(Addr { arena: 0, offset: 64 }, 1).is_err());
    Ok(())
}

#[test]
fn foreign_address_is_rejected() -> Result<()> {
    let mut arena = Arena::new(1, 128);
    arena.alloc(16)?.unwrap();
    let err = arena.bytes(Addr { arena: 2, offset: 0 }, 4).unwrap_err();
    assert!(matches!(
        err,
        IndexError::ForeignArena {
            expected: 1,
            found: 2
        }
    ));
    Ok(())
}

#[test]
fn released_arena_rejects_everything() -> Result<()> {
    let mut arena = Arena::new(0, 128);
    let a = arena.alloc(16)?.unwrap();
    arena.release();

    assert!(arena.is_released());
    assert_eq!(arena.capacity(), 0);
    assert!(matches!(arena.bytes(a, 1), Err(IndexError::Released)));
    assert!(matches!(arena.alloc(1), Err(IndexError::Released)));
    assert!(matches!(arena.region(), Err(IndexError::Released)));
    Ok(())
}

// --------------------- Hashing in place ---------------------

#[test]
fn key_hash_in_arena_matches_slice_hash() -> Result<()> {
    let key = b"user:000042";
    let mut arena = Arena::new(0, 256);
    arena.alloc(13)?.unwrap();
    let at = arena.alloc(key.len() as u32)?.unwrap();
    arena.bytes_mut(at, key.len())?.copy_from_slice(key);

    for alg in HashAlgorithm::ALL {
        let Ok(hasher) = Hasher::select(alg, HashAlgorithm::is_available) else {
            continue;
        };
        let in_place = hasher.hash_region(arena.region()?, at.offset as usize, key.len())?;
        assert_eq!(in_place, hasher.hash(key), "{alg}");
    }
    Ok(())
}
