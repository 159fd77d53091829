use crate::tests::helpers::*;
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

/// Reopening seals the previous active segment, turning it into merge input.
fn reopen(dir: &std::path::Path) -> Result<Engine> {
    Ok(Engine::open(dir, Options::default())?)
}

// --------------------- The canonical scenario ---------------------

#[test]
fn merge_produces_single_canonical_segment() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        db.put(b"a", b"1")?;
        db.put(b"b", b"1")?;
        db.put(b"a", b"2")?;
        db.delete(b"b")?;
        db.close()?;
    }

    let db = reopen(dir.path())?;
    db.merge()?;

    assert_eq!(db.list()?, vec![b"a".to_vec()]);
    assert_eq!(db.get(b"a")?.unwrap(), b"2");
    assert_eq!(db.get(b"b")?, None);

    // Exactly one non-empty segment: one record for "a", no tombstones.
    let records = decode_all_segments(dir.path());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, b"a");
    assert_eq!(records[0].value, b"2");
    assert!(!records[0].is_tombstone());

    // And a hint file for the merged segment.
    assert_eq!(count_hint_files(dir.path()), 1);
    Ok(())
}

#[test]
fn merge_preserves_state_pointwise() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        for i in 0..60u32 {
            db.put(format!("k{:02}", i).as_bytes(), format!("v{}", i).as_bytes())?;
        }
        for i in 0..60u32 {
            if i % 3 == 0 {
                db.delete(format!("k{:02}", i).as_bytes())?;
            } else if i % 3 == 1 {
                db.put(format!("k{:02}", i).as_bytes(), format!("v{}-new", i).as_bytes())?;
            }
        }
        db.close()?;
    }

    let db = reopen(dir.path())?;
    let mut before_keys = db.list()?;
    before_keys.sort();

    db.merge()?;

    let mut after_keys = db.list()?;
    after_keys.sort();
    assert_eq!(before_keys, after_keys);

    for i in 0..60u32 {
        let key = format!("k{:02}", i);
        let got = db.get(key.as_bytes())?;
        match i % 3 {
            0 => assert_eq!(got, None, "{} should stay deleted", key),
            1 => assert_eq!(got.unwrap(), format!("v{}-new", i).into_bytes()),
            _ => assert_eq!(got.unwrap(), format!("v{}", i).into_bytes()),
        }
    }
    Ok(())
}

// --------------------- Space & shape ---------------------

#[test]
fn merge_reclaims_space_from_overwrites() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        for round in 0..20u32 {
            for i in 0..10u32 {
                db.put(
                    format!("k{}", i).as_bytes(),
                    format!("value-{}-{}", round, i).as_bytes(),
                )?;
            }
        }
        db.close()?;
    }

    let before = total_cask_bytes(dir.path());
    let db = reopen(dir.path())?;
    db.merge()?;
    let after = total_cask_bytes(dir.path());

    assert!(
        after < before / 4,
        "merge should drop superseded records ({} -> {})",
        before,
        after
    );
    assert_eq!(db.len(), 10);
    Ok(())
}

#[test]
fn merge_output_respects_max_file_size() -> Result<()> {
    let dir = tempdir()?;
    let opts = Options {
        max_file_size: 256,
        ..Options::default()
    };
    {
        let db = Engine::open(dir.path(), opts.clone())?;
        for i in 0..40u32 {
            db.put(format!("k{:02}", i).as_bytes(), b"a medium sized value")?;
        }
        db.close()?;
    }

    let db = Engine::open(dir.path(), opts)?;
    db.merge()?;

    // 40 records of 42 bytes against a 256-byte cap: several outputs.
    let hint_count = count_hint_files(dir.path());
    assert!(hint_count >= 2, "expected a split output, got {}", hint_count);
    for i in 0..40u32 {
        assert!(db.get(format!("k{:02}", i).as_bytes())?.is_some());
    }
    Ok(())
}

#[test]
fn merge_with_only_active_segment_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(dir.path(), Options::default())?;
    db.put(b"k", b"v")?;

    let before = count_cask_files(dir.path());
    db.merge()?;
    assert_eq!(count_cask_files(dir.path()), before);
    assert_eq!(db.get(b"k")?.unwrap(), b"v");
    Ok(())
}

#[test]
fn merge_drops_fully_dead_segments() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        db.put(b"a", b"1")?;
        db.put(b"b", b"2")?;
        db.delete(b"a")?;
        db.delete(b"b")?;
        db.close()?;
    }

    let db = reopen(dir.path())?;
    db.merge()?;

    assert!(db.is_empty());
    assert_eq!(
        decode_all_segments(dir.path()).len(),
        0,
        "nothing live, nothing merged"
    );

    // And the store still opens cleanly afterwards.
    db.close()?;
    let db = reopen(dir.path())?;
    assert!(db.is_empty());
    Ok(())
}

// --------------------- Recovery interplay ---------------------

#[test]
fn merge_then_reopen_preserves_state() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        for i in 0..20u32 {
            db.put(format!("k{:02}", i).as_bytes(), format!("v{}", i).as_bytes())?;
        }
        db.delete(b"k03")?;
        db.close()?;
    }

    {
        let db = reopen(dir.path())?;
        db.merge()?;
        db.close()?;
    }

    // Hints now exist; the reopen takes the hint path.
    assert!(count_hint_files(dir.path()) >= 1);
    let db = reopen(dir.path())?;
    assert_eq!(db.len(), 19);
    assert_eq!(db.get(b"k03")?, None);
    assert_eq!(db.get(b"k07")?.unwrap(), b"v7");
    Ok(())
}

#[test]
fn writes_after_merge_win_recovery() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        db.put(b"k", b"merged-value")?;
        db.close()?;
    }

    {
        let db = reopen(dir.path())?;
        db.merge()?;
        // The active segment was rolled above the merge output, so this
        // overwrite must outrank the merged copy after a replay.
        db.put(b"k", b"post-merge")?;
        db.delete(b"gone")?;
        db.close()?;
    }

    let db = reopen(dir.path())?;
    assert_eq!(db.get(b"k")?.unwrap(), b"post-merge");
    Ok(())
}

#[test]
fn deletes_after_merge_survive_recovery() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        db.put(b"doomed", b"v")?;
        db.put(b"kept", b"v")?;
        db.close()?;
    }

    {
        let db = reopen(dir.path())?;
        db.merge()?;
        db.delete(b"doomed")?;
        db.close()?;
    }

    let db = reopen(dir.path())?;
    assert_eq!(db.get(b"doomed")?, None, "delete must outrank merged copy");
    assert_eq!(db.get(b"kept")?.unwrap(), b"v");
    Ok(())
}

#[test]
fn repeated_merges_converge() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        for i in 0..10u32 {
            db.put(format!("k{}", i).as_bytes(), b"v")?;
        }
        db.close()?;
    }

    let db = reopen(dir.path())?;
    db.merge()?;
    db.merge()?; // second merge compacts the first merge's output again
    assert_eq!(db.len(), 10);
    for i in 0..10u32 {
        assert_eq!(db.get(format!("k{}", i).as_bytes())?.unwrap(), b"v");
    }
    Ok(())
}

#[test]
fn merge_removes_superseded_files() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(
            dir.path(),
            Options {
                max_file_size: 128,
                ..Options::default()
            },
        )?;
        for i in 0..30u32 {
            db.put(b"hot", format!("value-{:04}", i).as_bytes())?;
        }
        db.close()?;
    }
    let segments_before = count_cask_files(dir.path());
    assert!(segments_before > 2);

    let db = reopen(dir.path())?;
    db.merge()?;

    // One merged output (one hot key) plus the fresh active segment.
    assert_eq!(count_cask_files(dir.path()), 2);
    assert_eq!(db.get(b"hot")?.unwrap(), b"value-0029");
    Ok(())
}

#[test]
fn staging_dir_is_cleaned_after_merge() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        db.put(b"k", b"v")?;
        db.close()?;
    }

    let db = reopen(dir.path())?;
    db.merge()?;
    assert!(!dir.path().join(".merge").exists());
    Ok(())
}
