use crate::tests::helpers::*;
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

// --------------------- Basic operations ---------------------

#[test]
fn basic_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(dir.path(), Options::default())?;

    db.put(b"alpha", b"1")?;
    assert_eq!(db.get(b"alpha")?.unwrap(), b"1");
    assert_eq!(db.list()?, vec![b"alpha".to_vec()]);
    assert_eq!(db.len(), 1);
    Ok(())
}

#[test]
fn overwrite_returns_newest() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        db.put(b"k", b"v1")?;
        db.put(b"k", b"v2")?;
        assert_eq!(db.get(b"k")?.unwrap(), b"v2");
        db.close()?;
    }

    let db = Engine::open(dir.path(), Options::default())?;
    assert_eq!(db.get(b"k")?.unwrap(), b"v2");
    Ok(())
}

#[test]
fn delete_then_reinsert() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        db.put(b"k", b"a")?;
        db.delete(b"k")?;
        assert_eq!(db.get(b"k")?, None);
        db.put(b"k", b"b")?;
        assert_eq!(db.get(b"k")?.unwrap(), b"b");
        db.close()?;
    }

    let db = Engine::open(dir.path(), Options::default())?;
    assert_eq!(db.get(b"k")?.unwrap(), b"b");
    assert_eq!(db.list()?, vec![b"k".to_vec()]);
    Ok(())
}

#[test]
fn delete_absent_key_appends_nothing() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(dir.path(), Options::default())?;
    db.put(b"other", b"v")?;

    let bytes_before = total_cask_bytes(dir.path());
    db.delete(b"missing")?;
    assert_eq!(total_cask_bytes(dir.path()), bytes_before);
    Ok(())
}

#[test]
fn binary_keys_and_values() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(dir.path(), Options::default())?;

    let key = vec![0x00u8, 0xFF, 0x80, 0x7F];
    let val = vec![0xDEu8, 0xAD, 0xBE, 0xEF, 0x00];
    db.put(&key, &val)?;
    assert_eq!(db.get(&key)?.unwrap(), val);
    Ok(())
}

#[test]
fn empty_value_is_legal() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(dir.path(), Options::default())?;
    db.put(b"k", b"")?;
    assert_eq!(db.get(b"k")?.unwrap(), b"");
    Ok(())
}

// --------------------- Validation ---------------------

#[test]
fn empty_key_rejected() {
    let dir = tempdir().unwrap();
    let db = Engine::open(dir.path(), Options::default()).unwrap();

    assert!(matches!(
        db.put(b"", b"v"),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(db.delete(b""), Err(Error::InvalidArgument(_))));
}

#[test]
fn oversize_key_rejected() {
    let dir = tempdir().unwrap();
    let db = Engine::open(
        dir.path(),
        Options {
            max_key_size: 8,
            ..Options::default()
        },
    )
    .unwrap();

    assert!(db.put(b"12345678", b"v").is_ok());
    assert!(matches!(
        db.put(b"123456789", b"v"),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn oversize_value_rejected() {
    let dir = tempdir().unwrap();
    let db = Engine::open(
        dir.path(),
        Options {
            max_value_size: 4,
            ..Options::default()
        },
    )
    .unwrap();

    assert!(db.put(b"k", b"1234").is_ok());
    assert!(matches!(
        db.put(b"k", b"12345"),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn reserved_tombstone_value_rejected() {
    let dir = tempdir().unwrap();
    let db = Engine::open(dir.path(), Options::default()).unwrap();

    assert!(matches!(
        db.put(b"k", b"bitcask_tombstone"),
        Err(Error::InvalidArgument(_))
    ));
    // one byte off is a perfectly ordinary value
    assert!(db.put(b"k", b"bitcask_tombston").is_ok());
}

// --------------------- Rollover ---------------------

#[test]
fn rollover_splits_writes_across_segments() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(
        dir.path(),
        Options {
            max_file_size: 1024,
            ..Options::default()
        },
    )?;

    // ~50-byte records: 16 header + 5 key + 30 value
    for i in 0..100u32 {
        db.put(format!("k{:04}", i).as_bytes(), &[b'v'; 30])?;
    }

    assert!(
        count_cask_files(dir.path()) >= 2,
        "expected at least two segments, got {}",
        count_cask_files(dir.path())
    );

    for i in 0..100u32 {
        assert_eq!(
            db.get(format!("k{:04}", i).as_bytes())?.unwrap(),
            vec![b'v'; 30],
            "k{:04} unreadable after rollover",
            i
        );
    }
    Ok(())
}

#[test]
fn record_larger_than_max_file_size_is_not_split() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(
        dir.path(),
        Options {
            max_file_size: 64,
            ..Options::default()
        },
    )?;

    // Far larger than a segment; must land whole in a single file.
    let big = vec![b'x'; 500];
    db.put(b"big", &big)?;
    assert_eq!(db.get(b"big")?.unwrap(), big);

    let records = decode_all_segments(dir.path());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, big);
    Ok(())
}

#[test]
fn rollover_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(
            dir.path(),
            Options {
                max_file_size: 256,
                ..Options::default()
            },
        )?;
        for i in 0..40u32 {
            db.put(format!("k{:02}", i).as_bytes(), b"some value here")?;
        }
        db.close()?;
    }

    let db = Engine::open(dir.path(), Options::default())?;
    for i in 0..40u32 {
        assert!(db.get(format!("k{:02}", i).as_bytes())?.is_some());
    }
    Ok(())
}

// --------------------- Sync & close ---------------------

#[test]
fn sync_on_put_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(
        dir.path(),
        Options {
            sync_on_put: true,
            ..Options::default()
        },
    )?;

    db.put(b"durable", b"yes")?;
    db.delete(b"durable")?;
    db.put(b"durable", b"again")?;
    assert_eq!(db.get(b"durable")?.unwrap(), b"again");
    Ok(())
}

#[test]
fn explicit_sync_succeeds() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(dir.path(), Options::default())?;
    db.put(b"k", b"v")?;
    db.sync()?;
    Ok(())
}

#[test]
fn closed_engine_rejects_everything() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(dir.path(), Options::default())?;
    db.put(b"k", b"v")?;
    db.close()?;

    assert!(matches!(db.get(b"k"), Err(Error::Closed)));
    assert!(matches!(db.put(b"k", b"v"), Err(Error::Closed)));
    assert!(matches!(db.delete(b"k"), Err(Error::Closed)));
    assert!(matches!(db.list(), Err(Error::Closed)));
    assert!(matches!(db.sync(), Err(Error::Closed)));
    assert!(matches!(db.merge(), Err(Error::Closed)));
    assert!(matches!(db.fold(|_, _| Ok(())), Err(Error::Closed)));
    assert!(matches!(db.close(), Err(Error::Closed)));
    Ok(())
}

// --------------------- Read-only mode ---------------------

#[test]
fn read_only_rejects_mutations() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Engine::open(dir.path(), Options::default())?;
        db.put(b"k", b"v")?;
        db.close()?;
    }

    let ro = Engine::open(
        dir.path(),
        Options {
            read_only: true,
            ..Options::default()
        },
    )?;
    assert_eq!(ro.get(b"k")?.unwrap(), b"v");
    assert!(matches!(ro.put(b"k", b"v2"), Err(Error::ReadOnly)));
    assert!(matches!(ro.delete(b"k"), Err(Error::ReadOnly)));
    assert!(matches!(ro.sync(), Err(Error::ReadOnly)));
    assert!(matches!(ro.merge(), Err(Error::ReadOnly)));
    Ok(())
}

// --------------------- Misc ---------------------

#[test]
fn open_missing_directory_fails() {
    let result = Engine::open("/nonexistent/caskade-db", Options::default());
    assert!(matches!(result, Err(Error::Io { op: "stat", .. })));
}

#[test]
fn debug_output_names_key_fields() -> Result<()> {
    let dir = tempdir()?;
    let db = Engine::open(dir.path(), Options::default())?;
    db.put(b"k", b"v")?;

    let debug = format!("{:?}", db);
    assert!(debug.contains("live_keys: 1"));
    assert!(debug.contains("closed: false"));
    Ok(())
}
