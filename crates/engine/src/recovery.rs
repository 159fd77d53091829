//! Cold-start recovery: rebuilding the key directory from disk.
//!
//! Segments are replayed in ascending id order and records within a segment
//! in offset order, so "last applied wins" is exactly the `(segment id,
//! offset)` recency relation. Wall-clock timestamps are carried but never
//! consulted. A segment with a hint file is rebuilt from the hint instead of
//! the data file; a hint that fails to parse falls back to the full scan.

use crate::error::{Error, IoResultExt, Result};
use crate::merge::STAGING_DIR;
use crate::Options;
use keydir::{DirEntry, KeyDir};
use record::DecodeError;
use segment::Reader;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Replays every segment in `dir`, returning the rebuilt key directory, a
/// read view per surviving segment, and the id to use for the next segment.
pub(crate) fn rebuild(
    dir: &Path,
    opts: &Options,
) -> Result<(KeyDir, HashMap<u64, Arc<Reader>>, u64)> {
    let ids = segment::segment_ids(dir).ctx("scan", dir)?;
    let mut keydir = KeyDir::new();
    let mut readers = HashMap::new();
    let mut max_id = 0u64;

    for id in ids {
        max_id = max_id.max(id);
        let data = segment::data_path(dir, id);
        let len = fs::metadata(&data).ctx("stat", &data)?.len();

        // Empty leftovers from opens that never wrote anything. Their ids
        // stay burned (max_id already counts them).
        if len == 0 && !opts.read_only {
            fs::remove_file(&data).ctx("unlink", &data)?;
            let hint = segment::hint_path(dir, id);
            if hint.exists() {
                fs::remove_file(&hint).ctx("unlink", &hint)?;
            }
            continue;
        }

        let hint = segment::hint_path(dir, id);
        let mut loaded = false;
        if hint.exists() {
            match segment::read_hints(&hint, opts.max_key_size) {
                Ok(entries) => {
                    for e in entries {
                        apply_hint(&mut keydir, id, e);
                    }
                    loaded = true;
                }
                Err(_) => {
                    // unusable hint: the data file is still authoritative
                }
            }
        }
        if !loaded {
            scan_segment(dir, id, opts, &mut keydir)?;
        }

        readers.insert(id, Arc::new(Reader::open(dir, id).ctx("open", &data)?));
    }

    Ok((keydir, readers, max_id + 1))
}

fn apply_hint(keydir: &mut KeyDir, id: u64, e: segment::HintEntry) {
    if e.is_tombstone() {
        keydir.remove(&e.key);
    } else {
        keydir.insert(
            e.key,
            DirEntry {
                segment_id: id,
                value_position: e.value_position,
                value_size: e.value_size,
                timestamp: e.timestamp,
            },
        );
    }
}

/// Replays one data file record by record. The first corrupt or truncated
/// record discards the rest of the segment: in writable mode the file is
/// truncated back to the last valid boundary, in read-only mode it is merely
/// ignored.
fn scan_segment(dir: &Path, id: u64, opts: &Options, keydir: &mut KeyDir) -> Result<()> {
    let path = segment::data_path(dir, id);
    let file = File::open(&path).ctx("open", &path)?;
    let mut rdr = BufReader::new(file);

    // The store's own tombstones must always decode, even under a
    // pathologically small max_value_size.
    let limits = record::Limits {
        max_key_size: opts.max_key_size,
        max_value_size: opts.max_value_size.max(record::TOMBSTONE.len() as u32),
    };

    let mut offset = 0u64;
    loop {
        match record::read_record(&mut rdr, limits) {
            Ok(None) => break,
            Ok(Some(rec)) => {
                if rec.is_tombstone() {
                    keydir.remove(&rec.key);
                } else {
                    let value_position = record::value_position(offset, rec.key.len());
                    keydir.insert(
                        rec.key.clone(),
                        DirEntry {
                            segment_id: id,
                            value_position,
                            value_size: rec.value.len() as u32,
                            timestamp: rec.timestamp,
                        },
                    );
                }
                offset += rec.frame_len();
            }
            Err(
                DecodeError::ShortRead
                | DecodeError::BadCrc { .. }
                | DecodeError::ImpossibleSize { .. }
                | DecodeError::ZeroKeySize,
            ) => {
                if !opts.read_only {
                    drop(rdr);
                    truncate_segment(&path, offset)?;
                }
                break;
            }
            Err(DecodeError::Io(e)) => return Err(Error::io("read", &path, e)),
        }
    }

    Ok(())
}

/// Cuts a segment back to `len`, the last valid record boundary.
fn truncate_segment(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path).ctx("open", path)?;
    file.set_len(len).ctx("truncate", path)?;
    file.sync_all().ctx("sync", path)?;
    Ok(())
}

/// Removes a leftover merge staging directory from a crashed merge.
pub(crate) fn gc_stale_staging(dir: &Path) -> Result<()> {
    let staging = dir.join(STAGING_DIR);
    if staging.exists() {
        fs::remove_dir_all(&staging).ctx("remove", &staging)?;
    }
    Ok(())
}
