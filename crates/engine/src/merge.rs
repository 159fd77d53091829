//! Merge: compacting the immutable segments into a canonical set.
//!
//! Merge streams one record per live key out of a directory snapshot into
//! fresh segment files (plus hint files) in a staging subdirectory, then
//! atomically installs them: fsync the staged files, rename them into the
//! main directory under new ids, fsync the directory, repoint the key
//! directory, and only then unlink the superseded segments.
//!
//! Recovery prefers higher segment ids, so the install step must keep that
//! relation truthful: keys rewritten while the merge streamed are re-copied
//! from their current location into the output, keys deleted meanwhile get a
//! shadowing tombstone there, and the active segment is rolled to an id
//! above the output so every later write outranks the merged copies.
//!
//! Readers are never blocked except by the install step; in-flight reads of
//! an unlinked input keep working through their cloned descriptors.

use crate::error::{Error, IoResultExt, Result};
use crate::write::unix_timestamp;
use crate::Engine;
use keydir::DirEntry;
use segment::{Appender, HintEntry, HintWriter, Reader};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

/// Staging subdirectory inside the database directory. Never enumerated as
/// data; leftovers from a crashed merge are removed on the next open.
pub(crate) const STAGING_DIR: &str = ".merge";

/// One staged output segment and its hint file, named by ordinal until the
/// install step assigns final ids.
struct Output {
    data: Appender,
    hints: HintWriter,
}

/// Where a snapshot key will live once the output is installed.
struct Planned {
    output: usize,
    value_position: u64,
    value_size: u32,
    timestamp: u32,
}

impl Engine {
    /// Compacts all immutable segments into a minimal set containing exactly
    /// one record per live key, plus hint files, then removes the
    /// superseded files.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if a merge is already running, [`Error::ReadOnly`] on
    /// a read-only store, [`Error::Closed`] after close, and [`Error::Io`]
    /// on any filesystem failure.
    pub fn merge(&self) -> Result<()> {
        if self.opts.read_only {
            return Err(Error::ReadOnly);
        }
        let Some(_guard) = self.merge_guard.try_lock() else {
            return Err(Error::Busy);
        };

        // Step 1 — brief write lock: a consistent cut of the directory and
        // the immutable segment set. The active segment is not merge input.
        let (snapshot, input_ids, input_readers) = {
            let inner = self.inner.write();
            if inner.closed {
                return Err(Error::Closed);
            }
            let Some(active_id) = inner.active.as_ref().map(|a| a.id()) else {
                return Err(Error::ReadOnly);
            };
            let mut input_ids: Vec<u64> = inner
                .readers
                .keys()
                .copied()
                .filter(|id| *id != active_id)
                .collect();
            input_ids.sort_unstable();
            let snapshot: Vec<(Vec<u8>, DirEntry)> = inner
                .keydir
                .entries()
                .into_iter()
                .filter(|(_, e)| e.segment_id != active_id)
                .collect();
            let input_readers: HashMap<u64, Arc<Reader>> = input_ids
                .iter()
                .filter_map(|id| inner.readers.get(id).map(|r| (*id, Arc::clone(r))))
                .collect();
            (snapshot, input_ids, input_readers)
        };

        if input_ids.is_empty() {
            return Ok(());
        }

        let staging = self.dir.join(STAGING_DIR);
        if staging.exists() {
            fs::remove_dir_all(&staging).ctx("remove", &staging)?;
        }
        fs::create_dir(&staging).ctx("create", &staging)?;

        let result = self.merge_and_install(&staging, &snapshot, &input_ids, &input_readers);
        if result.is_err() {
            let _ = fs::remove_dir_all(&staging);
        }
        result
    }

    fn merge_and_install(
        &self,
        staging: &Path,
        snapshot: &[(Vec<u8>, DirEntry)],
        input_ids: &[u64],
        input_readers: &HashMap<u64, Arc<Reader>>,
    ) -> Result<()> {
        let max_file_size = self.opts.max_file_size;
        let mut outputs: Vec<Output> = Vec::new();
        let mut planned: HashMap<Vec<u8>, Planned> = HashMap::new();
        let mut scratch = Vec::with_capacity(256);

        // Step 2 — no lock held: stream the snapshot into staging.
        for (key, entry) in snapshot {
            let reader = input_readers
                .get(&entry.segment_id)
                .ok_or_else(|| Error::Corrupt {
                    path: segment::data_path(&self.dir, entry.segment_id),
                    offset: entry.value_position,
                })?;
            let value = reader
                .read_at(entry.value_position, entry.value_size as usize)
                .ctx("read", reader.path())?;
            let loc = append_merged(
                staging,
                &mut outputs,
                &mut scratch,
                max_file_size,
                key,
                &value,
                entry.timestamp,
            )?;
            planned.insert(key.clone(), loc);
        }

        // Step 3 — write lock: reconcile concurrent writes, then install.
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }

        for (key, old) in snapshot {
            match inner.keydir.get(key) {
                Some(cur) if cur == old => {}
                Some(cur) => {
                    // Rewritten while the merge streamed. Copy the current
                    // record into the output so its higher id stays truthful.
                    let cur = *cur;
                    let reader = inner
                        .readers
                        .get(&cur.segment_id)
                        .cloned()
                        .ok_or_else(|| Error::Corrupt {
                            path: segment::data_path(&self.dir, cur.segment_id),
                            offset: cur.value_position,
                        })?;
                    let value = reader
                        .read_at(cur.value_position, cur.value_size as usize)
                        .ctx("read", reader.path())?;
                    let loc = append_merged(
                        staging,
                        &mut outputs,
                        &mut scratch,
                        max_file_size,
                        key,
                        &value,
                        cur.timestamp,
                    )?;
                    planned.insert(key.clone(), loc);
                }
                None => {
                    // Deleted while the merge streamed. The stale live copy
                    // is already staged; shadow it with a tombstone.
                    append_tombstone(staging, &mut outputs, &mut scratch, max_file_size, key)?;
                    planned.remove(key);
                }
            }
        }

        // The staged set becomes durable before it becomes visible.
        for out in &mut outputs {
            out.data.sync().ctx("sync", out.data.path())?;
            out.hints.sync().ctx("sync", out.hints.path())?;
        }
        File::open(staging)
            .ctx("open", staging)?
            .sync_all()
            .ctx("sync", staging)?;

        // Assign final ids above everything currently referenced and rename
        // the staged files into the main directory.
        let base = Engine::next_segment_id(&inner);
        for (i, out) in outputs.iter().enumerate() {
            let id = base + i as u64;
            let data = segment::data_path(&self.dir, id);
            fs::rename(out.data.path(), &data).ctx("rename", out.data.path())?;
            let hint = segment::hint_path(&self.dir, id);
            fs::rename(out.hints.path(), &hint).ctx("rename", out.hints.path())?;
        }
        File::open(&self.dir)
            .ctx("open", &self.dir)?
            .sync_all()
            .ctx("sync", &self.dir)?;

        for i in 0..outputs.len() {
            let id = base + i as u64;
            let data = segment::data_path(&self.dir, id);
            inner
                .readers
                .insert(id, Arc::new(Reader::open(&self.dir, id).ctx("open", &data)?));
        }

        // Repoint the directory at the merged copies. `planned` reflects the
        // in-lock reconciliation, so unconditional inserts are exact.
        for (key, loc) in planned {
            inner.keydir.insert(
                key,
                DirEntry {
                    segment_id: base + loc.output as u64,
                    value_position: loc.value_position,
                    value_size: loc.value_size,
                    timestamp: loc.timestamp,
                },
            );
        }

        // Every later write must outrank the merge output during recovery.
        if !outputs.is_empty() {
            let stale_active = inner
                .active
                .as_ref()
                .and_then(|a| (a.offset() == 0).then_some(a.id()));
            self.roll_active(&mut inner)?;
            // An active segment that never saw a write has nothing to keep.
            if let Some(id) = stale_active {
                inner.readers.remove(&id);
                let data = segment::data_path(&self.dir, id);
                fs::remove_file(&data).ctx("unlink", &data)?;
            }
        }

        // Unlink the superseded inputs. In-flight reads keep working through
        // their cloned descriptors.
        for id in input_ids {
            inner.readers.remove(id);
            let data = segment::data_path(&self.dir, *id);
            fs::remove_file(&data).ctx("unlink", &data)?;
            let hint = segment::hint_path(&self.dir, *id);
            if hint.exists() {
                fs::remove_file(&hint).ctx("unlink", &hint)?;
            }
        }

        drop(inner);
        // Cosmetic: the now-empty staging directory. A leftover is GC'd on
        // the next open.
        let _ = fs::remove_dir(staging);
        Ok(())
    }
}

/// Appends one live record to the staged output, opening a new output file
/// when the current one is full, and records the matching hint entry.
fn append_merged(
    staging: &Path,
    outputs: &mut Vec<Output>,
    scratch: &mut Vec<u8>,
    max_file_size: u64,
    key: &[u8],
    value: &[u8],
    timestamp: u32,
) -> Result<Planned> {
    scratch.clear();
    record::encode(scratch, key, value, timestamp);

    let idx = ensure_room(staging, outputs, scratch.len() as u64, max_file_size)?;
    let out = &mut outputs[idx];
    let offset = {
        let path = out.data.path().to_path_buf();
        out.data.append(scratch).ctx("append", &path)?
    };
    let value_position = record::value_position(offset, key.len());
    let value_size = value.len() as u32;
    let hint = HintEntry {
        timestamp,
        value_size,
        value_position,
        key: key.to_vec(),
    };
    {
        let path = out.hints.path().to_path_buf();
        out.hints.push(&hint).ctx("write", &path)?;
    }
    Ok(Planned {
        output: idx,
        value_position,
        value_size,
        timestamp,
    })
}

/// Appends a tombstone record and its sentinel hint entry to the staged
/// output, shadowing a stale live copy for a key deleted mid-merge.
fn append_tombstone(
    staging: &Path,
    outputs: &mut Vec<Output>,
    scratch: &mut Vec<u8>,
    max_file_size: u64,
    key: &[u8],
) -> Result<()> {
    let timestamp = unix_timestamp();
    scratch.clear();
    record::encode(scratch, key, record::TOMBSTONE, timestamp);

    let idx = ensure_room(staging, outputs, scratch.len() as u64, max_file_size)?;
    let out = &mut outputs[idx];
    let offset = {
        let path = out.data.path().to_path_buf();
        out.data.append(scratch).ctx("append", &path)?
    };
    let hint = HintEntry {
        timestamp,
        value_size: segment::HINT_TOMBSTONE,
        value_position: record::value_position(offset, key.len()),
        key: key.to_vec(),
    };
    let path = out.hints.path().to_path_buf();
    out.hints.push(&hint).ctx("write", &path)
}

/// Index of an output with room for `frame_len` more bytes, opening the next
/// ordinal-numbered staging segment when the current one is full. A record
/// is never split; one larger than `max_file_size` gets a file to itself.
fn ensure_room(
    staging: &Path,
    outputs: &mut Vec<Output>,
    frame_len: u64,
    max_file_size: u64,
) -> Result<usize> {
    if let Some(out) = outputs.last() {
        let offset = out.data.offset();
        if offset == 0 || offset + frame_len <= max_file_size {
            return Ok(outputs.len() - 1);
        }
    }
    let ordinal = outputs.len() as u64;
    let data_path = segment::data_path(staging, ordinal);
    let data = Appender::create(staging, ordinal).ctx("create", &data_path)?;
    let hint_path = segment::hint_path(staging, ordinal);
    let hints = HintWriter::create(staging, ordinal).ctx("create", &hint_path)?;
    outputs.push(Output { data, hints });
    Ok(outputs.len() - 1)
}
