//! Write path: `put()`, `delete()`, `sync()`, `close()`, and rollover.
//!
//! All mutations run under the write lock. Each one encodes a record into
//! the engine's reusable scratch buffer, appends it to the active segment
//! (rolling over first if the record would push the segment past
//! `max_file_size`), and then updates the key directory from the offset the
//! append actually returned.

use crate::error::{Error, IoResultExt, Result};
use crate::{Engine, Inner};
use keydir::DirEntry;
use segment::{Appender, Reader};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

impl Engine {
    /// Stores `value` under `key`.
    ///
    /// Overwrites any previous value. With `sync_on_put` the record is
    /// durable on disk before this returns.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an empty key, a key or value above the
    /// configured maxima, or a value equal to the reserved tombstone marker
    /// `bitcask_tombstone`; [`Error::ReadOnly`] on a read-only store;
    /// [`Error::Closed`] after close; [`Error::Io`] on append failure.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        if value.len() as u64 > self.opts.max_value_size as u64 {
            return Err(Error::InvalidArgument(format!(
                "value too large: {} bytes (max {})",
                value.len(),
                self.opts.max_value_size
            )));
        }
        if value == record::TOMBSTONE {
            return Err(Error::InvalidArgument(
                "value is the reserved tombstone marker".to_string(),
            ));
        }
        if self.opts.read_only {
            return Err(Error::ReadOnly);
        }

        let timestamp = unix_timestamp();
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }

        let mut scratch = std::mem::take(&mut inner.scratch);
        scratch.clear();
        record::encode(&mut scratch, key, value, timestamp);
        let appended = self.append_locked(&mut inner, &scratch);
        inner.scratch = scratch;
        let (segment_id, offset) = appended?;

        inner.keydir.insert(
            key.to_vec(),
            DirEntry {
                segment_id,
                value_position: record::value_position(offset, key.len()),
                value_size: value.len() as u32,
                timestamp,
            },
        );

        if self.opts.sync_on_put {
            self.sync_active(&inner)?;
        }
        Ok(())
    }

    /// Deletes `key` by appending a tombstone record and dropping the key
    /// from the directory.
    ///
    /// Deleting a key that is not live is a no-op: nothing is appended and
    /// `Ok` is returned.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        if self.opts.read_only {
            return Err(Error::ReadOnly);
        }

        let timestamp = unix_timestamp();
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }
        if !inner.keydir.contains_key(key) {
            return Ok(());
        }

        let mut scratch = std::mem::take(&mut inner.scratch);
        scratch.clear();
        record::encode(&mut scratch, key, record::TOMBSTONE, timestamp);
        let appended = self.append_locked(&mut inner, &scratch);
        inner.scratch = scratch;
        appended?;

        inner.keydir.remove(key);

        if self.opts.sync_on_put {
            self.sync_active(&inner)?;
        }
        Ok(())
    }

    /// Forces a durable flush (`fsync`) of the active segment.
    pub fn sync(&self) -> Result<()> {
        if self.opts.read_only {
            return Err(Error::ReadOnly);
        }
        let inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }
        self.sync_active(&inner)
    }

    /// Flushes the active segment, releases every segment handle, and
    /// unlinks the lockfile. All further operations — including a second
    /// `close` — fail with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }
        inner.closed = true;

        if let Some(mut active) = inner.active.take() {
            active.seal().ctx("seal", active.path())?;
        }
        inner.readers.clear();
        inner.keydir.clear();
        if let Some(lockfile) = inner.lockfile.take() {
            lockfile.release()?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Locked helpers
    // -------------------------------------------------------------------------

    /// Appends one encoded frame to the active segment, rolling over first
    /// when the frame would not fit. Returns the segment id and the offset
    /// the frame was written at — always the value reported by the appender,
    /// never a precomputed guess.
    pub(crate) fn append_locked(&self, inner: &mut Inner, frame: &[u8]) -> Result<(u64, u64)> {
        let needs_roll = match &inner.active {
            Some(active) => {
                active.offset() > 0
                    && active.offset() + frame.len() as u64 > self.opts.max_file_size
            }
            None => return Err(Error::ReadOnly),
        };
        if needs_roll {
            self.roll_active(inner)?;
        }

        let Some(active) = inner.active.as_mut() else {
            return Err(Error::ReadOnly);
        };
        let path = active.path().to_path_buf();
        let offset = active.append(frame).ctx("append", &path)?;
        Ok((active.id(), offset))
    }

    /// Seals the active segment and opens a fresh one with the next id. The
    /// sealed segment's read view stays registered; only the append role
    /// moves.
    pub(crate) fn roll_active(&self, inner: &mut Inner) -> Result<()> {
        let Some(active) = inner.active.as_mut() else {
            return Err(Error::ReadOnly);
        };
        active.seal().ctx("seal", active.path())?;

        let next = Engine::next_segment_id(inner);
        let data = segment::data_path(&self.dir, next);
        let appender = Appender::create(&self.dir, next).ctx("create", &data)?;
        inner
            .readers
            .insert(next, Arc::new(Reader::open(&self.dir, next).ctx("open", &data)?));
        inner.active = Some(appender);

        if let Some(lockfile) = &inner.lockfile {
            lockfile.record_active(next)?;
        }
        Ok(())
    }

    fn sync_active(&self, inner: &Inner) -> Result<()> {
        match &inner.active {
            Some(active) => active.sync().ctx("sync", active.path()),
            None => Err(Error::ReadOnly),
        }
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".to_string()));
        }
        if key.len() as u64 > self.opts.max_key_size as u64 {
            return Err(Error::InvalidArgument(format!(
                "key too large: {} bytes (max {})",
                key.len(),
                self.opts.max_key_size
            )));
        }
        Ok(())
    }
}

/// Advisory wall-clock seconds for record headers. Recency is decided by
/// replay order, so a clock stuck before the epoch degrades to zero rather
/// than failing the write.
pub(crate) fn unix_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
