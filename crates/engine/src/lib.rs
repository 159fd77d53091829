//! # Engine — Caskade storage engine
//!
//! The central orchestrator tying the [`record`], [`segment`], and [`keydir`]
//! crates into a Bitcask-style append-only key/value store: one writer, many
//! readers, immutable segment files, and an in-memory key directory rebuilt
//! from disk at open.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                     ENGINE                       │
//! │                                                  │
//! │ write.rs → encode record → append to active      │
//! │                │            segment              │
//! │                v                                 │
//! │            keydir insert/remove                  │
//! │                                                  │
//! │ read.rs  → keydir lookup → one pread from the    │
//! │            referenced segment (no lock held)     │
//! │                                                  │
//! │ merge.rs → snapshot → stream live records into   │
//! │            new segments + hints → atomic install │
//! │                                                  │
//! │ recovery.rs → replay *.cask (or *.hint) at open  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module       | Purpose                                                |
//! |--------------|--------------------------------------------------------|
//! | `lib.rs`     | `Engine` struct, `open`, accessors, `Debug`, `Drop`    |
//! | [`recovery`] | segment replay, hint loading, truncation, staging GC   |
//! | [`write`]    | `put()`, `delete()`, `sync()`, `close()`, rollover     |
//! | [`read`]     | `get()`, `list()`, `fold()`                            |
//! | [`merge`]    | compaction into a canonical, hint-backed segment set   |
//! | [`lock`]     | the `.lock` single-writer exclusion file               |
//!
//! ## Concurrency
//!
//! One reader/writer lock protects the key directory, the append cursor, and
//! the active-segment handle. Readers clone an `Arc`'d segment handle out of
//! the read lock and perform the positional read with no lock held; `put`,
//! `delete`, and merge's snapshot/install steps take the write lock. The
//! engine spawns no threads of its own — merge runs on whichever thread
//! calls it.
//!
//! ## Crash Safety
//!
//! Every record is CRC-framed. Recovery replays segments in ascending
//! `(segment id, offset)` order; the first corrupt record in a segment
//! truncates that segment to its last valid boundary. Merge writes into a
//! staging directory, fsyncs, renames, and fsyncs the directory before any
//! superseded file is unlinked, so a crash at any point leaves either the
//! old set or the new set visible.

mod error;
mod lock;
mod merge;
mod read;
mod recovery;
mod write;

pub use error::{Error, Result};

use error::IoResultExt;
use keydir::KeyDir;
use lock::Lockfile;
use parking_lot::{Mutex, RwLock};
use segment::{Appender, Reader};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default segment rollover threshold (2 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;
/// Default maximum key size (64 KiB).
pub const DEFAULT_MAX_KEY_SIZE: u32 = 64 * 1024;
/// Default maximum value size (100 MiB).
pub const DEFAULT_MAX_VALUE_SIZE: u32 = 100 * 1024 * 1024;

/// Tunables fixed at open time.
#[derive(Debug, Clone)]
pub struct Options {
    /// Open for reading only: recovery runs, but no lockfile is written, no
    /// active segment is created, and every mutating operation fails with
    /// [`Error::ReadOnly`].
    pub read_only: bool,
    /// Fsync the active segment before acknowledging each `put`/`delete`.
    pub sync_on_put: bool,
    /// Byte threshold at which the active segment is sealed and a new one
    /// opened. A single record is never split across segments.
    pub max_file_size: u64,
    /// Puts with larger keys are rejected.
    pub max_key_size: u32,
    /// Puts with larger values are rejected.
    pub max_value_size: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            read_only: false,
            sync_on_put: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_key_size: DEFAULT_MAX_KEY_SIZE,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }
}

/// State behind the engine's reader/writer lock: the key directory, the
/// writer's append view of the active segment, and the shared read views of
/// every segment (one open descriptor each, keyed by segment id).
struct Inner {
    keydir: KeyDir,
    /// `None` in read-only mode and after close.
    active: Option<Appender>,
    readers: HashMap<u64, Arc<Reader>>,
    lockfile: Option<Lockfile>,
    /// Reusable encode buffer for the write path.
    scratch: Vec<u8>,
    closed: bool,
}

/// A Bitcask-style append-only key/value store over one directory.
///
/// All operations take `&self`; the engine is safe to share across threads
/// (`Arc<Engine>`). At most one `Engine` may have a directory open for
/// writing at a time, enforced by the `.lock` file.
///
/// # Example
///
/// ```no_run
/// use engine::{Engine, Options};
///
/// let db = Engine::open("data", Options::default()).unwrap();
/// db.put(b"hello", b"world").unwrap();
/// assert_eq!(db.get(b"hello").unwrap().as_deref(), Some(&b"world"[..]));
/// db.close().unwrap();
/// ```
pub struct Engine {
    dir: PathBuf,
    opts: Options,
    inner: RwLock<Inner>,
    /// Held for the duration of a merge; `try_lock` failure maps to `Busy`.
    merge_guard: Mutex<()>,
}

impl Engine {
    /// Opens the database in `dir`, which must already exist (directory
    /// creation and permissions are the caller's concern).
    ///
    /// Writable opens acquire the `.lock` file (failing with
    /// [`Error::Locked`] if another process holds it), garbage-collect any
    /// stale merge staging area, replay every segment — from its hint file
    /// when one exists, otherwise record by record with truncation recovery —
    /// and then open a fresh active segment. Read-only opens replay without
    /// touching the directory.
    pub fn open<P: AsRef<Path>>(dir: P, opts: Options) -> Result<Engine> {
        let dir = dir.as_ref().to_path_buf();
        let meta = fs::metadata(&dir).ctx("stat", &dir)?;
        if !meta.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let mut lockfile = if opts.read_only {
            None
        } else {
            recovery::gc_stale_staging(&dir)?;
            Some(Lockfile::acquire(&dir)?)
        };

        // A recovery failure must give the lock back, or the directory would
        // stay unopenable until someone removed `.lock` by hand.
        match Self::recover_and_activate(&dir, &opts, lockfile.as_ref()) {
            Ok((keydir, readers, active)) => Ok(Engine {
                dir,
                opts,
                inner: RwLock::new(Inner {
                    keydir,
                    active,
                    readers,
                    lockfile,
                    scratch: Vec::with_capacity(256),
                    closed: false,
                }),
                merge_guard: Mutex::new(()),
            }),
            Err(e) => {
                if let Some(lf) = lockfile.take() {
                    let _ = lf.release();
                }
                Err(e)
            }
        }
    }

    fn recover_and_activate(
        dir: &Path,
        opts: &Options,
        lockfile: Option<&Lockfile>,
    ) -> Result<(KeyDir, HashMap<u64, Arc<Reader>>, Option<Appender>)> {
        let (keydir, mut readers, next_id) = recovery::rebuild(dir, opts)?;

        let active = if opts.read_only {
            None
        } else {
            let data = segment::data_path(dir, next_id);
            let appender = Appender::create(dir, next_id).ctx("create", &data)?;
            readers.insert(
                next_id,
                Arc::new(Reader::open(dir, next_id).ctx("open", &data)?),
            );
            if let Some(lf) = lockfile {
                lf.record_active(next_id)?;
            }
            Some(appender)
        };

        Ok((keydir, readers, active))
    }

    /// The database directory this engine was opened on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().keydir.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().keydir.is_empty()
    }

    /// Number of segment files currently referenced (including the active
    /// segment on a writable engine).
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.inner.read().readers.len()
    }

    /// Id of the active segment, if this engine is writable and open.
    #[must_use]
    pub fn active_segment_id(&self) -> Option<u64> {
        self.inner.read().active.as_ref().map(|a| a.id())
    }

    /// Smallest unused segment id: one past the highest id referenced.
    fn next_segment_id(inner: &Inner) -> u64 {
        inner.readers.keys().max().map_or(1, |max| max + 1)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Engine")
            .field("dir", &self.dir)
            .field("read_only", &self.opts.read_only)
            .field("sync_on_put", &self.opts.sync_on_put)
            .field("max_file_size", &self.opts.max_file_size)
            .field("live_keys", &inner.keydir.len())
            .field("segments", &inner.readers.len())
            .field("active", &inner.active.as_ref().map(|a| a.id()))
            .field("closed", &inner.closed)
            .finish()
    }
}

/// Best-effort close on drop: flush the active segment and release the
/// lockfile. Errors are ignored because `Drop` cannot propagate them; the
/// data is already durable up to the last `sync`.
impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;
