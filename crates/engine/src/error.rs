//! Error contract of the engine.
//!
//! Disk failures are never swallowed: every I/O error is surfaced with the
//! operation and path that produced it. Recovery-time corruption is the one
//! exception — it is repaired locally by truncation and does not propagate.
//! A missing key is not an error; `get` returns `Ok(None)`.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Empty key, oversize key or value, or the reserved tombstone value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Another process holds the directory lock.
    #[error("database at {} is locked ({holder})", path.display())]
    Locked { path: PathBuf, holder: String },

    /// A mutating operation was attempted on a read-only store.
    #[error("store is read-only")]
    ReadOnly,

    /// The engine has been closed; no further operations are accepted.
    #[error("store is closed")]
    Closed,

    /// A merge is already in progress.
    #[error("merge already in progress")]
    Busy,

    /// A record or directory entry references data that is not intact.
    #[error("corrupt record in {} at offset {offset}", path.display())]
    Corrupt { path: PathBuf, offset: u64 },

    /// An underlying filesystem failure.
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Attaches operation + path context to raw I/O results.
pub(crate) trait IoResultExt<T> {
    fn ctx(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn ctx(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(op, path, e))
    }
}

impl<T> IoResultExt<T> for std::result::Result<T, segment::SegmentError> {
    fn ctx(self, op: &'static str, path: &Path) -> Result<T> {
        use segment::SegmentError;
        self.map_err(|e| match e {
            SegmentError::Io(source) => Error::io(op, path, source),
            SegmentError::ShortRead { offset, .. } => Error::Corrupt {
                path: path.to_path_buf(),
                offset,
            },
            SegmentError::Sealed(id) => Error::io(
                op,
                path,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("segment {} is sealed", id),
                ),
            ),
            SegmentError::CorruptHint { path } => Error::Corrupt { path, offset: 0 },
        })
    }
}
