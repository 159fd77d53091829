//! The `.lock` file: single-writer exclusion for a database directory.
//!
//! Presence of the file forbids concurrent writable opens. Its contents are
//! purely diagnostic — one human-readable line naming the owning pid and the
//! current active segment — so an operator staring at a `locked` error can
//! see who holds the directory.

use crate::error::{Error, IoResultExt, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the lockfile within the database directory.
pub const LOCKFILE: &str = ".lock";

/// An acquired directory lock. Released explicitly via [`release`]
/// (unlinking the file) when the engine closes.
///
/// [`release`]: Lockfile::release
#[derive(Debug)]
pub(crate) struct Lockfile {
    path: PathBuf,
}

impl Lockfile {
    /// Claims the lock by creating `.lock` with `create_new`.
    ///
    /// If the file already exists and is readable, the open fails with
    /// [`Error::Locked`] carrying the holder's diagnostics. An existing but
    /// unreadable lockfile is treated as abandoned and overwritten.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCKFILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(Self::contents("pending").as_bytes())
                    .ctx("write", &path)?;
                file.sync_all().ctx("sync", &path)?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match fs::read_to_string(&path) {
                    Ok(holder) => Err(Error::Locked {
                        path,
                        holder: holder.trim().to_string(),
                    }),
                    Err(_) => {
                        fs::write(&path, Self::contents("pending")).ctx("write", &path)?;
                        Ok(Self { path })
                    }
                }
            }
            Err(e) => Err(Error::io("create", path, e)),
        }
    }

    /// Rewrites the diagnostics line to name the current active segment.
    pub fn record_active(&self, id: u64) -> Result<()> {
        let active = format!("{:020}.{}", id, segment::DATA_EXT);
        fs::write(&self.path, Self::contents(&active)).ctx("write", &self.path)
    }

    /// Unlinks the lockfile, releasing the directory.
    pub fn release(self) -> Result<()> {
        fs::remove_file(&self.path).ctx("unlink", &self.path)
    }

    fn contents(active: &str) -> String {
        format!("pid={} active={}\n", std::process::id(), active)
    }
}
