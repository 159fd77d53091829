//! # Segment — append-only data files and hint files
//!
//! A Caskade database directory holds a monotonically numbered sequence of
//! segment files named `<id>.cask` (ids zero-padded so lexicographic order
//! equals numeric order). Exactly one segment is *active* and receives
//! appends through an [`Appender`]; all others are immutable and are read
//! through [`Reader`]s.
//!
//! The two roles are deliberately separate types: the appender is owned
//! exclusively by the writer, while readers perform lock-free positional
//! reads (`pread`) that are safe against concurrent appends to the same
//! file.
//!
//! A segment may have a companion `<id>.hint` file, produced by merge,
//! holding just enough per-record metadata to rebuild the key directory
//! without rescanning the data file:
//!
//! ```text
//! [timestamp: u32 BE][key_size: u32 BE][value_size: u32 BE][value_position: u64 BE][key]
//! ```
//!
//! A hint entry with `value_size == u32::MAX` ([`HINT_TOMBSTONE`]) records a
//! deletion: on rebuild it removes the key instead of inserting it.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extension of segment data files.
pub const DATA_EXT: &str = "cask";
/// File extension of hint files.
pub const HINT_EXT: &str = "hint";

/// Fixed header length of a hint entry in bytes.
pub const HINT_HEADER_LEN: usize = 20;

/// `value_size` sentinel marking a hint entry as a tombstone.
pub const HINT_TOMBSTONE: u32 = u32::MAX;

/// Errors from segment and hint file operations.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An append was attempted on a sealed segment.
    #[error("segment {0} is sealed")]
    Sealed(u64),

    /// A positional read ran past the end of the file.
    #[error("short read at offset {offset} (wanted {wanted} bytes)")]
    ShortRead { offset: u64, wanted: usize },

    /// A hint file could not be parsed; callers fall back to scanning the
    /// data file.
    #[error("corrupt hint file {}", path.display())]
    CorruptHint { path: PathBuf },
}

/// Path of the data file for segment `id` inside `dir`.
#[must_use]
pub fn data_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:020}.{}", id, DATA_EXT))
}

/// Path of the hint file for segment `id` inside `dir`.
#[must_use]
pub fn hint_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:020}.{}", id, HINT_EXT))
}

/// Parses a segment id out of a `*.cask` path. Returns `None` for anything
/// else (hint files, the lockfile, staging directories).
#[must_use]
pub fn parse_id(path: &Path) -> Option<u64> {
    if path.extension().and_then(|e| e.to_str()) != Some(DATA_EXT) {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Enumerates the segment ids present in `dir`, ascending.
pub fn segment_ids(dir: &Path) -> io::Result<Vec<u64>> {
    let mut ids: Vec<u64> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| parse_id(&e.path()))
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

// =============================================================================
// Appender — the writer's exclusive view of the active segment
// =============================================================================

/// Append-only handle to the active segment.
///
/// Owned exclusively by the engine's writer; every append is serialized by
/// the engine's write lock. The cursor mirrors the file offset: it starts at
/// zero for a fresh segment and advances by exactly the length of each
/// successful append.
#[derive(Debug)]
pub struct Appender {
    id: u64,
    path: PathBuf,
    file: File,
    cursor: u64,
    sealed: bool,
}

impl Appender {
    /// Creates `<id>.cask` in `dir` and opens it for appending.
    ///
    /// Fails if the file already exists — segment ids are never reused.
    pub fn create(dir: &Path, id: u64) -> Result<Self, SegmentError> {
        let path = data_path(dir, id);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            id,
            path,
            file,
            cursor: 0,
            sealed: false,
        })
    }

    /// Appends `bytes`, returning the offset at which they begin.
    ///
    /// On a failed write the cursor is resynchronized from the file's actual
    /// length rather than the in-memory sum, so a partial write can never
    /// leave the cursor pointing past real data.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64, SegmentError> {
        if self.sealed {
            return Err(SegmentError::Sealed(self.id));
        }
        let offset = self.cursor;
        if let Err(e) = self.file.write_all(bytes) {
            self.cursor = self.file.metadata()?.len();
            return Err(e.into());
        }
        self.cursor += bytes.len() as u64;
        Ok(offset)
    }

    /// Forces written data to disk (`fsync`). Valid on sealed segments.
    pub fn sync(&self) -> Result<(), SegmentError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Flushes to disk and transitions the handle to immutable; further
    /// appends are rejected with [`SegmentError::Sealed`].
    pub fn seal(&mut self) -> Result<(), SegmentError> {
        self.file.sync_all()?;
        self.sealed = true;
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current append cursor — equals the sum of all bytes ever appended
    /// through this handle.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.cursor
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

// =============================================================================
// Reader — shared positional read view
// =============================================================================

/// Read-only positional view of a segment.
///
/// Holds one OS file descriptor for as long as the segment is referenced.
/// Reads use `pread` and take `&self`, so any number of threads may read
/// concurrently — including while the writer appends to the same file, and
/// even after the file has been unlinked by merge.
#[derive(Debug)]
pub struct Reader {
    id: u64,
    path: PathBuf,
    file: File,
}

impl Reader {
    /// Opens the data file of segment `id` in `dir` for positional reads.
    pub fn open(dir: &Path, id: u64) -> Result<Self, SegmentError> {
        let path = data_path(dir, id);
        let file = File::open(&path)?;
        Ok(Self { id, path, file })
    }

    /// Reads exactly `len` bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, SegmentError> {
        let mut buf = vec![0u8; len];
        match self.file.read_exact_at(&mut buf, offset) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(SegmentError::ShortRead {
                offset,
                wanted: len,
            }),
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current byte length of the underlying file.
    pub fn len(&self) -> Result<u64, SegmentError> {
        Ok(self.file.metadata()?.len())
    }
}

// =============================================================================
// Hint files
// =============================================================================

/// One entry of a hint file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintEntry {
    pub timestamp: u32,
    /// Value payload length, or [`HINT_TOMBSTONE`] for a deletion.
    pub value_size: u32,
    /// Byte offset of the value payload within the companion data file.
    pub value_position: u64,
    pub key: Vec<u8>,
}

impl HintEntry {
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value_size == HINT_TOMBSTONE
    }
}

/// Buffered writer for `<id>.hint` files, used by merge.
#[derive(Debug)]
pub struct HintWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl HintWriter {
    /// Creates `<id>.hint` in `dir`. Fails if it already exists.
    pub fn create(dir: &Path, id: u64) -> Result<Self, SegmentError> {
        let path = hint_path(dir, id);
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    /// Appends one entry.
    pub fn push(&mut self, entry: &HintEntry) -> Result<(), SegmentError> {
        let mut header = [0u8; HINT_HEADER_LEN];
        BigEndian::write_u32(&mut header[0..4], entry.timestamp);
        BigEndian::write_u32(&mut header[4..8], entry.key.len() as u32);
        BigEndian::write_u32(&mut header[8..12], entry.value_size);
        BigEndian::write_u64(&mut header[12..20], entry.value_position);
        self.out.write_all(&header)?;
        self.out.write_all(&entry.key)?;
        Ok(())
    }

    /// Flushes buffered entries and forces them to disk.
    pub fn sync(&mut self) -> Result<(), SegmentError> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads all entries of a hint file.
///
/// `max_key_size` caps per-entry allocation; an entry declaring a larger key,
/// or a truncated entry, yields [`SegmentError::CorruptHint`] so the caller
/// can fall back to scanning the data file.
pub fn read_hints(path: &Path, max_key_size: u32) -> Result<Vec<HintEntry>, SegmentError> {
    let file = File::open(path)?;
    let mut rdr = BufReader::new(file);
    let mut entries = Vec::new();

    loop {
        let timestamp = match rdr.read_u32::<BigEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let corrupt = || SegmentError::CorruptHint {
            path: path.to_path_buf(),
        };
        let key_size = rdr.read_u32::<BigEndian>().map_err(|_| corrupt())?;
        let value_size = rdr.read_u32::<BigEndian>().map_err(|_| corrupt())?;
        let value_position = rdr.read_u64::<BigEndian>().map_err(|_| corrupt())?;
        if key_size == 0 || key_size > max_key_size {
            return Err(corrupt());
        }
        let mut key = vec![0u8; key_size as usize];
        rdr.read_exact(&mut key).map_err(|_| corrupt())?;
        entries.push(HintEntry {
            timestamp,
            value_size,
            value_position,
            key,
        });
    }

    Ok(entries)
}
