//! # Record — Bitcask record codec
//!
//! Encodes and decodes the on-disk record framing used by every Caskade
//! segment file. A segment is nothing but a concatenation of these frames —
//! no file header, no footer.
//!
//! ## Binary Record Format
//!
//! ```text
//! [crc: u32 BE][timestamp: u32 BE][key_size: u32 BE][value_size: u32 BE][key][value]
//! ```
//!
//! All integers are big-endian. The fixed header is 16 bytes. `crc` is the
//! CRC-32 (IEEE) of everything after itself, i.e. bytes `[4..)` of the frame.
//! `timestamp` is seconds since the Unix epoch and is advisory — replay order
//! decides recency, never the clock.
//!
//! A **tombstone** is a record whose value payload equals [`TOMBSTONE`]; the
//! codec does not distinguish it structurally.
//!
//! ## Example
//!
//! ```rust
//! use std::io::Cursor;
//! use record::{encode, read_record, Limits};
//!
//! let mut buf = Vec::new();
//! encode(&mut buf, b"hello", b"world", 1_700_000_000);
//!
//! let rec = read_record(&mut Cursor::new(&buf), Limits::default())
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(rec.key, b"hello");
//! assert_eq!(rec.value, b"world");
//! ```

use byteorder::{BigEndian, ByteOrder};
use crc32fast::Hasher as Crc32;
use std::io::{self, Read};
use thiserror::Error;

/// Fixed header length in bytes: crc + timestamp + key_size + value_size.
pub const HEADER_LEN: usize = 16;

/// The reserved value payload that marks a key as deleted.
///
/// Applications must not store this exact byte sequence as a legitimate
/// value; the engine rejects it at the write path.
pub const TOMBSTONE: &[u8] = b"bitcask_tombstone";

/// Size maxima enforced while decoding, before any payload allocation.
///
/// A frame whose declared `key_size`/`value_size` exceeds these is reported
/// as [`DecodeError::ImpossibleSize`] — on a live store that means either
/// corruption or a record written under larger limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_key_size: u32,
    pub max_value_size: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_key_size: 64 * 1024,
            max_value_size: 100 * 1024 * 1024,
        }
    }
}

/// Errors produced by [`read_record`].
///
/// The decoder never partially mutates external state on failure — the only
/// side effect is having consumed bytes from the reader.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The source ended in the middle of a frame (truncated tail).
    #[error("record truncated mid-frame")]
    ShortRead,

    /// Length-consistent bytes were read but the checksum does not match.
    #[error("crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    BadCrc { stored: u32, computed: u32 },

    /// Declared key or value size exceeds the configured maximum.
    #[error("impossible {field} size {size} (max {max})")]
    ImpossibleSize {
        field: &'static str,
        size: u32,
        max: u32,
    },

    /// Declared key size is zero. The engine rejects empty keys at the
    /// write path, so no writer ever produces such a frame.
    #[error("record declares a zero-length key")]
    ZeroKeySize,

    /// An underlying I/O error that is not end-of-input.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A fully decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Advisory wall-clock seconds since the Unix epoch.
    pub timestamp: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Whether the value payload is the deletion marker.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value == TOMBSTONE
    }

    /// Total encoded length of this record's frame in bytes.
    #[must_use]
    pub fn frame_len(&self) -> u64 {
        encoded_len(&self.key, &self.value)
    }
}

/// Encoded frame length for a `(key, value)` pair.
#[must_use]
pub fn encoded_len(key: &[u8], value: &[u8]) -> u64 {
    (HEADER_LEN + key.len() + value.len()) as u64
}

/// Byte offset of the value payload within a segment, given the offset at
/// which the record's frame starts.
#[must_use]
pub fn value_position(record_start: u64, key_len: usize) -> u64 {
    record_start + HEADER_LEN as u64 + key_len as u64
}

/// Appends the frame for `(key, value, timestamp)` to `buf`.
///
/// Exactly `16 + key.len() + value.len()` bytes are appended. The buffer is
/// caller-supplied so the writer can reuse one scratch allocation across
/// appends.
pub fn encode(buf: &mut Vec<u8>, key: &[u8], value: &[u8], timestamp: u32) {
    let frame_start = buf.len();
    buf.reserve(HEADER_LEN + key.len() + value.len());

    // crc placeholder, filled below once the body exists
    buf.extend_from_slice(&[0u8; 4]);

    let mut word = [0u8; 4];
    BigEndian::write_u32(&mut word, timestamp);
    buf.extend_from_slice(&word);
    BigEndian::write_u32(&mut word, key.len() as u32);
    buf.extend_from_slice(&word);
    BigEndian::write_u32(&mut word, value.len() as u32);
    buf.extend_from_slice(&word);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);

    let mut hasher = Crc32::new();
    hasher.update(&buf[frame_start + 4..]);
    let crc = hasher.finalize();
    BigEndian::write_u32(&mut buf[frame_start..frame_start + 4], crc);
}

/// Reads one record from `r`, which must be positioned at a frame boundary.
///
/// # Termination
///
/// - **Clean EOF** (zero bytes available) → `Ok(None)`.
/// - **Truncated frame** (some bytes, then EOF) → [`DecodeError::ShortRead`].
/// - **Checksum mismatch** → [`DecodeError::BadCrc`].
/// - **Absurd declared sizes** → [`DecodeError::ImpossibleSize`], checked
///   before any payload allocation.
/// - **Zero-length key** → [`DecodeError::ZeroKeySize`]; no writer ever
///   produces one, so the frame cannot be trusted.
pub fn read_record<R: Read>(r: &mut R, limits: Limits) -> Result<Option<Record>, DecodeError> {
    let mut header = [0u8; HEADER_LEN];
    match read_full(r, &mut header)? {
        0 => return Ok(None),
        n if n < HEADER_LEN => return Err(DecodeError::ShortRead),
        _ => {}
    }

    let stored_crc = BigEndian::read_u32(&header[0..4]);
    let timestamp = BigEndian::read_u32(&header[4..8]);
    let key_size = BigEndian::read_u32(&header[8..12]);
    let value_size = BigEndian::read_u32(&header[12..16]);

    if key_size == 0 {
        return Err(DecodeError::ZeroKeySize);
    }
    if key_size > limits.max_key_size {
        return Err(DecodeError::ImpossibleSize {
            field: "key",
            size: key_size,
            max: limits.max_key_size,
        });
    }
    if value_size > limits.max_value_size {
        return Err(DecodeError::ImpossibleSize {
            field: "value",
            size: value_size,
            max: limits.max_value_size,
        });
    }

    let mut payload = vec![0u8; key_size as usize + value_size as usize];
    let n = read_full(r, &mut payload)?;
    if n < payload.len() {
        return Err(DecodeError::ShortRead);
    }

    let mut hasher = Crc32::new();
    hasher.update(&header[4..]);
    hasher.update(&payload);
    let computed = hasher.finalize();
    if computed != stored_crc {
        return Err(DecodeError::BadCrc {
            stored: stored_crc,
            computed,
        });
    }

    let value = payload.split_off(key_size as usize);
    Ok(Some(Record {
        timestamp,
        key: payload,
        value,
    }))
}

/// Reads until `buf` is full or the source is exhausted, returning the number
/// of bytes read. Unlike `read_exact`, a short count is not an error here —
/// the caller distinguishes clean EOF (0) from a truncated frame.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
