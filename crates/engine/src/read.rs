//! Read path: `get()`, `list()`, and `fold()`.
//!
//! Point lookups consult the key directory under the read lock, then clone
//! the referenced segment's `Arc`'d read view and drop the lock before the
//! positional read. The read itself holds nothing: a concurrent merge may
//! unlink the file mid-read and the open descriptor keeps the bytes
//! reachable. No checksum is revalidated on this path — recovery owns
//! integrity.

use crate::error::{Error, IoResultExt, Result};
use crate::Engine;

impl Engine {
    /// Looks up `key`, returning `Ok(None)` if it is not live.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (entry, reader) = {
            let inner = self.inner.read();
            if inner.closed {
                return Err(Error::Closed);
            }
            let Some(entry) = inner.keydir.get(key) else {
                return Ok(None);
            };
            let reader = inner
                .readers
                .get(&entry.segment_id)
                .cloned()
                .ok_or_else(|| Error::Corrupt {
                    path: segment::data_path(&self.dir, entry.segment_id),
                    offset: entry.value_position,
                })?;
            (*entry, reader)
        };

        let value = reader
            .read_at(entry.value_position, entry.value_size as usize)
            .ctx("read", reader.path())?;

        // The directory never points at a tombstone; this guards against a
        // foreign hint file that claims otherwise.
        if value == record::TOMBSTONE {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Materialized snapshot of the live keys, in unspecified order.
    ///
    /// The snapshot is independent of later mutations.
    pub fn list(&self) -> Result<Vec<Vec<u8>>> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(Error::Closed);
        }
        Ok(inner.keydir.keys())
    }

    /// Invokes `visitor` for every live `(key, value)` pair.
    ///
    /// The read lock is held for the whole iteration, so mutations are
    /// blocked until the fold finishes; concurrent `get`s proceed. The first
    /// error the visitor returns aborts the fold and is propagated.
    pub fn fold<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let inner = self.inner.read();
        if inner.closed {
            return Err(Error::Closed);
        }

        for (key, entry) in inner.keydir.iter() {
            let reader = inner
                .readers
                .get(&entry.segment_id)
                .ok_or_else(|| Error::Corrupt {
                    path: segment::data_path(&self.dir, entry.segment_id),
                    offset: entry.value_position,
                })?;
            let value = reader
                .read_at(entry.value_position, entry.value_size as usize)
                .ctx("read", reader.path())?;
            if value == record::TOMBSTONE {
                continue;
            }
            visitor(key, &value)?;
        }
        Ok(())
    }
}
