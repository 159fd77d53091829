use std::collections::HashMap;

/// Physical location of a key's most recent live record.
///
/// `value_position` is the byte offset of the value payload within the
/// segment (record start + 16-byte header + key length). `timestamp` is
/// advisory wall-clock metadata; recency is decided by replay order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub segment_id: u64,
    pub value_position: u64,
    pub value_size: u32,
    pub timestamp: u32,
}

/// The key directory: a flat map from key bytes to the location of that
/// key's latest live record.
///
/// The directory is the sole source of truth for *which* keys are live; the
/// segment files are the source of truth for their contents. Keys are
/// compared bytewise; insert, lookup and delete are expected constant time.
#[derive(Debug, Default)]
pub struct KeyDir {
    map: HashMap<Vec<u8>, DirEntry>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points `key` at a new location, returning the previous entry if any.
    pub fn insert(&mut self, key: Vec<u8>, entry: DirEntry) -> Option<DirEntry> {
        self.map.insert(key, entry)
    }

    pub fn get(&self, key: &[u8]) -> Option<&DirEntry> {
        self.map.get(key)
    }

    /// Removes `key`, returning its entry if it was live.
    pub fn remove(&mut self, key: &[u8]) -> Option<DirEntry> {
        self.map.remove(key)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Iterates over live entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &DirEntry)> {
        self.map.iter()
    }

    /// Materialized snapshot of the live keys. Independent of subsequent
    /// mutations of the directory.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.map.keys().cloned().collect()
    }

    /// Materialized snapshot of all live entries, for merge.
    pub fn entries(&self) -> Vec<(Vec<u8>, DirEntry)> {
        self.map.iter().map(|(k, e)| (k.clone(), *e)).collect()
    }
}
