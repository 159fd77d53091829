use record::{Limits, Record};
use std::fs;
use std::io::Cursor;
use std::path::Path;

pub fn count_files_with_ext(dir: &Path, ext: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|x| x == ext)
                .unwrap_or(false)
        })
        .count()
}

pub fn count_cask_files(dir: &Path) -> usize {
    count_files_with_ext(dir, "cask")
}

pub fn count_hint_files(dir: &Path) -> usize {
    count_files_with_ext(dir, "hint")
}

/// Total bytes across all segment data files.
pub fn total_cask_bytes(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| segment::parse_id(&e.path()).is_some())
        .map(|e| e.metadata().unwrap().len())
        .sum()
}

/// Decodes every record of one segment data file.
pub fn decode_segment(path: &Path) -> Vec<Record> {
    let data = fs::read(path).unwrap();
    let mut cursor = Cursor::new(&data);
    let mut records = Vec::new();
    while let Some(rec) = record::read_record(&mut cursor, Limits::default()).unwrap() {
        records.push(rec);
    }
    records
}

/// Decodes the records of every non-empty segment in ascending id order.
pub fn decode_all_segments(dir: &Path) -> Vec<Record> {
    let mut records = Vec::new();
    for id in segment::segment_ids(dir).unwrap() {
        records.extend(decode_segment(&segment::data_path(dir, id)));
    }
    records
}
