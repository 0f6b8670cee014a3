//! # Bucket Read Session
//!
//! Memory-maps one bucket's records and offsets files and serves three
//! access patterns over them:
//!
//! - binary-search point lookup against the offsets index;
//! - forward sequential scan through an independent cursor;
//! - forward scan over never-visited entries (outer access).
//!
//! The comparator reads key bytes straight out of the mapped records
//! buffer: unsigned lexicographic over the raw bytes, shorter prefix first,
//! with the candidate's key boundary recovered by walking the entry's key
//! fields. An exact match is a zero-copy [`Entry`] into the mapping.
//!
//! With visit tracking enabled, every successful lookup marks the entry's
//! ordinal in a shared [`ConcurrentBitset`]; an `only_once` lookup that
//! finds the bit already set reports "not found" instead. The bitset is
//! shared across thread replicas, the scan cursor is not.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use memmap2::Mmap;

use crate::config::{offsets_file_name, records_file_name};
use crate::encoding::fields_end;
use crate::read::Replicate;
use crate::sync::ConcurrentBitset;

/// Zero-copy view of one stored entry in the mapped records file.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub key: &'a [u8],
    pub value_field: &'a [u8],
}

#[derive(Debug)]
struct BucketMaps {
    records: Mmap,
    offsets: Mmap,
}

#[derive(Debug)]
pub struct BucketReader {
    maps: Arc<BucketMaps>,
    visited: Option<Arc<ConcurrentBitset>>,
    cursor: usize,
    num_key_fields: usize,
    bucket: u32,
}

impl BucketReader {
    /// Opens one bucket of a finished generation. Returns `None` for an
    /// empty bucket (the build wrote no files for it).
    pub fn open(dir: &Path, bucket: u32, num_key_fields: usize) -> Result<Option<Self>> {
        let records_path = dir.join(records_file_name(bucket));
        let offsets_path = dir.join(offsets_file_name(bucket));

        match (records_path.exists(), offsets_path.exists()) {
            (false, false) => return Ok(None),
            (true, true) => {}
            _ => bail!(
                "bucket {} has one of its files missing ('{}' / '{}')",
                bucket,
                records_path.display(),
                offsets_path.display()
            ),
        }

        let records_file = File::open(&records_path)
            .wrap_err_with(|| format!("failed to open '{}'", records_path.display()))?;
        let offsets_file = File::open(&offsets_path)
            .wrap_err_with(|| format!("failed to open '{}'", offsets_path.display()))?;

        // SAFETY: both files belong to a finished generation and are never
        // modified again; the mappings are read-only and live as long as
        // this session (or any replica holding the shared Arc).
        let records = unsafe { Mmap::map(&records_file) }
            .wrap_err_with(|| format!("failed to memory-map '{}'", records_path.display()))?;
        let offsets = unsafe { Mmap::map(&offsets_file) }
            .wrap_err_with(|| format!("failed to memory-map '{}'", offsets_path.display()))?;

        ensure!(
            offsets.len() % 4 == 0,
            "offsets file '{}' length {} is not a multiple of 4",
            offsets_path.display(),
            offsets.len()
        );

        Ok(Some(Self {
            maps: Arc::new(BucketMaps { records, offsets }),
            visited: None,
            cursor: 0,
            num_key_fields,
            bucket,
        }))
    }

    pub fn entry_count(&self) -> usize {
        self.maps.offsets.len() / 4
    }

    fn offset_at(&self, index: usize) -> Result<usize> {
        let raw = i32::from_le_bytes(
            self.maps.offsets[index * 4..index * 4 + 4]
                .try_into()
                .unwrap(), // INVARIANT: index < entry_count, file length is a multiple of 4
        );
        ensure!(
            raw >= 0,
            "bucket {} offsets entry {} is negative",
            self.bucket,
            index
        );
        Ok(raw as usize)
    }

    /// Decodes the entry at an ordinal position.
    pub fn entry(&self, index: usize) -> Result<Entry<'_>> {
        let start = self.offset_at(index)?;
        let end = if index + 1 < self.entry_count() {
            self.offset_at(index + 1)?
        } else {
            self.maps.records.len()
        };
        ensure!(
            start <= end && end <= self.maps.records.len(),
            "bucket {} offsets entry {} is out of bounds",
            self.bucket,
            index
        );

        let bytes = &self.maps.records[start..end];
        let key_len = fields_end(bytes, self.num_key_fields).wrap_err_with(|| {
            format!(
                "bucket {} records file is malformed at entry {}",
                self.bucket, index
            )
        })?;
        Ok(Entry {
            key: &bytes[..key_len],
            value_field: &bytes[key_len..],
        })
    }

    /// Allocates the shared visited bitset. Must run before any lookup and
    /// before the session is replicated, so every replica shares it.
    pub fn enable_visit_tracking(&mut self) -> Result<()> {
        ensure!(
            self.visited.is_none(),
            "visit tracking is already enabled for bucket {}",
            self.bucket
        );
        self.visited = Some(Arc::new(ConcurrentBitset::new(self.entry_count())));
        Ok(())
    }

    pub fn tracking_enabled(&self) -> bool {
        self.visited.is_some()
    }

    /// Binary-search point lookup. With tracking enabled, a hit marks the
    /// entry visited; with `only_once` as well, a second hit on the same
    /// entry reports `None`.
    pub fn lookup(&self, key: &[u8], only_once: bool) -> Result<Option<Entry<'_>>> {
        let mut lo = 0usize;
        let mut hi = self.entry_count();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry(mid)?;
            match entry.key.cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    if let Some(visited) = &self.visited {
                        let already = visited.set(mid);
                        if only_once && already {
                            return Ok(None); // consumed by an earlier lookup
                        }
                    }
                    return Ok(Some(entry));
                }
            }
        }
        Ok(None)
    }

    /// Next entry in stored (ascending-key) order, through this session's
    /// own cursor.
    pub fn next_entry(&mut self) -> Result<Option<Entry<'_>>> {
        if self.cursor >= self.entry_count() {
            return Ok(None);
        }
        let index = self.cursor;
        self.cursor += 1;
        self.entry(index).map(Some)
    }

    /// Next never-visited entry in stored order. Requires visit tracking.
    pub fn next_unvisited(&mut self) -> Result<Option<Entry<'_>>> {
        let next = match &self.visited {
            Some(visited) => visited.next_clear_bit(self.cursor),
            None => bail!(
                "visit tracking is not enabled for bucket {}",
                self.bucket
            ),
        };
        match next {
            Some(index) => {
                self.cursor = index + 1;
                self.entry(index).map(Some)
            }
            None => {
                self.cursor = self.entry_count();
                Ok(None)
            }
        }
    }

    /// Rewinds this session's scan cursor to the first entry.
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }
}

impl Replicate for BucketReader {
    fn replicate_for_thread(&self) -> Self {
        Self {
            maps: Arc::clone(&self.maps),
            visited: self.visited.clone(),
            cursor: 0,
            num_key_fields: self.num_key_fields,
            bucket: self.bucket,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{sort_bucket, BuildOptions, GenerationBuilder};
    use crate::meta::GroupingMode;
    use crate::records::Schema;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(&["id"], &["payload"]).unwrap()
    }

    /// Builds a one-bucket generation holding the given pairs.
    fn build_bucket(dir: &Path, pairs: &[(i64, &str)]) {
        let options = BuildOptions::new(dir, schema()).num_buckets(1);
        let builder = GenerationBuilder::create(options, 1).unwrap();
        let mut producer = builder.producer().unwrap();
        let s = schema();
        for (id, payload) in pairs {
            let key = s.key_builder().int(*id).finish().unwrap();
            let value = s.value_builder().text(payload).finish().unwrap();
            producer.store(&key, &value).unwrap();
        }
        producer.close().unwrap();
    }

    fn key_bytes(id: i64) -> Vec<u8> {
        schema()
            .key_builder()
            .int(id)
            .finish()
            .unwrap()
            .bytes()
            .to_vec()
    }

    #[test]
    fn absent_bucket_opens_as_none() {
        let dir = tempdir().unwrap();
        assert!(BucketReader::open(dir.path(), 7, 1).unwrap().is_none());
    }

    #[test]
    fn lookup_finds_every_stored_key() {
        let dir = tempdir().unwrap();
        build_bucket(dir.path(), &[(5, "e"), (1, "a"), (3, "c"), (9, "i")]);

        let reader = BucketReader::open(dir.path(), 0, 1).unwrap().unwrap();
        assert_eq!(reader.entry_count(), 4);

        for id in [1i64, 3, 5, 9] {
            let entry = reader.lookup(&key_bytes(id), false).unwrap();
            assert!(entry.is_some(), "key {} not found", id);
        }
        assert!(reader.lookup(&key_bytes(2), false).unwrap().is_none());
        assert!(reader.lookup(&key_bytes(100), false).unwrap().is_none());
        assert!(reader.lookup(&key_bytes(-1), false).unwrap().is_none());
    }

    #[test]
    fn sequential_scan_is_key_ordered() {
        let dir = tempdir().unwrap();
        build_bucket(dir.path(), &[(4, "d"), (2, "b"), (8, "h"), (6, "f")]);

        let mut reader = BucketReader::open(dir.path(), 0, 1).unwrap().unwrap();
        let mut keys = Vec::new();
        while let Some(entry) = reader.next_entry().unwrap() {
            keys.push(entry.key.to_vec());
        }
        assert_eq!(keys.len(), 4);
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }

        reader.reset_cursor();
        assert!(reader.next_entry().unwrap().is_some());
    }

    #[test]
    fn only_once_consumes_the_entry() {
        let dir = tempdir().unwrap();
        build_bucket(dir.path(), &[(1, "a"), (2, "b")]);

        let mut reader = BucketReader::open(dir.path(), 0, 1).unwrap().unwrap();
        reader.enable_visit_tracking().unwrap();

        let key = key_bytes(1);
        assert!(reader.lookup(&key, true).unwrap().is_some());
        assert!(reader.lookup(&key, true).unwrap().is_none());
        // non-once lookups keep succeeding on a consumed entry
        assert!(reader.lookup(&key, false).unwrap().is_some());
    }

    #[test]
    fn lookup_without_tracking_never_consumes() {
        let dir = tempdir().unwrap();
        build_bucket(dir.path(), &[(1, "a")]);

        let reader = BucketReader::open(dir.path(), 0, 1).unwrap().unwrap();
        let key = key_bytes(1);
        for _ in 0..3 {
            assert!(reader.lookup(&key, true).unwrap().is_some());
        }
    }

    #[test]
    fn unvisited_scan_skips_looked_up_entries() {
        let dir = tempdir().unwrap();
        build_bucket(dir.path(), &[(1, "a"), (2, "b"), (3, "c"), (4, "d")]);

        let mut reader = BucketReader::open(dir.path(), 0, 1).unwrap().unwrap();
        reader.enable_visit_tracking().unwrap();

        // plain lookups also mark entries once tracking is on
        reader.lookup(&key_bytes(2), false).unwrap().unwrap();
        reader.lookup(&key_bytes(4), true).unwrap().unwrap();

        let mut unvisited = Vec::new();
        while let Some(entry) = reader.next_unvisited().unwrap() {
            unvisited.push(entry.key.to_vec());
        }
        assert_eq!(unvisited, vec![key_bytes(1), key_bytes(3)]);
    }

    #[test]
    fn unvisited_scan_requires_tracking() {
        let dir = tempdir().unwrap();
        build_bucket(dir.path(), &[(1, "a")]);

        let mut reader = BucketReader::open(dir.path(), 0, 1).unwrap().unwrap();
        assert!(reader.next_unvisited().is_err());
    }

    #[test]
    fn replicas_share_visited_state_but_not_cursors() {
        let dir = tempdir().unwrap();
        build_bucket(dir.path(), &[(1, "a"), (2, "b"), (3, "c")]);

        let mut root = BucketReader::open(dir.path(), 0, 1).unwrap().unwrap();
        root.enable_visit_tracking().unwrap();
        let mut replica = root.replicate_for_thread();

        // advance the root cursor; the replica's stays at the start
        root.next_entry().unwrap().unwrap();
        assert_eq!(replica.next_entry().unwrap().unwrap().key, &key_bytes(1)[..]);

        // a consume through the root is visible to the replica
        assert!(root.lookup(&key_bytes(2), true).unwrap().is_some());
        assert!(replica.lookup(&key_bytes(2), true).unwrap().is_none());
    }

    #[test]
    fn sorted_bucket_file_passes_offset_invariant() {
        let dir = tempdir().unwrap();
        build_bucket(
            dir.path(),
            &[(10, "j"), (2, "b"), (7, "g"), (2, "dup"), (5, "e")],
        );

        let reader = BucketReader::open(dir.path(), 0, 1).unwrap().unwrap();
        let mut previous: Option<Vec<u8>> = None;
        for i in 0..reader.entry_count() {
            let entry = reader.entry(i).unwrap();
            if let Some(prev) = &previous {
                assert!(prev.as_slice() < entry.key, "offsets not strictly sorted");
            }
            previous = Some(entry.key.to_vec());
        }
    }

    #[test]
    fn direct_sorter_output_is_readable() {
        // bucket files produced by the sorter alone (no coordinator)
        let dir = tempdir().unwrap();
        let s = schema();
        let mut bytes = Vec::new();
        for (id, payload) in [(2i64, "b"), (1, "a")] {
            let key = s.key_builder().int(id).finish().unwrap();
            let value = s.value_builder().text(payload).finish().unwrap();
            let mut value_field = Vec::new();
            crate::codec::pack(value.bytes(), &mut value_field);
            let entry_len = key.bytes().len() + value_field.len();
            bytes.extend_from_slice(&(entry_len as u32).to_le_bytes());
            bytes.extend_from_slice(key.bytes());
            bytes.extend_from_slice(&value_field);
        }
        std::fs::write(dir.path().join(crate::config::temp_file_name(0)), &bytes).unwrap();
        sort_bucket(dir.path(), 0, 1, &GroupingMode::Flat { counted: false })
            .unwrap()
            .unwrap();

        let reader = BucketReader::open(dir.path(), 0, 1).unwrap().unwrap();
        assert!(reader.lookup(&key_bytes(1), false).unwrap().is_some());
        assert!(reader.lookup(&key_bytes(2), false).unwrap().is_some());
    }
}
