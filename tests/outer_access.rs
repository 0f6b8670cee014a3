//! # Outer Access Integration Tests
//!
//! Verifies the right-outer-join support end to end: `only_once` lookup
//! consumption and the completeness of the unmatched-entry stream, single-
//! and multi-threaded.
//!
//! ## Test Strategy
//!
//! 1. Build a generation, open it with outer access, replicate sessions
//! 2. Match a known subset of keys through point lookups
//! 3. Drain the outer stream and check it equals (all entries) − (matched)
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test outer_access --release
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use kilndb::{
    BuildOptions, GenerationBuilder, GenerationReader, GroupingMode, ReadOptions, Record,
    Replicate, Schema,
};
use tempfile::tempdir;

fn schema() -> Schema {
    Schema::new(&["id"], &["name"]).unwrap()
}

fn key(id: i64) -> Record {
    schema().key_builder().int(id).finish().unwrap()
}

fn build(dir: &Path, n: i64, num_buckets: u32) {
    let builder = GenerationBuilder::create(
        BuildOptions::new(dir, schema()).num_buckets(num_buckets),
        1,
    )
    .unwrap();
    let mut producer = builder.producer().unwrap();
    let s = schema();
    for id in 0..n {
        producer
            .store(
                &s.key_builder().int(id).finish().unwrap(),
                &s.value_builder().text(&format!("v{}", id)).finish().unwrap(),
            )
            .unwrap();
    }
    producer.close().unwrap();
}

fn outer_options() -> ReadOptions {
    ReadOptions {
        outer_access: true,
        live_fields: None,
    }
}

#[test]
fn only_once_lookup_consumes_exactly_once() {
    let dir = tempdir().unwrap();
    build(dir.path(), 10, 2);

    let mut reader = GenerationReader::open(dir.path(), outer_options()).unwrap();

    assert!(reader.lookup(&key(3), true).unwrap().is_some());
    assert!(reader.lookup(&key(3), true).unwrap().is_none());
    assert!(reader.lookup(&key(3), true).unwrap().is_none());
    // a plain lookup still sees the consumed entry
    assert!(reader.lookup(&key(3), false).unwrap().is_some());
}

#[test]
fn unmatched_stream_is_the_exact_complement() {
    let dir = tempdir().unwrap();
    build(dir.path(), 100, 8);

    let mut reader = GenerationReader::open(dir.path(), outer_options()).unwrap();

    let matched: HashSet<i64> = [0, 7, 13, 42, 55, 56, 57, 99].into_iter().collect();
    for &id in &matched {
        assert!(reader.lookup(&key(id), false).unwrap().is_some());
    }
    reader.prepare_outer_access().unwrap();

    let mut unmatched_keys = HashSet::new();
    while let Some((key_bytes, entry)) = reader.next_unmatched().unwrap() {
        assert_eq!(entry.members.len(), 1);
        unmatched_keys.insert(key_bytes);
    }

    assert_eq!(unmatched_keys.len(), 100 - matched.len());
    for id in 0..100i64 {
        let stored = unmatched_keys.contains(key(id).bytes());
        assert_eq!(
            stored,
            !matched.contains(&id),
            "key {} on the wrong side of the stream",
            id
        );
    }
}

#[test]
fn zero_lookups_streams_everything() {
    let dir = tempdir().unwrap();
    build(dir.path(), 64, 4);

    let mut reader = GenerationReader::open(dir.path(), outer_options()).unwrap();
    reader.prepare_outer_access().unwrap();

    let mut count = 0usize;
    while reader.next_unmatched().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 64);
}

#[test]
fn all_keys_matched_streams_nothing() {
    let dir = tempdir().unwrap();
    build(dir.path(), 32, 4);

    let mut reader = GenerationReader::open(dir.path(), outer_options()).unwrap();
    for id in 0..32 {
        assert!(reader.lookup(&key(id), false).unwrap().is_some());
    }
    reader.prepare_outer_access().unwrap();

    assert!(reader.next_unmatched().unwrap().is_none());
    assert!(reader.next_unmatched().unwrap().is_none());
}

#[test]
fn parallel_matchers_and_collectors_partition_the_entries() {
    let dir = tempdir().unwrap();
    build(dir.path(), 400, 8);

    let root = Arc::new(GenerationReader::open(dir.path(), outer_options()).unwrap());

    // four threads match disjoint quarters of the even keys
    let matchers: Vec<_> = (0..4i64)
        .map(|t| {
            let mut session = root.replicate_for_thread();
            std::thread::spawn(move || {
                for id in (0..400i64).filter(|i| i % 2 == 0 && (i / 2) % 4 == t) {
                    assert!(session.lookup_bytes(key(id).bytes(), true).unwrap().is_some());
                }
            })
        })
        .collect();
    for h in matchers {
        h.join().unwrap();
    }

    root.prepare_outer_access().unwrap();

    // three threads drain the unmatched stream together
    let collectors: Vec<_> = (0..3)
        .map(|_| {
            let mut session = root.replicate_for_thread();
            std::thread::spawn(move || {
                let mut keys = Vec::new();
                while let Some((key_bytes, _)) = session.next_unmatched().unwrap() {
                    keys.push(key_bytes);
                }
                keys
            })
        })
        .collect();

    let mut collected: Vec<Vec<u8>> = collectors
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    collected.sort();
    let before = collected.len();
    collected.dedup();
    assert_eq!(before, collected.len(), "an entry streamed twice");

    // the odd keys are exactly what remains
    assert_eq!(collected.len(), 200);
    let odd_keys: HashSet<Vec<u8>> = (0..400i64)
        .filter(|i| i % 2 == 1)
        .map(|i| key(i).bytes().to_vec())
        .collect();
    assert_eq!(collected.into_iter().collect::<HashSet<_>>(), odd_keys);
}

#[test]
fn grouped_entries_stream_with_all_members() {
    let dir = tempdir().unwrap();
    let builder = GenerationBuilder::create(
        BuildOptions::new(dir.path(), schema())
            .num_buckets(2)
            .grouping(GroupingMode::Grouped {
                child_field: "v".into(),
                counted: true,
            }),
        1,
    )
    .unwrap();
    let mut producer = builder.producer().unwrap();
    let s = schema();
    for (id, name) in [(1i64, "a"), (1, "b"), (2, "c"), (3, "d"), (3, "e")] {
        producer
            .store(
                &s.key_builder().int(id).finish().unwrap(),
                &s.value_builder().text(name).finish().unwrap(),
            )
            .unwrap();
    }
    producer.close().unwrap();

    let mut reader = GenerationReader::open(dir.path(), outer_options()).unwrap();
    assert!(reader.lookup(&key(2), false).unwrap().is_some());
    reader.prepare_outer_access().unwrap();

    let mut total_members = 0usize;
    let mut entries = 0usize;
    while let Some((_key, entry)) = reader.next_unmatched().unwrap() {
        entries += 1;
        total_members += entry.members.len();
        assert_eq!(entry.occurrences, Some(entry.members.len() as u64));
    }
    assert_eq!(entries, 2); // keys 1 and 3
    assert_eq!(total_members, 4); // "a","b" and "d","e"
}
