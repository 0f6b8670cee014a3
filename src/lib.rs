//! # KilnDB - Bulk-Built Partitioned Key-Value Store
//!
//! KilnDB persists large record sets as immutable, hash-partitioned
//! **generations**: built once from an unordered, concurrently-produced
//! stream of (key, value) records, then read concurrently by any number of
//! threads through memory-mapped binary search. This implementation
//! prioritizes:
//!
//! - **Zero-copy reads**: lookups and scans return slices of mapped files
//! - **Bounded build memory**: batched hand-off with one in-flight batch
//!   per bucket, descriptor-only sorting over mapped temp files
//! - **No coordination after build**: finished files are immutable, so the
//!   read path needs no locks beyond a lock-free visited bitset
//!
//! ## Quick Start
//!
//! ```ignore
//! use kilndb::{BuildOptions, GenerationBuilder, GenerationReader, ReadOptions, Schema};
//!
//! let schema = Schema::new(&["id"], &["name"])?;
//! let builder = GenerationBuilder::create(
//!     BuildOptions::new("./gen-0001", schema.clone()),
//!     1,
//! )?;
//!
//! let mut producer = builder.producer()?;
//! let key = schema.key_builder().int(42).finish()?;
//! let value = schema.value_builder().text("alice").finish()?;
//! producer.store(&key, &value)?;
//! producer.close()?;
//!
//! let mut reader = GenerationReader::open("./gen-0001".as_ref(), ReadOptions::default())?;
//! let entry = reader.lookup(&key, false)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Producer threads (store/close)          │
//! ├──────────────────────────────────────────┤
//! │  Bucket routing (63-bit key hash)        │
//! ├────────────────────┬─────────────────────┤
//! │  Temp writers      │  Bucket sorters     │
//! │  (rendezvous)      │  (mmap + group)     │
//! ├────────────────────┴─────────────────────┤
//! │  records.NN.ndb + offsets.NN.bin + meta  │
//! ├──────────────────────────────────────────┤
//! │  Read sessions (binary search, scans,    │
//! │  outer access) over read-only mmaps      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Generation Layout
//!
//! ```text
//! generation_dir/
//! ├── kiln.meta          # counts, schema, grouping, per-bucket maxima
//! ├── records.00.ndb     # key-ordered entries of bucket 0
//! ├── offsets.00.bin     # one i32 offset per entry of bucket 0
//! ├── records.01.ndb
//! ├── offsets.01.bin
//! └── ...                # empty buckets have no files
//! ```
//!
//! A directory without a checksum-valid `kiln.meta` is an incomplete
//! generation: readers refuse it, and the caller discards and rebuilds.
//! There is no crash recovery and no in-place mutation — a generation
//! either finished or never existed.
//!
//! ## Module Overview
//!
//! - [`build`]: producers, temp writers, bucket sorters, close protocol
//! - [`read`]: bucket sessions, generation reader, outer access, cache
//! - [`records`]: schemas, record builders, field-id translation
//! - [`encoding`]: field wire format and varints
//! - [`codec`]: compressed value-field packing
//! - [`hash`]: bucket partitioning hash
//! - [`sync`]: bitset, phase barrier, work queue
//! - [`meta`]: generation metadata file
//! - [`config`]: constants and file naming

pub mod build;
pub mod codec;
pub mod config;
pub mod encoding;
pub mod hash;
pub mod meta;
pub mod read;
pub mod records;
pub mod sync;

pub use build::{BuildOptions, BuildStatsSnapshot, GenerationBuilder, Producer};
pub use meta::{GenerationMeta, GroupingMode};
pub use read::{
    BucketReader, DecodedEntry, Entry, GenerationReader, ReadOptions, ReaderCache, Replicate,
};
pub use records::{OwnedField, OwnedRecord, OwnedValue, Record, RecordBuilder, Schema};
