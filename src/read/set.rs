//! # Generation Reader
//!
//! The whole-database read session: one optional [`BucketReader`] per
//! bucket, point lookups routed through the partition hash, a sequential
//! scan across buckets, and the outer-access stream that yields every entry
//! no lookup ever matched.
//!
//! ## Outer Access
//!
//! Right-outer-join support runs in three strictly ordered stages:
//!
//! 1. open the generation with `outer_access` so every bucket tracks
//!    visits, and replicate the session across the reader threads;
//! 2. perform all point lookups (each hit marks its entry visited in the
//!    bitsets shared by every replica);
//! 3. call [`GenerationReader::prepare_outer_access`] once, then have each
//!    replica drain [`GenerationReader::next_unmatched`] until it reports
//!    end of stream.
//!
//! Buckets are distributed to replicas through a shared work queue; the
//! single termination marker is re-enqueued by each observer so every
//! replica sees the end of the stream.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result};

use crate::hash::bucket_of;
use crate::meta::GenerationMeta;
use crate::read::bucket::BucketReader;
use crate::read::decode::{DecodedEntry, EntryDecoder};
use crate::read::Replicate;
use crate::records::{FieldIdMap, Record};
use crate::sync::{Item, WorkQueue};

/// Read-session configuration, fixed at open time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Track visited entries on every bucket, enabling `only_once` lookups
    /// and the outer-access stream.
    pub outer_access: bool,
    /// Live field names for stored→live id translation; `None` keeps the
    /// stored numbering.
    pub live_fields: Option<Vec<String>>,
}

#[derive(Debug)]
struct OuterShared {
    queue: WorkQueue<u32>,
    prepared: AtomicBool,
}

#[derive(Debug)]
pub struct GenerationReader {
    meta: GenerationMeta,
    buckets: Vec<Option<BucketReader>>,
    decoder: EntryDecoder,
    outer: Arc<OuterShared>,
    outer_access: bool,
    /// Bucket this replica is currently draining in the outer stream.
    outer_bucket: Option<u32>,
    /// Bucket position of this replica's sequential scan.
    scan_bucket: usize,
}

impl GenerationReader {
    /// Opens a finished generation. Fails (and must be treated as "no
    /// generation present") when the metadata file is missing, truncated,
    /// or fails its checksum.
    pub fn open(dir: &Path, options: ReadOptions) -> Result<Self> {
        let meta = GenerationMeta::read(dir)?;
        let num_key_fields = meta.key_fields.len();

        let mut buckets = Vec::with_capacity(meta.num_buckets as usize);
        for bucket in 0..meta.num_buckets {
            buckets.push(BucketReader::open(dir, bucket, num_key_fields)?);
        }
        if options.outer_access {
            for reader in buckets.iter_mut().flatten() {
                reader.enable_visit_tracking()?;
            }
        }

        let stored: Vec<String> = meta
            .key_fields
            .iter()
            .chain(meta.value_fields.iter())
            .cloned()
            .collect();
        let id_map = match &options.live_fields {
            Some(live) => FieldIdMap::build(&stored, live),
            None => FieldIdMap::identity(stored.len()),
        };

        Ok(Self {
            decoder: EntryDecoder::new(&meta, id_map),
            meta,
            buckets,
            outer: Arc::new(OuterShared {
                queue: WorkQueue::new(),
                prepared: AtomicBool::new(false),
            }),
            outer_access: options.outer_access,
            outer_bucket: None,
            scan_bucket: 0,
        })
    }

    pub fn meta(&self) -> &GenerationMeta {
        &self.meta
    }

    pub fn entry_count(&self) -> u64 {
        self.meta.entry_count
    }

    /// Direct access to one bucket's session (absent for empty buckets).
    pub fn bucket(&self, bucket: u32) -> Option<&BucketReader> {
        self.buckets.get(bucket as usize).and_then(Option::as_ref)
    }

    /// Point lookup by key record.
    pub fn lookup(&mut self, key: &Record, only_once: bool) -> Result<Option<DecodedEntry>> {
        self.lookup_bytes(key.bytes(), only_once)
    }

    /// Point lookup by serialized key bytes, decoded into live records.
    pub fn lookup_bytes(&mut self, key: &[u8], only_once: bool) -> Result<Option<DecodedEntry>> {
        let bucket = bucket_of(key, self.meta.num_buckets) as usize;
        let Some(reader) = &self.buckets[bucket] else {
            return Ok(None);
        };
        match reader.lookup(key, only_once)? {
            Some(entry) => Ok(Some(self.decoder.decode(entry.value_field)?)),
            None => Ok(None),
        }
    }

    /// Full sequential scan: every entry of every non-empty bucket, in
    /// bucket order, key-ordered within each bucket.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, DecodedEntry)>> {
        loop {
            if self.scan_bucket >= self.buckets.len() {
                return Ok(None);
            }
            let decoder = &mut self.decoder;
            if let Some(reader) = self.buckets[self.scan_bucket].as_mut() {
                if let Some(entry) = reader.next_entry()? {
                    let key = entry.key.to_vec();
                    let decoded = decoder.decode(entry.value_field)?;
                    return Ok(Some((key, decoded)));
                }
            }
            self.scan_bucket += 1;
        }
    }

    /// Publishes every non-empty bucket to the shared outer-access queue,
    /// followed by the termination marker. Call exactly once, after all
    /// point lookups have completed.
    pub fn prepare_outer_access(&self) -> Result<()> {
        ensure!(
            self.outer_access,
            "generation was not opened with outer access"
        );
        ensure!(
            !self.outer.prepared.swap(true, Ordering::SeqCst),
            "outer access is already prepared"
        );

        for (bucket, reader) in self.buckets.iter().enumerate() {
            if reader.is_some() {
                self.outer.queue.push(Item::Task(bucket as u32));
            }
        }
        self.outer.queue.push(Item::Done);
        Ok(())
    }

    /// Next entry never matched by any point lookup, across all buckets.
    /// Returns `None` once every bucket is drained; safe to call from many
    /// replicas concurrently, each draining whole buckets.
    pub fn next_unmatched(&mut self) -> Result<Option<(Vec<u8>, DecodedEntry)>> {
        ensure!(
            self.outer.prepared.load(Ordering::SeqCst),
            "prepare_outer_access has not been called"
        );

        loop {
            let bucket = match self.outer_bucket {
                Some(bucket) => bucket,
                None => match self.outer.queue.pop() {
                    Item::Task(bucket) => {
                        if let Some(reader) = self.buckets[bucket as usize].as_mut() {
                            reader.reset_cursor();
                        }
                        self.outer_bucket = Some(bucket);
                        bucket
                    }
                    Item::Done => {
                        // pass the marker on so sibling replicas terminate
                        self.outer.queue.push(Item::Done);
                        return Ok(None);
                    }
                },
            };

            let decoder = &mut self.decoder;
            if let Some(reader) = self.buckets[bucket as usize].as_mut() {
                if let Some(entry) = reader.next_unvisited()? {
                    let key = entry.key.to_vec();
                    return Ok(Some((key, decoder.decode(entry.value_field)?)));
                }
            }
            self.outer_bucket = None;
        }
    }
}

impl Replicate for GenerationReader {
    fn replicate_for_thread(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|b| b.as_ref().map(Replicate::replicate_for_thread))
                .collect(),
            decoder: self.decoder.replicate(),
            outer: Arc::clone(&self.outer),
            outer_access: self.outer_access,
            outer_bucket: None,
            scan_bucket: 0,
        }
    }
}
