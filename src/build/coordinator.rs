//! # Build Coordinator
//!
//! Shared state for one generation build plus the per-thread [`Producer`]
//! handles that feed it. The coordinator owns the bucket writers, the
//! reusable phase barrier, the sort queue, and the per-bucket statistics
//! that end up in metadata.
//!
//! ## Close Protocol
//!
//! Every producer must be closed, and `close` runs the same four steps on
//! every thread:
//!
//! 1. flush remaining batches;
//! 2. arrive at the barrier — the last arriver finishes all bucket writers
//!    and seeds the sort queue with `producers - cap` leading `Done`
//!    markers, one task per bucket, and `cap` trailing `Done` markers,
//!    where `cap = min(producers, sort_threads)`;
//! 3. drain the sort queue until a `Done` is drawn (threads that draw a
//!    leading `Done` do no sorting, which caps sort parallelism);
//! 4. arrive at the barrier again — the last arriver writes `kiln.meta`.
//!
//! ## Failure Semantics
//!
//! Any I/O failure is fatal to the whole build. The failing thread records
//! the error and raises a shared flag; every other thread still runs the
//! full protocol (so nobody blocks forever) but metadata is never written,
//! and every `close` call reports failure. The directory is then an
//! incomplete generation that readers treat as absent.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use parking_lot::Mutex;

use crate::build::options::BuildOptions;
use crate::build::sorter::sort_bucket;
use crate::build::stats::{BuildStats, BuildStatsSnapshot};
use crate::build::writer::TempBucketWriter;
use crate::codec;
use crate::config::{temp_file_name, BATCH_FLUSH_BYTES};
use crate::hash::bucket_of;
use crate::meta::{GenerationMeta, META_FILE_NAME};
use crate::records::Record;
use crate::sync::{Item, PhaseBarrier, WorkQueue};

#[derive(Debug)]
struct BucketResults {
    entries: Vec<u64>,
    max_group_size: Vec<u32>,
    max_value_bytes: Vec<u32>,
}

#[derive(Debug)]
pub struct GenerationBuilder {
    options: BuildOptions,
    writers: Vec<TempBucketWriter>,
    barrier: PhaseBarrier,
    sort_queue: WorkQueue<u32>,
    results: Mutex<BucketResults>,
    stats: BuildStats,
    num_producers: usize,
    producers_claimed: AtomicUsize,
    failed: AtomicBool,
}

impl GenerationBuilder {
    /// Creates the generation directory and spawns one temp writer per
    /// bucket. Exactly `num_producers` [`Producer`] handles must be claimed
    /// and closed, or the close barrier never completes.
    pub fn create(options: BuildOptions, num_producers: usize) -> Result<Arc<Self>> {
        options.validate()?;
        ensure!(num_producers >= 1, "a build needs at least one producer");

        std::fs::create_dir_all(&options.dir).wrap_err_with(|| {
            format!(
                "failed to create generation directory '{}'",
                options.dir.display()
            )
        })?;
        ensure!(
            !options.dir.join(META_FILE_NAME).exists(),
            "directory '{}' already holds a finished generation",
            options.dir.display()
        );

        let writers = (0..options.num_buckets)
            .map(|bucket| TempBucketWriter::spawn(options.dir.join(temp_file_name(bucket))))
            .collect();

        let num_buckets = options.num_buckets as usize;
        Ok(Arc::new(Self {
            writers,
            barrier: PhaseBarrier::new(num_producers),
            sort_queue: WorkQueue::new(),
            results: Mutex::new(BucketResults {
                entries: vec![0; num_buckets],
                max_group_size: vec![0; num_buckets],
                max_value_bytes: vec![0; num_buckets],
            }),
            stats: BuildStats::default(),
            num_producers,
            producers_claimed: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            options,
        }))
    }

    /// Claims one of the declared producer slots.
    pub fn producer(self: &Arc<Self>) -> Result<Producer> {
        let claimed = self.producers_claimed.fetch_add(1, Ordering::SeqCst);
        ensure!(
            claimed < self.num_producers,
            "all {} declared producers are already claimed",
            self.num_producers
        );
        Ok(Producer {
            builder: Arc::clone(self),
            batches: vec![Vec::new(); self.options.num_buckets as usize],
            value_field: Vec::new(),
        })
    }

    pub fn stats(&self) -> BuildStatsSnapshot {
        self.stats.snapshot()
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Barrier-A leader work: close every temp writer, then seed the sort
    /// queue. On writer failure the queue gets only termination markers so
    /// every thread exits the sort phase immediately.
    fn finish_writers_and_seed_queue(&self) -> Result<()> {
        let mut first_err = None;
        for writer in &self.writers {
            if let Err(e) = writer.finish() {
                first_err.get_or_insert(e);
            }
        }

        let producers = self.num_producers;
        match first_err {
            Some(e) => {
                self.mark_failed();
                self.sort_queue
                    .extend((0..producers).map(|_| Item::Done));
                Err(e)
            }
            None => {
                let cap = producers.min(self.options.sort_threads);
                self.sort_queue.extend((0..producers - cap).map(|_| Item::Done));
                self.sort_queue
                    .extend((0..self.options.num_buckets).map(Item::Task));
                self.sort_queue.extend((0..cap).map(|_| Item::Done));
                Ok(())
            }
        }
    }

    fn sort_one(&self, bucket: u32) -> Result<()> {
        if self.has_failed() {
            return Ok(()); // the build is doomed; don't waste the work
        }

        let output = sort_bucket(
            &self.options.dir,
            bucket,
            self.options.schema.num_key_fields(),
            &self.options.grouping,
        )?;

        if let Some(output) = output {
            let mut results = self.results.lock();
            results.entries[bucket as usize] = output.entries_written;
            results.max_group_size[bucket as usize] = output.max_group_size;
            results.max_value_bytes[bucket as usize] = output.max_value_bytes;
        }
        self.stats.buckets_sorted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_metadata(&self) -> Result<()> {
        let results = self.results.lock();
        let meta = GenerationMeta {
            num_buckets: self.options.num_buckets,
            entry_count: results.entries.iter().sum(),
            key_fields: self.options.schema.key_fields().to_vec(),
            value_fields: self.options.schema.value_fields().to_vec(),
            grouping: self.options.grouping.clone(),
            max_group_size: results.max_group_size.clone(),
            max_value_bytes: results.max_value_bytes.clone(),
        };
        meta.write(&self.options.dir)
    }
}

impl Drop for GenerationBuilder {
    fn drop(&mut self) {
        // unblock worker threads of a build that was abandoned without
        // closing; after a normal close this is a no-op
        for writer in &self.writers {
            let _ = writer.finish();
        }
    }
}

/// Per-thread handle feeding one build. Every claimed producer must be
/// closed; a dropped-without-close producer strands the other threads at
/// the close barrier.
#[derive(Debug)]
pub struct Producer {
    builder: Arc<GenerationBuilder>,
    batches: Vec<Vec<u8>>,
    value_field: Vec<u8>,
}

impl Producer {
    /// Routes one (key, value) pair to its bucket batch, handing the batch
    /// to the bucket's writer when it crosses the flush threshold. Nothing
    /// is observable until the whole build closes.
    pub fn store(&mut self, key: &Record, value: &Record) -> Result<()> {
        let key_bytes = key.bytes();

        self.value_field.clear();
        codec::pack(value.bytes(), &mut self.value_field);

        let entry_len = key_bytes.len() + self.value_field.len();
        ensure!(
            entry_len <= u32::MAX as usize,
            "entry of {} bytes exceeds the representable entry size",
            entry_len
        );

        let bucket = bucket_of(key_bytes, self.builder.options.num_buckets) as usize;
        let batch = &mut self.batches[bucket];
        batch.extend_from_slice(&(entry_len as u32).to_le_bytes());
        batch.extend_from_slice(key_bytes);
        batch.extend_from_slice(&self.value_field);

        self.builder
            .stats
            .records_stored
            .fetch_add(1, Ordering::Relaxed);

        if batch.len() >= BATCH_FLUSH_BYTES {
            self.flush_bucket(bucket);
        }
        Ok(())
    }

    fn flush_bucket(&mut self, bucket: usize) {
        let batch = std::mem::take(&mut self.batches[bucket]);
        if batch.is_empty() {
            return;
        }
        self.builder
            .stats
            .bytes_spilled
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.builder
            .stats
            .batches_submitted
            .fetch_add(1, Ordering::Relaxed);
        self.builder.writers[bucket].submit(batch);
    }

    /// Runs this thread's share of the two-phase close protocol. Returns
    /// only after the whole build has succeeded or failed; an `Err` from
    /// any producer means the generation is incomplete and must be
    /// discarded.
    pub fn close(mut self) -> Result<()> {
        for bucket in 0..self.batches.len() {
            self.flush_bucket(bucket);
        }

        let builder = &self.builder;
        let mut local_err: Option<eyre::Report> = None;

        if let Some(leader) = builder.barrier.arrive() {
            if let Err(e) = builder.finish_writers_and_seed_queue() {
                local_err = Some(e);
            }
            drop(leader);
        }

        loop {
            match builder.sort_queue.pop() {
                Item::Done => break,
                Item::Task(bucket) => {
                    if let Err(e) = builder.sort_one(bucket) {
                        builder.mark_failed();
                        local_err.get_or_insert(e);
                    }
                }
            }
        }

        if let Some(leader) = builder.barrier.arrive() {
            if !builder.has_failed() {
                if let Err(e) = builder.write_metadata() {
                    builder.mark_failed();
                    local_err.get_or_insert(e);
                }
            }
            drop(leader);
        }

        if let Some(e) = local_err {
            return Err(e);
        }
        if builder.has_failed() {
            bail!("generation build failed on another producer thread; metadata was not written");
        }
        Ok(())
    }
}
