//! # Temp Bucket Writer
//!
//! One long-lived worker thread per bucket, streaming producer batches
//! verbatim to the bucket's temp file in arrival order. Producers hand a
//! batch over through a single-slot rendezvous: `submit` blocks until the
//! worker has taken the previous batch, so at most one batch per bucket is
//! ever in flight — the build's only backpressure mechanism.
//!
//! The temp file is created lazily on the first batch; a bucket that never
//! receives data leaves no file behind, which is how the sorter recognizes
//! an empty bucket.
//!
//! Write errors are deferred: the worker records the first failure, keeps
//! draining (and discarding) batches so producers never deadlock on a dead
//! slot, and [`TempBucketWriter::finish`] surfaces the error. A failed
//! bucket makes the whole build fatal anyway, so nothing is lost by
//! discarding the remainder.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use eyre::{eyre, Result, WrapErr};
use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct Slot {
    batch: Option<Vec<u8>>,
    finished: bool,
}

#[derive(Debug)]
struct Handoff {
    slot: Mutex<Slot>,
    slot_free: Condvar,
    slot_filled: Condvar,
}

#[derive(Debug)]
pub struct TempBucketWriter {
    handoff: Arc<Handoff>,
    worker: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl TempBucketWriter {
    /// Spawns the worker for one bucket's temp file.
    pub fn spawn(path: PathBuf) -> Self {
        let handoff = Arc::new(Handoff {
            slot: Mutex::new(Slot {
                batch: None,
                finished: false,
            }),
            slot_free: Condvar::new(),
            slot_filled: Condvar::new(),
        });

        let worker_handoff = Arc::clone(&handoff);
        let handle = std::thread::spawn(move || worker_loop(path, worker_handoff));

        Self {
            handoff,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Hands a batch to the worker, blocking until the previous batch has
    /// been taken. Empty batches are ignored.
    pub fn submit(&self, batch: Vec<u8>) {
        if batch.is_empty() {
            return;
        }
        let mut slot = self.handoff.slot.lock();
        while slot.batch.is_some() {
            self.handoff.slot_free.wait(&mut slot);
        }
        slot.batch = Some(batch);
        self.handoff.slot_filled.notify_one();
    }

    /// Signals end-of-input and joins the worker, surfacing any deferred
    /// write error. Must only be called after every producer has flushed
    /// its final batch for this bucket.
    pub fn finish(&self) -> Result<()> {
        {
            let mut slot = self.handoff.slot.lock();
            slot.finished = true;
            self.handoff.slot_filled.notify_one();
        }

        match self.worker.lock().take() {
            Some(handle) => handle
                .join()
                .map_err(|_| eyre!("temp writer thread panicked"))?,
            None => Ok(()),
        }
    }
}

fn worker_loop(path: PathBuf, handoff: Arc<Handoff>) -> Result<()> {
    let mut file: Option<BufWriter<File>> = None;
    let mut failure: Option<eyre::Report> = None;

    loop {
        let batch = {
            let mut slot = handoff.slot.lock();
            loop {
                if let Some(batch) = slot.batch.take() {
                    handoff.slot_free.notify_one();
                    break Some(batch);
                }
                if slot.finished {
                    break None;
                }
                handoff.slot_filled.wait(&mut slot);
            }
        };

        let Some(batch) = batch else { break };
        if failure.is_some() {
            continue; // drain and discard; the build is already doomed
        }
        if let Err(e) = write_batch(&path, &mut file, &batch) {
            failure = Some(e);
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    if let Some(mut writer) = file {
        writer
            .flush()
            .wrap_err_with(|| format!("failed to flush temp file '{}'", path.display()))?;
    }
    Ok(())
}

fn write_batch(path: &std::path::Path, file: &mut Option<BufWriter<File>>, batch: &[u8]) -> Result<()> {
    if file.is_none() {
        let created = File::create(path)
            .wrap_err_with(|| format!("failed to create temp file '{}'", path.display()))?;
        *file = Some(BufWriter::new(created));
    }
    if let Some(writer) = file.as_mut() {
        writer
            .write_all(batch)
            .wrap_err_with(|| format!("failed to write temp file '{}'", path.display()))?;
    }
    Ok(())
}
