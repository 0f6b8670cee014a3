//! # Configuration Constants
//!
//! All numeric configuration values for KilnDB, with their dependency
//! relationships documented.
//!
//! ## Dependency Notes
//!
//! - `MAX_BUCKET_TEMP_BYTES` must not exceed `i32::MAX`: the offsets index
//!   stores `i32` byte-offsets into the records file, and a bucket's final
//!   records file is never materially larger than its temp file.
//! - `BATCH_FLUSH_BYTES` bounds per-producer memory at roughly
//!   `num_buckets * BATCH_FLUSH_BYTES` in the worst case, plus one in-flight
//!   batch per bucket held by the hand-off slot.

/// Per-bucket batch buffer size at which a producer hands the batch to the
/// bucket's temp writer. Larger batches amortize hand-off cost; smaller
/// batches bound producer memory.
pub const BATCH_FLUSH_BYTES: usize = 1024 * 1024;

/// Default bucket count when the caller does not choose one. Must be >= 1.
pub const DEFAULT_NUM_BUCKETS: u32 = 16;

/// Default cap on sort-phase parallelism. The effective cap is
/// `min(producer_count, sort_threads)`.
pub const DEFAULT_SORT_THREADS: usize = 4;

/// Hard ceiling on a bucket's temp file. Offsets into the final records
/// file are `i32`, so anything beyond this is unrepresentable and the
/// build fails eagerly before sorting begins.
pub const MAX_BUCKET_TEMP_BYTES: u64 = i32::MAX as u64;

const _: () = assert!(MAX_BUCKET_TEMP_BYTES <= i32::MAX as u64);
const _: () = assert!(BATCH_FLUSH_BYTES >= 4096);
