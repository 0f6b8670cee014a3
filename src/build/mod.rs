//! # Generation Build Pipeline
//!
//! Builds one immutable generation from an unordered, concurrently-produced
//! stream of (key, value) record pairs:
//!
//! ```text
//! Producer threads ──► per-thread batches ──► TempBucketWriter (per bucket)
//!                                                   │
//!                              temp.<NN> files ◄────┘
//!                                   │
//!      Barrier A (all producers) ───┤  last arriver closes writers,
//!                                   │  seeds the sort queue
//!      sort workers (≤ cap) ────────┤  BucketSorter per bucket:
//!                                   │  records.<NN>.ndb + offsets.<NN>.bin
//!      Barrier B (all producers) ───┘  last arriver writes kiln.meta
//! ```
//!
//! Nothing a producer stores is observable until every producer has closed
//! and the metadata file exists. Any I/O failure anywhere in the pipeline
//! leaves the directory without metadata, which is the one and only signal
//! readers use to treat a generation as absent.
//!
//! ## Module Organization
//!
//! - [`options`]: validated build configuration
//! - [`writer`]: per-bucket temp-file worker with rendezvous hand-off
//! - [`sorter`]: per-bucket external sort and final-file emission
//! - [`coordinator`]: shared build state, producers, and the close protocol
//! - [`stats`]: atomic build counters

mod coordinator;
mod options;
mod sorter;
mod stats;
mod writer;

pub use coordinator::{GenerationBuilder, Producer};
pub use options::BuildOptions;
pub use sorter::{sort_bucket, SortOutput};
pub use stats::{BuildStats, BuildStatsSnapshot};
pub use writer::TempBucketWriter;
