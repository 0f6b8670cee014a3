//! # Synchronization Primitives
//!
//! Small, purpose-built coordination types shared by the build and read
//! paths:
//!
//! - [`ConcurrentBitset`]: lock-free visited tracking over entry ordinals
//! - [`PhaseBarrier`]: reusable rendezvous that elects one leader per phase
//! - [`WorkQueue`]: blocking queue carrying explicit `Task`/`Done` items
//!
//! Each type does exactly one job; none of them knows anything about
//! buckets, files, or records.

mod barrier;
mod bitset;
mod queue;

pub use barrier::{LeaderGuard, PhaseBarrier};
pub use bitset::ConcurrentBitset;
pub use queue::{Item, WorkQueue};
