//! # KilnDB Configuration Module
//!
//! This module centralizes configuration constants and generation-directory
//! file naming. Constants are grouped by functional area and their
//! interdependencies are documented where they exist.
//!
//! ## Why Centralization?
//!
//! The batch flush threshold, the temp-file size ceiling, and the offsets
//! file's `i32` entry width all constrain one another. Keeping them in one
//! place makes the relationships visible instead of scattering magic numbers
//! across the build and read paths.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values
//! - File-name helpers for the fixed per-generation directory layout

pub mod constants;
pub use constants::*;

/// Records file for one bucket, e.g. `records.03.ndb`.
pub fn records_file_name(bucket: u32) -> String {
    format!("records.{:02}.ndb", bucket)
}

/// Offsets index file for one bucket, e.g. `offsets.03.bin`.
pub fn offsets_file_name(bucket: u32) -> String {
    format!("offsets.{:02}.bin", bucket)
}

/// Build-intermediate spill file for one bucket, deleted after sorting.
pub fn temp_file_name(bucket: u32) -> String {
    format!("temp.{:02}", bucket)
}
