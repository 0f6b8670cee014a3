//! # Build Options
//!
//! Validated configuration for one generation build. Validation is eager:
//! every structural mistake (zero buckets, a grouped mode without a child
//! field name, a child field colliding with a schema field) surfaces from
//! [`crate::build::GenerationBuilder::create`] before any file or thread
//! exists.

use std::path::{Path, PathBuf};

use eyre::{ensure, Result};

use crate::config::{DEFAULT_NUM_BUCKETS, DEFAULT_SORT_THREADS};
use crate::meta::GroupingMode;
use crate::records::Schema;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub dir: PathBuf,
    pub schema: Schema,
    pub grouping: GroupingMode,
    pub num_buckets: u32,
    pub sort_threads: usize,
}

impl BuildOptions {
    pub fn new(dir: impl AsRef<Path>, schema: Schema) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            schema,
            grouping: GroupingMode::Flat { counted: false },
            num_buckets: DEFAULT_NUM_BUCKETS,
            sort_threads: DEFAULT_SORT_THREADS,
        }
    }

    pub fn grouping(mut self, grouping: GroupingMode) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn num_buckets(mut self, num_buckets: u32) -> Self {
        self.num_buckets = num_buckets;
        self
    }

    pub fn sort_threads(mut self, sort_threads: usize) -> Self {
        self.sort_threads = sort_threads;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(self.num_buckets >= 1, "bucket count must be at least 1");
        ensure!(self.sort_threads >= 1, "sort thread cap must be at least 1");

        if let GroupingMode::Grouped { child_field, .. } = &self.grouping {
            ensure!(
                !child_field.is_empty(),
                "grouped mode requires a child field name"
            );
            let collides = self
                .schema
                .key_fields()
                .iter()
                .chain(self.schema.value_fields())
                .any(|f| f == child_field);
            ensure!(
                !collides,
                "child field '{}' collides with a schema field",
                child_field
            );
        }
        Ok(())
    }
}
