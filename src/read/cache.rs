//! # Open-Generation Cache
//!
//! Explicit, reference-counted cache of open generations, keyed by
//! canonical directory path. Each generation is opened (and its files
//! mapped) at most once per cache; callers receive `Arc` handles and
//! replicate per-thread sessions from them. There is no implicit or
//! thread-local state: the cache is created by the application, passed
//! where it is needed, and releases every mapping when dropped or when a
//! generation is evicted.
//!
//! A generation must be opened with the same [`ReadOptions`] by every
//! caller of one cache — visit-tracking state is allocated at open time
//! and cannot differ between handles to the same mapping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;

use crate::read::set::{GenerationReader, ReadOptions};

#[derive(Debug)]
struct CachedGeneration {
    reader: Arc<GenerationReader>,
    options: ReadOptions,
}

#[derive(Debug, Default)]
pub struct ReaderCache {
    generations: Mutex<HashMap<PathBuf, CachedGeneration>>,
}

impl ReaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a generation, or returns the already-open handle for its
    /// canonical path. Threads replicate their own sessions from the
    /// returned handle.
    pub fn open(&self, dir: &Path, options: ReadOptions) -> Result<Arc<GenerationReader>> {
        let key = std::fs::canonicalize(dir)
            .wrap_err_with(|| format!("failed to resolve generation directory '{}'", dir.display()))?;

        let mut generations = self.generations.lock();
        if let Some(cached) = generations.get(&key) {
            ensure!(
                cached.options == options,
                "generation '{}' is already open with different read options",
                dir.display()
            );
            return Ok(Arc::clone(&cached.reader));
        }

        let reader = Arc::new(GenerationReader::open(dir, options.clone())?);
        generations.insert(
            key,
            CachedGeneration {
                reader: Arc::clone(&reader),
                options,
            },
        );
        Ok(reader)
    }

    /// Drops the cache's handle for a generation. Existing `Arc` holders
    /// keep their mappings alive until they drop too.
    pub fn evict(&self, dir: &Path) -> bool {
        let key = match std::fs::canonicalize(dir) {
            Ok(key) => key,
            Err(_) => return false,
        };
        self.generations.lock().remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.generations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.generations.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildOptions, GenerationBuilder};
    use crate::records::Schema;
    use tempfile::tempdir;

    fn build_generation(dir: &Path) {
        let schema = Schema::new(&["id"], &["name"]).unwrap();
        let builder =
            GenerationBuilder::create(BuildOptions::new(dir, schema.clone()).num_buckets(2), 1)
                .unwrap();
        let mut producer = builder.producer().unwrap();
        let key = schema.key_builder().int(1).finish().unwrap();
        let value = schema.value_builder().text("a").finish().unwrap();
        producer.store(&key, &value).unwrap();
        producer.close().unwrap();
    }

    #[test]
    fn second_open_reuses_the_handle() {
        let dir = tempdir().unwrap();
        build_generation(dir.path());

        let cache = ReaderCache::new();
        let first = cache.open(dir.path(), ReadOptions::default()).unwrap();
        let second = cache.open(dir.path(), ReadOptions::default()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn mismatched_options_are_rejected() {
        let dir = tempdir().unwrap();
        build_generation(dir.path());

        let cache = ReaderCache::new();
        cache.open(dir.path(), ReadOptions::default()).unwrap();

        let outer = ReadOptions {
            outer_access: true,
            live_fields: None,
        };
        assert!(cache.open(dir.path(), outer).is_err());
    }

    #[test]
    fn evict_releases_the_cache_handle() {
        let dir = tempdir().unwrap();
        build_generation(dir.path());

        let cache = ReaderCache::new();
        cache.open(dir.path(), ReadOptions::default()).unwrap();
        assert!(cache.evict(dir.path()));
        assert!(!cache.evict(dir.path()));
        assert!(cache.is_empty());
    }

    #[test]
    fn incomplete_generation_is_not_cached() {
        let dir = tempdir().unwrap(); // no metadata file here

        let cache = ReaderCache::new();
        assert!(cache.open(dir.path(), ReadOptions::default()).is_err());
        assert!(cache.is_empty());
    }
}
