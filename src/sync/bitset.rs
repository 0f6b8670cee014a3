//! # Lock-Free Visited Bitset
//!
//! Fixed-capacity bitset over entry ordinals `0..len`, one `AtomicU64` per
//! 64 bits. A set bit means "this entry's value has been returned to a
//! reader". Bits only ever transition unset→set — there is no clear or
//! reset — which is what keeps every operation a single atomic RMW or a
//! plain load, with no locking anywhere.
//!
//! Readers on many threads share one bitset per bucket once visit tracking
//! is enabled; the outer-access scan walks `next_clear_bit` to find entries
//! no lookup ever touched.

use std::sync::atomic::{AtomicU64, Ordering};

const WORD_BITS: usize = 64;

#[derive(Debug)]
pub struct ConcurrentBitset {
    words: Box<[AtomicU64]>,
    len: usize,
}

impl ConcurrentBitset {
    /// Creates an all-clear bitset over ordinals `0..len`.
    pub fn new(len: usize) -> Self {
        let word_count = len.div_ceil(WORD_BITS);
        let words = (0..word_count).map(|_| AtomicU64::new(0)).collect();
        Self { words, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Atomically sets bit `index`, returning whether it was already set.
    /// Idempotent; concurrent callers agree on exactly one "first" setter.
    pub fn set(&self, index: usize) -> bool {
        assert!(index < self.len, "bit {} out of range {}", index, self.len);
        let mask = 1u64 << (index % WORD_BITS);
        let prior = self.words[index / WORD_BITS].fetch_or(mask, Ordering::AcqRel);
        prior & mask != 0
    }

    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.len, "bit {} out of range {}", index, self.len);
        let mask = 1u64 << (index % WORD_BITS);
        self.words[index / WORD_BITS].load(Ordering::Acquire) & mask != 0
    }

    /// First set bit at or after `from`, or `None`.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        self.scan(from, |w| w)
    }

    /// First clear bit at or after `from`, or `None`.
    pub fn next_clear_bit(&self, from: usize) -> Option<usize> {
        self.scan(from, |w| !w)
    }

    fn scan(&self, from: usize, transform: impl Fn(u64) -> u64) -> Option<usize> {
        if from >= self.len {
            return None;
        }

        let mut word_idx = from / WORD_BITS;
        // mask off bits below `from` in the first word
        let mut candidates =
            transform(self.words[word_idx].load(Ordering::Acquire)) & (!0u64 << (from % WORD_BITS));

        loop {
            if candidates != 0 {
                let bit = word_idx * WORD_BITS + candidates.trailing_zeros() as usize;
                return if bit < self.len { Some(bit) } else { None };
            }
            word_idx += 1;
            if word_idx >= self.words.len() {
                return None;
            }
            candidates = transform(self.words[word_idx].load(Ordering::Acquire));
        }
    }
}
