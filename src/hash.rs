//! # Bucket Partitioner
//!
//! Routes a serialized key to its bucket with a 64-bit avalanche hash of
//! the raw key bytes. The same function runs at build time (choosing the
//! temp writer) and at read time (choosing the bucket to binary-search), so
//! it must be deterministic, seed-fixed, and byte-exact across both paths.
//! The bucket count is fixed when a generation is built and persisted in
//! its metadata.
//!
//! The mix is the Murmur3 x64 128-bit construction; the first 64-bit lane
//! is masked to 63 bits before the modulo so the reduction never sees a
//! sign-ambiguous value.

const SEED: u64 = 0x9747_b28c;

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[inline]
fn load_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(bytes.try_into().unwrap()) // INVARIANT: callers pass exactly 8 bytes
}

/// 63-bit hash of `key` (low 63 bits of the first Murmur3 x64-128 lane).
pub fn hash63(key: &[u8]) -> u64 {
    let mut h1 = SEED;
    let mut h2 = SEED;

    let mut blocks = key.chunks_exact(16);
    for block in blocks.by_ref() {
        let mut k1 = load_u64(&block[..8]);
        let mut k2 = load_u64(&block[8..]);

        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 ^= k2;
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u64;
        let mut k2 = 0u64;
        for (i, &b) in tail.iter().enumerate() {
            if i < 8 {
                k1 |= (b as u64) << (8 * i);
            } else {
                k2 |= (b as u64) << (8 * (i - 8));
            }
        }
        if tail.len() > 8 {
            k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
            h2 ^= k2;
        }
        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 ^= k1;
    }

    let len = key.len() as u64;
    h1 ^= len;
    h2 ^= len;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1 = h1.wrapping_add(h2);

    h1 & 0x7FFF_FFFF_FFFF_FFFF
}

/// Bucket for `key` in a generation with `num_buckets` buckets.
pub fn bucket_of(key: &[u8], num_buckets: u32) -> u32 {
    debug_assert!(num_buckets > 0);
    (hash63(key) % num_buckets as u64) as u32
}
