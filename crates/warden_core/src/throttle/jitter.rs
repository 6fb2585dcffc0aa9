//! Deterministic backoff jitter.
//!
//! The jitter fraction depends only on `(key, floor(now_s / 5))`, so every call
//! for the same symbol inside one 5-second bucket returns the same value, across
//! restarts too.

pub const JITTER_BUCKET_SEC: u64 = 5;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(hash: u64, bytes: &[u8]) -> u64 {
    bytes.iter().fold(hash, |acc, &byte| {
        (acc ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

pub fn jitter_bucket(now_ms: u64) -> u64 {
    now_ms / 1_000 / JITTER_BUCKET_SEC
}

/// Uniform-looking fraction in `[0, 1)` with 1/1000 resolution.
pub fn jitter_fraction(key: &str, bucket: u64) -> f64 {
    let mut hash = fnv1a(FNV_OFFSET_BASIS, key.as_bytes());
    hash = fnv1a(hash, &[0x00]);
    hash = fnv1a(hash, &bucket.to_le_bytes());
    let seed = hash & 0xffff_ffff;
    (seed % 1_000) as f64 / 1_000.0
}

/// Perturb `base_ms` by up to ±`jitter_pct`, floored at zero.
pub fn apply_jitter(base_ms: f64, jitter_pct: f64, key: &str, bucket: u64) -> f64 {
    let frac = jitter_fraction(key, bucket);
    let factor = 1.0 + (frac * 2.0 - 1.0) * jitter_pct;
    (base_ms * factor).max(0.0)
}
