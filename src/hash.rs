//! xxHash-based distribution hashing.
//!
//! A hash-distributed table assigns each row to the shard owning the hash
//! of its distribution value. The value is hashed in its text form, so the
//! hash of `42::int4` and `'42'::text` agree.

use xxhash_rust::xxh64;

use crate::datum::Datum;

const SEED: u64 = 0x517cc1b727220a95;

/// 64-bit hash of a distribution value's text form.
pub fn distribution_hash(input: &str) -> u64 {
    xxh64::xxh64(input.as_bytes(), SEED)
}

/// Shard index (0-based) of a non-null value among `shard_count` shards.
///
/// Returns `None` for NULL, which has no shard.
pub fn shard_index_for(value: &Datum, shard_count: u32) -> Option<u32> {
    let text = value.to_text()?;
    let shard_count = u64::from(shard_count.max(1));
    Some((distribution_hash(&text) % shard_count) as u32)
}

/// Hash exposed to SQL, for checking where a value would be routed.
#[cfg(feature = "pg18")]
#[pgrx::pg_extern(immutable, parallel_safe)]
fn pg_funnel_shard_hash(input: &str) -> i64 {
    distribution_hash(input) as i64
}
