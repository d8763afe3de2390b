//! Key hashing used for partition selection.
//!
//! Producers written in other languages must land the same key on the same
//! partition, so the hash follows the Kafka Java client bit for bit.

const SEED: u32 = 0x9747_b28c;
const M: u32 = 0x5bd1_e995;
const R: u32 = 24;

/// Kafka-compatible murmur2 hash of `data`.
///
/// Java `int` arithmetic wraps exactly like `u32` wrapping ops, so the result
/// equals `Utils.murmur2()` reinterpreted as unsigned.
///
/// ```
/// # use brook_core::hash::murmur2;
/// assert_eq!(murmur2(b"hello"), 1682149141);
/// ```
pub fn murmur2(data: &[u8]) -> u32 {
    let mut h = SEED ^ data.len() as u32;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M) ^ k;
    }

    let tail = chunks.remainder();
    if tail.len() == 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^ (h >> 15)
}

/// Index in `0..num_partitions` for `key`, identical to Kafka's
/// `toPositive(murmur2(key)) % numPartitions`.
///
/// Callers must ensure `num_partitions > 0`.
#[inline]
pub fn murmur2_partition(key: &[u8], num_partitions: u32) -> u32 {
    (murmur2(key) & 0x7fff_ffff) % num_partitions
}
