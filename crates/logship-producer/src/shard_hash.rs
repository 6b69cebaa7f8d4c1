//! Routing-hash bucket adjustment.
//!
//! When enabled, caller-supplied routing hashes are rounded down to the
//! lower endpoint of one of `buckets` uniform ranges across the 128-bit
//! hash space, so records whose hashes land in the same range share a batch
//! (and therefore a shard write).

use crate::config::ProducerConfig;
use crate::error::{ProducerError, Result};

const HASH_HEX_DIGITS: usize = 32;

/// Round `hash` down to its bucket's lower endpoint.
///
/// `hash` is a hex string of up to 32 digits, interpreted left-aligned in
/// the 128-bit space; the result is always the full 32 lowercase digits.
/// `buckets` must be a power of two in `1..=256`.
pub fn adjust_shard_hash(hash: &str, buckets: u32) -> Result<String> {
    if !ProducerConfig::valid_buckets(buckets) {
        return Err(ProducerError::InvalidArgument(format!(
            "buckets must be a power of two in 1..=256, got {buckets}"
        )));
    }
    if hash.is_empty() || hash.len() > HASH_HEX_DIGITS {
        return Err(ProducerError::InvalidArgument(format!(
            "shard hash must be 1..=32 hex digits, got {} characters",
            hash.len()
        )));
    }
    let parsed = u128::from_str_radix(hash, 16).map_err(|_| {
        ProducerError::InvalidArgument(format!("shard hash is not valid hex: {hash:?}"))
    })?;
    // Left-align short hashes in the 128-bit space.
    let value = parsed << (4 * (HASH_HEX_DIGITS - hash.len()));

    let bits = buckets.trailing_zeros();
    let mask = if bits == 0 { 0 } else { !(u128::MAX >> bits) };
    Ok(format!("{:032x}", value & mask))
}
