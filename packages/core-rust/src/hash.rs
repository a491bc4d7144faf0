//! SHA-256 based shard hash for key placement.
//!
//! The placement contract: hash a key with SHA-256, take the first 8 hex
//! characters of the digest (equivalently the first 4 bytes, big-endian),
//! parse them as a 32-bit integer, and reduce modulo the shard count. The
//! contract is deliberately simple so that snapshots written by one
//! deployment can be resumed by another implementation, as long as the shard
//! naming (and therefore ordering) is unchanged.

use sha2::{Digest, Sha256};

/// Computes the 32-bit shard hash of a key.
///
/// Equal to parsing the first 8 hex characters of `SHA-256(key)` as an
/// unsigned 32-bit integer.
///
/// # Examples
///
/// ```
/// use kvgrid_core::hash::shard_hash;
///
/// assert_eq!(shard_hash("hello"), 754_077_114);
/// assert_eq!(shard_hash("user:1"), 2_881_725_563);
/// ```
#[must_use]
pub fn shard_hash(key: &str) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Maps a key to a shard index in `[0, shard_count)`.
///
/// # Panics
///
/// Panics if `shard_count` is zero.
#[must_use]
pub fn shard_index(key: &str, shard_count: usize) -> usize {
    assert!(shard_count > 0, "shard_count must be non-zero");
    // The u64 widening keeps the modulo exact on 32-bit targets.
    (u64::from(shard_hash(key)) % shard_count as u64) as usize
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    // ---- Cross-implementation test vectors ----
    //
    // Digest prefixes independently computed; the assignment of these keys
    // must never change while snapshot-and-resume compatibility matters.

    #[test]
    fn vector_hello() {
        // sha256("hello") = 2cf24dba... -> 0x2cf24dba
        assert_eq!(shard_hash("hello"), 0x2cf2_4dba);
    }

    #[test]
    fn vector_empty_string() {
        // sha256("") = e3b0c442... -> 0xe3b0c442
        assert_eq!(shard_hash(""), 0xe3b0_c442);
    }

    #[test]
    fn vector_user_keys() {
        assert_eq!(shard_hash("user:1"), 0xabc3_a47b);
        assert_eq!(shard_hash("user:2"), 0x0195_616c);
        assert_eq!(shard_hash("user:3"), 0x4bb4_0fa4);
    }

    #[test]
    fn vector_three_shard_assignment() {
        // The canonical three-shard cluster: these placements are part of the
        // compatibility contract exercised by snapshot-resume scenarios.
        assert_eq!(shard_index("user:1", 3), 2);
        assert_eq!(shard_index("user:2", 3), 1);
        assert_eq!(shard_index("user:3", 3), 2);
        assert_eq!(shard_index("hello", 3), 0);
    }

    #[test]
    fn hash_matches_hex_prefix_parse() {
        // The "first 8 hex characters" phrasing and the byte-wise
        // implementation must agree.
        for key in ["a", "b", "hello", "user:42", ""] {
            let digest = sha2::Sha256::digest(key.as_bytes());
            let hex_prefix = &hex::encode(digest)[..8];
            let parsed = u32::from_str_radix(hex_prefix, 16).unwrap();
            assert_eq!(shard_hash(key), parsed, "key {key:?}");
        }
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn zero_shard_count_panics() {
        let _ = shard_index("key", 0);
    }

    proptest! {
        #[test]
        fn index_always_in_range(key in ".{0,64}", n in 1_usize..16) {
            let idx = shard_index(&key, n);
            prop_assert!(idx < n);
        }

        #[test]
        fn hash_is_deterministic(key in ".{0,64}") {
            prop_assert_eq!(shard_hash(&key), shard_hash(&key));
        }
    }
}
