//! Short, filesystem-safe aliases for cache entries.
//!
//! Remote identifiers can be arbitrarily long and contain any character, which
//! makes them terrible file names. Every cache entry is instead assigned a row
//! id by the index, and that row id is encoded into a short alias used for the
//! on-disk artifact names.
//!
//! The low [`BLOCK_SIZE`] bits of the row id are bit-reversed before being
//! written out in base 31, so consecutive row ids produce aliases that look
//! nothing alike (and spread evenly across the shard directories, which are
//! keyed on the first character). Bits above the block are carried through
//! untouched, which keeps the mapping a bijection over all of `u64`.
//!
//! ```
//! use ocache_storage::alias;
//!
//! assert_eq!(alias::encode(8), "n242n");
//! assert_eq!(alias::decode("n242n").unwrap(), 8);
//! ```

use crate::error::{ErrorKind, Result};

/// Digits of the encoding, in order of value. No vowels that could spell
/// anything unfortunate, no characters that need escaping on any filesystem.
pub const ALPHABET: &[u8; 31] = b"mn6j2c4rv8bpygw95z7hsdaetxuk3fq";
/// Number of low bits that get shuffled.
pub const BLOCK_SIZE: u32 = 24;
/// Aliases shorter than this are left-padded with the zero digit.
pub const MIN_LENGTH: usize = 5;

const BASE: u64 = ALPHABET.len() as u64;
const MASK: u64 = (1 << BLOCK_SIZE) - 1;

/// Encode a row id into its alias.
pub fn encode(row_id: u64) -> String {
    let mut value = shuffle(row_id);
    // 31^13 > u64::MAX, so thirteen digits always suffice.
    let mut digits = Vec::with_capacity(13);
    while value > 0 {
        digits.push(ALPHABET[(value % BASE) as usize]);
        value /= BASE;
    }
    while digits.len() < MIN_LENGTH {
        digits.push(ALPHABET[0]);
    }
    digits.reverse();
    // Infallible: every byte comes from the ASCII alphabet.
    String::from_utf8(digits).unwrap_or_default()
}

/// Decode an alias back into the row id it was generated from.
///
/// Only canonical aliases (exactly what [`encode`] produces) are accepted;
/// anything else returns [`InvalidAlias`](ErrorKind::InvalidAlias).
pub fn decode(alias: &str) -> Result<u64> {
    let invalid = || ErrorKind::InvalidAlias(alias.to_string());
    if alias.is_empty() {
        exn::bail!(invalid());
    }
    let mut value: u64 = 0;
    for byte in alias.bytes() {
        let Some(digit) = ALPHABET.iter().position(|&c| c == byte) else {
            exn::bail!(invalid());
        };
        value = match value.checked_mul(BASE).and_then(|v| v.checked_add(digit as u64)) {
            Some(v) => v,
            None => exn::bail!(invalid()),
        };
    }
    let row_id = shuffle(value);
    // Extra zero-padding would otherwise decode to the same row id.
    if encode(row_id) != alias {
        exn::bail!(invalid());
    }
    Ok(row_id)
}

/// The shard an alias belongs to (its first character).
pub fn shard(alias: &str) -> Option<char> {
    alias.chars().next()
}

/// Reverse the bits inside the block. Self-inverse.
fn shuffle(n: u64) -> u64 {
    let low = n & MASK;
    let reversed = low.reverse_bits() >> (u64::BITS - BLOCK_SIZE);
    (n & !MASK) | reversed
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;

    #[rstest]
    #[case(0, "mmmmm")]
    #[case(8, "n242n")]
    fn test_known_aliases(#[case] row_id: u64, #[case] expected: &str) {
        assert_eq!(encode(row_id), expected);
        assert_eq!(decode(expected).unwrap(), row_id);
    }

    #[test]
    fn test_shuffle_is_self_inverse() {
        for n in [0, 1, 2, 8, MASK, MASK + 1, u64::MAX, 0xDEAD_BEEF_CAFE] {
            assert_eq!(shuffle(shuffle(n)), n);
        }
    }

    #[test]
    fn test_roundtrip_and_uniqueness() {
        let mut seen = HashSet::new();
        let samples = (1..5_000u64)
            .chain((MASK - 100)..(MASK + 100))
            .chain([u64::MAX, u64::MAX - 1, 1 << 40, (1 << 63) + 7]);
        for row_id in samples {
            let alias = encode(row_id);
            assert!(alias.len() >= MIN_LENGTH);
            assert!(alias.len() <= 13);
            assert_eq!(decode(&alias).unwrap(), row_id, "alias {alias}");
            assert!(seen.insert(alias), "collision for row id {row_id}");
        }
    }

    #[rstest]
    #[case("")]
    #[case("n242N")]
    #[case("abc!e")]
    #[case("n 42n")]
    // Non-canonical padding of a valid alias.
    #[case("mn242n")]
    // Far beyond u64::MAX.
    #[case("qqqqqqqqqqqqqqqqqqqq")]
    fn test_invalid_aliases(#[case] alias: &str) {
        let err = decode(alias).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidAlias(a) if a == alias));
    }

    #[test]
    fn test_shard() {
        assert_eq!(shard("n242n"), Some('n'));
        assert_eq!(shard(""), None);
    }
}
