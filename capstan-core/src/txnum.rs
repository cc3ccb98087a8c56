//! The composite 64-bit transaction order key.
//!
//! Every anchor record is keyed by `(block_height << 24) | tx_index`.
//! The low 24 bits hold the transaction's position within its block,
//! the remaining 40 bits hold the block height, so numeric order on the
//! key is exactly chain order.

use crate::error::{Error, Result};

/// Number of bits reserved for the in-block transaction index.
pub const INDEX_BITS: u32 = 24;

/// Largest representable in-block transaction index (16,777,215).
pub const MAX_INDEX_IN_BLOCK: u32 = (1 << INDEX_BITS) - 1;

/// Largest representable block height (2^40 - 1).
pub const MAX_BLOCK_HEIGHT: u64 = (1 << 40) - 1;

/// Build a transaction number from a block height and in-block index.
pub fn construct(block_height: u64, tx_index: u32) -> Result<u64> {
    if tx_index > MAX_INDEX_IN_BLOCK {
        return Err(Error::invariant(format!(
            "transaction index {} exceeds 24-bit maximum {}",
            tx_index, MAX_INDEX_IN_BLOCK
        )));
    }
    if block_height > MAX_BLOCK_HEIGHT {
        return Err(Error::invariant(format!(
            "block height {} exceeds 40-bit maximum {}",
            block_height, MAX_BLOCK_HEIGHT
        )));
    }
    Ok((block_height << INDEX_BITS) | u64::from(tx_index))
}

/// The block height encoded in a transaction number.
pub fn block_of(transaction_number: u64) -> u64 {
    transaction_number >> INDEX_BITS
}

/// The in-block index encoded in a transaction number.
pub fn index_of(transaction_number: u64) -> u32 {
    (transaction_number & u64::from(MAX_INDEX_IN_BLOCK)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_construct_roundtrip() {
        let n = construct(101, 2).unwrap();
        assert_eq!(n, (101 << 24) + 2);
        assert_eq!(block_of(n), 101);
        assert_eq!(index_of(n), 2);
    }

    #[test]
    fn test_index_bounds() {
        // Both ends of the 24-bit range are accepted.
        assert!(construct(5, 0).is_ok());
        let n = construct(5, MAX_INDEX_IN_BLOCK).unwrap();
        assert_eq!(index_of(n), MAX_INDEX_IN_BLOCK);

        // One past the end is rejected.
        assert!(construct(5, MAX_INDEX_IN_BLOCK + 1).is_err());
    }

    #[test]
    fn test_height_bounds() {
        assert!(construct(MAX_BLOCK_HEIGHT, 0).is_ok());
        assert!(construct(MAX_BLOCK_HEIGHT + 1, 0).is_err());
    }

    #[test]
    fn test_ordering_matches_chain_order() {
        let a = construct(100, 5).unwrap();
        let b = construct(100, 6).unwrap();
        let c = construct(101, 0).unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    proptest! {
        #[test]
        fn prop_roundtrip(height in 0u64..=MAX_BLOCK_HEIGHT, index in 0u32..=MAX_INDEX_IN_BLOCK) {
            let n = construct(height, index).unwrap();
            prop_assert_eq!(block_of(n), height);
            prop_assert_eq!(index_of(n), index);
        }

        #[test]
        fn prop_order_preserved(
            h1 in 0u64..=MAX_BLOCK_HEIGHT,
            i1 in 0u32..=MAX_INDEX_IN_BLOCK,
            h2 in 0u64..=MAX_BLOCK_HEIGHT,
            i2 in 0u32..=MAX_INDEX_IN_BLOCK,
        ) {
            let a = construct(h1, i1).unwrap();
            let b = construct(h2, i2).unwrap();
            prop_assert_eq!(a < b, (h1, i1) < (h2, i2));
        }
    }
}
