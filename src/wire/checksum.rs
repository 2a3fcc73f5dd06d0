// Packet checksum: weighted sum over 16-bit little-endian words

/// Low 28 bits of the first header word hold the checksum.
pub const NCMD_CHECKSUM: u32 = 0x0fff_ffff;

const CHECKSUM_SEED: u32 = 0x0123_4567;

/// Checksum over every byte that follows the checksum/flags word.
///
/// Not cryptographic. A single changed byte always changes the result as
/// long as the data is shorter than 2^13 words, which covers `MAX_MSGLEN`.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut sum = CHECKSUM_SEED;
    for (i, chunk) in data.chunks(2).enumerate() {
        let word = match *chunk {
            [lo, hi] => u16::from_le_bytes([lo, hi]),
            [lo] => u16::from(lo),
            _ => 0,
        };
        sum = sum.wrapping_add(u32::from(word).wrapping_mul(i as u32 + 1));
    }
    sum & NCMD_CHECKSUM
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_payload_is_seed() {
        assert_eq!(compute_checksum(&[]), CHECKSUM_SEED & NCMD_CHECKSUM);
    }

    #[test]
    fn test_odd_length_is_zero_padded() {
        assert_eq!(compute_checksum(&[1, 2, 3]), compute_checksum(&[1, 2, 3, 0]));
    }

    #[test]
    fn test_top_bits_free_for_flags() {
        let data = vec![0xffu8; 4096];
        assert_eq!(compute_checksum(&data) & !NCMD_CHECKSUM, 0);
    }

    proptest! {
        #[test]
        fn checksum_detects_single_byte_change(
            data in proptest::collection::vec(any::<u8>(), 1..1024),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut corrupted = data.clone();
            let i = index.index(corrupted.len());
            corrupted[i] ^= flip;
            prop_assert_ne!(compute_checksum(&data), compute_checksum(&corrupted));
        }
    }
}
