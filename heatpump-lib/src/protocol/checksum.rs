//! Additive checksum shared by both buses: the last byte of a frame makes
//! the sum of all its bytes zero modulo 256.

fn sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |x, y| x.wrapping_add(*y))
}

/// Checksum byte to append after `command`.
pub fn checksum(command: &[u8]) -> u8 {
    (sum(command) ^ 0xFF).wrapping_add(1)
}

/// All received bytes including the checksum must add up to zero.
pub fn validate(frame: &[u8]) -> bool {
    !frame.is_empty() && sum(frame) == 0
}

pub fn with_checksum(command: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(command.len() + 1);
    frame.extend_from_slice(command);
    frame.push(checksum(command));
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::queries;

    #[test]
    fn test_known_frame() {
        // 0x71 + 0x02 + 0xAA + 0xBB = 0x1D8
        assert_eq!(checksum(&[0x71, 0x02, 0xAA, 0xBB]), 0x28);
        assert!(validate(&[0x71, 0x02, 0xAA, 0xBB, 0x28]));
        assert!(!validate(&[0x71, 0x02, 0xAA, 0xBB, 0x27]));
    }

    #[test]
    fn test_zero_sum_command() {
        assert_eq!(checksum(&[0x80, 0x80]), 0x00);
        assert!(validate(&[0x80, 0x80, 0x00]));
    }

    #[test]
    fn test_empty_is_invalid() {
        assert!(!validate(&[]));
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let frame = with_checksum(&queries::data_query(crate::protocol::SELECTOR_DATA));
        assert!(validate(&frame));

        for index in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[index] ^= 1 << bit;
                assert!(
                    !validate(&corrupted),
                    "flip of bit {} in byte {} went unnoticed",
                    bit,
                    index
                );
            }
        }
    }
}
