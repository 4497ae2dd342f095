//! Additional helpers shared across the crate.

/// Rounds a byte count up to the next multiple of 4.
///
/// Record payloads and strings are stored padded to whole 32-bit words.
pub fn round_up_4(n: u32) -> u32 {
    (n + 3) & !3
}

#[test]
fn test_round_up_4() {
    assert_eq!(round_up_4(0), 0);
    assert_eq!(round_up_4(1), 4);
    assert_eq!(round_up_4(3), 4);
    assert_eq!(round_up_4(4), 4);
    assert_eq!(round_up_4(5), 8);
    assert_eq!(round_up_4(12), 12);
}
