const TAB64: [u32; 64] = [
    63, 0, 58, 1, 59, 47, 53, 2, 60, 39, 48, 27, 54, 33, 42, 3, 61, 51, 37, 40, 49, 18, 28, 20, 55,
    30, 34, 11, 43, 14, 22, 4, 62, 57, 46, 52, 38, 26, 32, 41, 50, 36, 17, 19, 29, 10, 13, 21, 56,
    45, 25, 31, 35, 16, 9, 12, 44, 24, 15, 8, 23, 7, 6, 5,
];

/// `floor(log2(value))` via de Bruijn multiplication; `value` must be > 0.
pub fn fast_log2_64(mut value: u64) -> u32 {
    debug_assert!(value > 0);

    value |= value >> 1;
    value |= value >> 2;
    value |= value >> 4;
    value |= value >> 8;
    value |= value >> 16;
    value |= value >> 32;

    TAB64[(((value - (value >> 1)).wrapping_mul(0x07EDD5E59A4E28C2)) >> 58) as usize]
}

/// `ceil(log2(value))`; `value` must be > 0.
pub fn ceil_log2(value: u64) -> u32 {
    let log = fast_log2_64(value);

    if (1u64 << log) < value {
        log + 1
    } else {
        log
    }
}

/// The smallest power of two >= `value`; saturates at `u64::MAX`.
pub fn ceil_pow2(value: u64) -> u64 {
    match 1u64.checked_shl(ceil_log2(value)) {
        Some(pow) => pow,
        None => u64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use crate::utils::math::{ceil_log2, ceil_pow2, fast_log2_64};

    #[test]
    fn fast_log2_works_fine() {
        assert_eq!(fast_log2_64(1), 0);
        assert_eq!(fast_log2_64(2), 1);
        assert_eq!(fast_log2_64(3), 1);
        assert_eq!(fast_log2_64(4), 2);
        assert_eq!(fast_log2_64(1024), 10);
        assert_eq!(fast_log2_64(1025), 10);
        assert_eq!(fast_log2_64(u64::MAX), 63);
    }

    #[test]
    fn ceil_log2_works_fine() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(16), 4);
        assert_eq!(ceil_log2(17), 5);
        assert_eq!(ceil_log2(1025), 11);
    }

    #[test]
    fn ceil_pow2_works_fine() {
        assert_eq!(ceil_pow2(1), 1);
        assert_eq!(ceil_pow2(5), 8);
        assert_eq!(ceil_pow2(16), 16);
        assert_eq!(ceil_pow2(1025), 2048);
        assert_eq!(ceil_pow2(1 << 63), 1 << 63);
        assert_eq!(ceil_pow2((1 << 63) + 1), u64::MAX);
    }
}
