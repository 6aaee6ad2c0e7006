//! Integer division by runtime-constant divisors via multiply and shift.
//!
//! A magic value packs the multiplier `m` into the low 32 bits and the
//! shift `p` into the high 32 bits. For a power-of-two divisor `m` is 0
//! and the division is a plain right shift by `p`. Otherwise
//! `x / d == (x * m) >> p` for every numerator `x < 2^31`.

/// Largest numerator the magic values are valid for.
pub const MAX_NUMERATOR: u32 = (1 << 31) - 1;

/// Compute the packed magic value for divisor `d` (`d > 0`).
pub fn idiv_magic(d: u32) -> u64 {
    debug_assert!(d > 0);
    if d.is_power_of_two() {
        return (d.trailing_zeros() as u64) << 32;
    }
    let (m, p) = magicgu(MAX_NUMERATOR as u64, d as u64);
    (m & 0xFFFF_FFFF) | (p << 32)
}

/// Unsigned magic number search for numerators in `[0, nmax]`.
fn magicgu(nmax: u64, d: u64) -> (u64, u64) {
    let nc = ((nmax + 1) / d) * d - 1;
    let nbits = 64 - nmax.leading_zeros() as u64;
    for p in 0..=2 * nbits {
        let two_p: u128 = 1u128 << p;
        let rem = (two_p - 1) % d as u128;
        if two_p > nc as u128 * (d as u128 - 1 - rem) {
            let m = (two_p + d as u128 - 1 - rem) / d as u128;
            return (m as u64, p);
        }
    }
    // Unreachable for d <= nmax: p == nbits + log2(d) always satisfies the bound.
    (0, 0)
}

/// Split a packed magic value into `(m, p)`.
pub fn unpack(magic: u64) -> (u64, u32) {
    (magic & 0xFFFF_FFFF, (magic >> 32) as u32)
}

/// Quotient of `x` by the divisor that produced `magic`.
pub fn div_by_magic(x: u32, magic: u64) -> u32 {
    let (m, p) = unpack(magic);
    if m == 0 {
        return x >> p;
    }
    ((x as u64 * m) >> p) as u32
}

/// A divisor bundled with its magic value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FastDiv {
    pub divisor: u32,
    pub magic: u64,
}

impl FastDiv {
    pub fn new(divisor: u32) -> Self {
        Self {
            divisor,
            magic: idiv_magic(divisor),
        }
    }

    pub fn div(&self, x: u32) -> u32 {
        div_by_magic(x, self.magic)
    }

    pub fn rem(&self, x: u32) -> u32 {
        x - self.div(x) * self.divisor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_power_of_two_is_shift() {
        assert_eq!(idiv_magic(1), 0);
        assert_eq!(idiv_magic(16), 4 << 32);
        assert_eq!(FastDiv::new(16).div(100), 6);
        assert_eq!(FastDiv::new(16).rem(100), 4);
    }

    #[test]
    fn test_small_divisors_exhaustive_prefix() {
        for d in 1..64u32 {
            let fd = FastDiv::new(d);
            for x in 0..4096u32 {
                assert_eq!(fd.div(x), x / d, "x={} d={}", x, d);
                assert_eq!(fd.rem(x), x % d, "x={} d={}", x, d);
            }
        }
    }

    #[test]
    fn test_max_numerator() {
        for d in [3u32, 7, 10, 641, 65537, MAX_NUMERATOR] {
            let fd = FastDiv::new(d);
            assert_eq!(fd.div(MAX_NUMERATOR), MAX_NUMERATOR / d);
        }
    }

    proptest! {
        #[test]
        fn prop_fast_division_matches(x in 0..=MAX_NUMERATOR, d in 1..=MAX_NUMERATOR) {
            let fd = FastDiv::new(d);
            prop_assert_eq!(fd.div(x), x / d);
            prop_assert_eq!(fd.rem(x), x % d);
        }
    }
}
