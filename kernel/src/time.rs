// =============================================================================
// Ferrite OS — Binary Fixed-Point Time
// =============================================================================
//
// Timestamps and periods are (seconds, fraction) pairs where the fraction
// counts 2^-64 second units. The format has two properties the timekeeping
// core depends on:
//   - scaling by an integer tick count is exact up to the carry into the
//     seconds field (one widening multiply, no divisions on hot paths);
//   - comparison is plain lexicographic ordering on (sec, frac).
//
// One counter tick at frequency F is `BinTime::from_hz(F)`; N ticks is
// `from_hz(F).scale(N)`. That is the whole conversion pipeline between the
// PIT's tick counts and absolute time.
// =============================================================================

use core::ops::{Add, AddAssign};

/// A point in (or span of) time: whole seconds plus a 64-bit binary
/// fraction of a second.
///
/// Field order gives the derived `Ord` the lexicographic (sec, frac)
/// comparison the rest of the kernel relies on.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct BinTime {
    /// Whole seconds.
    pub sec: u64,
    /// Fraction of a second in 2^-64 s units.
    pub frac: u64,
}

impl BinTime {
    pub const ZERO: BinTime = BinTime { sec: 0, frac: 0 };

    /// A span of whole seconds.
    pub const fn from_sec(sec: u64) -> BinTime {
        BinTime { sec, frac: 0 }
    }

    /// The period of one cycle at `hz` cycles per second, rounded up so
    /// that `hz` periods never sum to less than one second.
    ///
    /// Panics if `hz` is zero.
    pub const fn from_hz(hz: u32) -> BinTime {
        assert!(hz > 0, "frequency must be non-zero");
        if hz == 1 {
            BinTime { sec: 1, frac: 0 }
        } else {
            BinTime {
                sec: 0,
                frac: u64::MAX / hz as u64 + 1,
            }
        }
    }

    /// This span multiplied by an integer count.
    ///
    /// The fraction product is computed with 128-bit intermediates; the
    /// high half carries into the seconds field.
    pub const fn scale(self, count: u64) -> BinTime {
        let product = self.frac as u128 * count as u128;
        BinTime {
            sec: self.sec * count + (product >> 64) as u64,
            frac: product as u64,
        }
    }
}

impl Add for BinTime {
    type Output = BinTime;

    fn add(self, rhs: BinTime) -> BinTime {
        let (frac, carry) = self.frac.overflowing_add(rhs.frac);
        BinTime {
            sec: self.sec + rhs.sec + carry as u64,
            frac,
        }
    }
}

impl AddAssign for BinTime {
    fn add_assign(&mut self, rhs: BinTime) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hz_periods_sum_to_one_second() {
        // Power-of-two frequency: exact.
        let tick = BinTime::from_hz(65536);
        assert_eq!(tick.scale(65536), BinTime::from_sec(1));

        // The PIT's real frequency: rounds up into the second by strictly
        // less than one period.
        let tick = BinTime::from_hz(1_193_182);
        let second = tick.scale(1_193_182);
        assert_eq!(second.sec, 1);
        assert!(second.frac < tick.frac);
    }

    #[test]
    fn scale_carries_into_seconds() {
        let half = BinTime {
            sec: 0,
            frac: 1 << 63,
        };
        assert_eq!(half.scale(4), BinTime::from_sec(2));
        assert_eq!(
            half.scale(3),
            BinTime {
                sec: 1,
                frac: 1 << 63
            }
        );
    }

    #[test]
    fn ordering_is_lexicographic() {
        let just_under_one = BinTime {
            sec: 0,
            frac: u64::MAX,
        };
        assert!(just_under_one < BinTime::from_sec(1));
        assert!(BinTime::from_sec(1) < BinTime { sec: 1, frac: 1 });
    }

    #[test]
    fn addition_carries() {
        let a = BinTime {
            sec: 1,
            frac: u64::MAX,
        };
        let b = BinTime { sec: 0, frac: 1 };
        assert_eq!(a + b, BinTime::from_sec(2));
    }

    #[test]
    fn one_hertz_is_one_second() {
        assert_eq!(BinTime::from_hz(1), BinTime::from_sec(1));
    }
}
