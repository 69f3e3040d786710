//! 32-bit wrapping sequence numbers.
//!
//! The wire carries sequence numbers in 32 bits, but the protocol reasons
//! about 64-bit absolute byte indices. `Wrap32` maps between the two: `wrap`
//! folds an absolute index onto the wire space relative to a zero point (the
//! ISN), and `unwrap` recovers the absolute index closest to a caller-supplied
//! checkpoint. With windows far below 2^31 the nearest candidate is
//! unambiguous.

use std::fmt;
use std::ops::Add;

const TWO_POW_32: u64 = 1 << 32;

/// A 32-bit sequence number relative to an implicit zero point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Wrap32(u32);

impl Wrap32 {
    /// Construct from a raw wire value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw wire value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Wrap an absolute sequence number onto the 32-bit wire space.
    pub fn wrap(n: u64, zero: Wrap32) -> Wrap32 {
        Wrap32(zero.0.wrapping_add(n as u32))
    }

    /// Recover the absolute sequence number closest to `checkpoint`.
    ///
    /// Among all absolute values that wrap to `self` under `zero`, returns the
    /// one minimizing the distance to `checkpoint`; an exact tie prefers the
    /// smaller value.
    pub fn unwrap(self, zero: Wrap32, checkpoint: u64) -> u64 {
        let offset = self.0.wrapping_sub(zero.0) as u64;
        if checkpoint <= offset {
            // Candidates below `offset` would be negative.
            return offset;
        }

        // Bracket the checkpoint between the candidate at or below it and the
        // next one up, then pick the nearer (tie toward the smaller).
        let below = offset + (checkpoint - offset) / TWO_POW_32 * TWO_POW_32;
        let above = below + TWO_POW_32;
        if checkpoint - below <= above - checkpoint {
            below
        } else {
            above
        }
    }
}

impl Add<u32> for Wrap32 {
    type Output = Wrap32;

    fn add(self, n: u32) -> Wrap32 {
        Wrap32(self.0.wrapping_add(n))
    }
}

impl fmt::Display for Wrap32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
