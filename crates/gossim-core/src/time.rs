//! Simulated time
//!
//! The global clock is a monotonically increasing tick counter owned by the
//! engine. Nothing here relates to wall-clock time.

use std::fmt;
use std::ops::{Add, Sub};

/// A point in simulated time, in ticks since the start of a repetition
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);
    pub const MAX: Tick = Tick(u64::MAX);

    #[inline]
    pub fn new(tick: u64) -> Self {
        Tick(tick)
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Ticks elapsed since `earlier`, zero if `earlier` is in the future
    #[inline]
    pub fn since(self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[inline]
    pub fn saturating_add(self, ticks: u64) -> Self {
        Tick(self.0.saturating_add(ticks))
    }

    /// The following tick
    #[inline]
    pub fn next(self) -> Self {
        self.saturating_add(1)
    }
}

/// Saturates at [`Tick::MAX`]; simulated time never wraps
impl Add<u64> for Tick {
    type Output = Tick;

    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub for Tick {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: Tick) -> Self::Output {
        self.0 - rhs.0
    }
}

impl fmt::Debug for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tick({})", self.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_arithmetic() {
        let t = Tick::new(10);
        assert_eq!(t + 5, Tick(15));
        assert_eq!(Tick(15) - t, 5);
        assert_eq!(t.next(), Tick(11));
    }

    #[test]
    fn test_tick_since_saturates() {
        assert_eq!(Tick(3).since(Tick(10)), 0);
        assert_eq!(Tick(10).since(Tick(3)), 7);
        assert_eq!(Tick::MAX.saturating_add(1), Tick::MAX);
        assert_eq!(Tick(5) + u64::MAX, Tick::MAX);
    }
}
