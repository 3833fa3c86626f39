//! Decimal arithmetic context
//!
//! Every estimate in the simulator is a [`Decimal`]. All arithmetic goes
//! through a [`MathContext`] so that results are rounded to the same number
//! of significant digits with the same rounding mode on every node, which
//! keeps repetitions with the same seed bit-for-bit identical.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{ArithResult, ArithmeticError};

/// Largest number of significant digits a [`Decimal`] mantissa can hold
pub const MAX_PRECISION: u32 = 28;

/// Rounding mode applied after every operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Rounding {
    /// Round to nearest, ties to the even neighbor
    #[default]
    HalfEven,
    /// Round to nearest, ties away from zero
    HalfUp,
    /// Round to nearest, ties toward zero
    HalfDown,
    /// Away from zero
    Up,
    /// Toward zero
    Down,
    /// Toward positive infinity
    Ceiling,
    /// Toward negative infinity
    Floor,
}

impl Rounding {
    fn strategy(self) -> RoundingStrategy {
        match self {
            Rounding::HalfEven => RoundingStrategy::MidpointNearestEven,
            Rounding::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            Rounding::HalfDown => RoundingStrategy::MidpointTowardZero,
            Rounding::Up => RoundingStrategy::AwayFromZero,
            Rounding::Down => RoundingStrategy::ToZero,
            Rounding::Ceiling => RoundingStrategy::ToPositiveInfinity,
            Rounding::Floor => RoundingStrategy::ToNegativeInfinity,
        }
    }
}

impl FromStr for Rounding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "HALF_EVEN" => Ok(Rounding::HalfEven),
            "HALF_UP" => Ok(Rounding::HalfUp),
            "HALF_DOWN" => Ok(Rounding::HalfDown),
            "UP" => Ok(Rounding::Up),
            "DOWN" => Ok(Rounding::Down),
            "CEILING" => Ok(Rounding::Ceiling),
            "FLOOR" => Ok(Rounding::Floor),
            other => Err(format!("unknown rounding mode {other}")),
        }
    }
}

impl fmt::Display for Rounding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rounding::HalfEven => "HALF_EVEN",
            Rounding::HalfUp => "HALF_UP",
            Rounding::HalfDown => "HALF_DOWN",
            Rounding::Up => "UP",
            Rounding::Down => "DOWN",
            Rounding::Ceiling => "CEILING",
            Rounding::Floor => "FLOOR",
        };
        f.write_str(name)
    }
}

/// Precision and rounding shared by all nodes of one repetition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MathContext {
    precision: u32,
    rounding: Rounding,
}

impl Default for MathContext {
    fn default() -> Self {
        MathContext {
            precision: MAX_PRECISION,
            rounding: Rounding::HalfEven,
        }
    }
}

impl MathContext {
    /// Create a context. Precision is clamped to `1..=MAX_PRECISION`.
    pub fn new(precision: u32, rounding: Rounding) -> Self {
        MathContext {
            precision: precision.clamp(1, MAX_PRECISION),
            rounding,
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn rounding(&self) -> Rounding {
        self.rounding
    }

    /// Round a value to this context's significant digits
    pub fn round(&self, value: Decimal) -> Decimal {
        value
            .round_sf_with_strategy(self.precision, self.rounding.strategy())
            .unwrap_or(value)
            .normalize()
    }

    pub fn add(&self, a: Decimal, b: Decimal) -> ArithResult<Decimal> {
        a.checked_add(b)
            .map(|v| self.round(v))
            .ok_or(ArithmeticError::Overflow)
    }

    pub fn sub(&self, a: Decimal, b: Decimal) -> ArithResult<Decimal> {
        a.checked_sub(b)
            .map(|v| self.round(v))
            .ok_or(ArithmeticError::Overflow)
    }

    pub fn mul(&self, a: Decimal, b: Decimal) -> ArithResult<Decimal> {
        a.checked_mul(b)
            .map(|v| self.round(v))
            .ok_or(ArithmeticError::Overflow)
    }

    pub fn div(&self, a: Decimal, b: Decimal) -> ArithResult<Decimal> {
        if b.is_zero() {
            return Err(ArithmeticError::DivisionByZero);
        }
        a.checked_div(b)
            .map(|v| self.round(v))
            .ok_or(ArithmeticError::Overflow)
    }

    /// Sum of all values, rounding after each addition
    pub fn sum<'a, I>(&self, values: I) -> ArithResult<Decimal>
    where
        I: IntoIterator<Item = &'a Decimal>,
    {
        values
            .into_iter()
            .try_fold(Decimal::ZERO, |acc, v| self.add(acc, *v))
    }

    /// Arithmetic mean. Division by zero for an empty input.
    pub fn mean(&self, values: &[Decimal]) -> ArithResult<Decimal> {
        let total = self.sum(values)?;
        self.div(total, Decimal::from(values.len() as u64))
    }

    /// Convert a sampled float into a context-rounded decimal
    pub fn from_f64(&self, value: f64) -> ArithResult<Decimal> {
        if !value.is_finite() {
            return Err(ArithmeticError::NotFinite);
        }
        Decimal::from_f64(value)
            .map(|v| self.round(v))
            .ok_or(ArithmeticError::Overflow)
    }
}

/// Lossy conversion for statistics and plotting
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_division_rounds_to_precision() {
        let mc = MathContext::new(5, Rounding::HalfEven);
        let third = mc.div(Decimal::ONE, dec("3")).unwrap();
        assert_eq!(third, dec("0.33333"));

        let two_thirds = mc.div(dec("2"), dec("3")).unwrap();
        assert_eq!(two_thirds, dec("0.66667"));
    }

    #[test]
    fn test_rounding_modes() {
        let value = dec("2.5");
        assert_eq!(MathContext::new(1, Rounding::HalfEven).round(value), dec("2"));
        assert_eq!(MathContext::new(1, Rounding::HalfUp).round(value), dec("3"));
        assert_eq!(MathContext::new(1, Rounding::Down).round(value), dec("2"));
        assert_eq!(MathContext::new(1, Rounding::Ceiling).round(value), dec("3"));
        assert_eq!(MathContext::new(1, Rounding::Floor).round(dec("-2.5")), dec("-3"));
    }

    #[test]
    fn test_division_by_zero() {
        let mc = MathContext::default();
        assert_eq!(
            mc.div(Decimal::ONE, Decimal::ZERO),
            Err(ArithmeticError::DivisionByZero)
        );
    }

    #[test]
    fn test_mean() {
        let mc = MathContext::default();
        let mean = mc.mean(&[dec("10"), dec("20")]).unwrap();
        assert_eq!(mean, dec("15"));
        assert!(mc.mean(&[]).is_err());
    }

    #[test]
    fn test_from_f64_rejects_nan() {
        let mc = MathContext::default();
        assert_eq!(mc.from_f64(f64::NAN), Err(ArithmeticError::NotFinite));
        assert_eq!(mc.from_f64(1.5).unwrap(), dec("1.5"));
    }

    #[test]
    fn test_rounding_parse() {
        assert_eq!("half_up".parse::<Rounding>().unwrap(), Rounding::HalfUp);
        assert_eq!("HALF-EVEN".parse::<Rounding>().unwrap(), Rounding::HalfEven);
        assert!("sideways".parse::<Rounding>().is_err());
    }

    #[test]
    fn test_precision_clamped() {
        assert_eq!(MathContext::new(0, Rounding::Up).precision(), 1);
        assert_eq!(MathContext::new(99, Rounding::Up).precision(), MAX_PRECISION);
    }

    proptest::proptest! {
        #[test]
        fn prop_round_is_idempotent(
            mantissa in any::<i64>(),
            scale in 0u32..20,
            precision in 1u32..=MAX_PRECISION,
        ) {
            let mc = MathContext::new(precision, Rounding::HalfEven);
            let once = mc.round(Decimal::new(mantissa, scale));
            prop_assert_eq!(mc.round(once), once);
        }

        #[test]
        fn prop_division_undoes_multiplication(a in -1_000_000i64..1_000_000, b in 1i64..1000) {
            let mc = MathContext::default();
            let product = mc.mul(Decimal::from(a), Decimal::from(b)).unwrap();
            prop_assert_eq!(mc.div(product, Decimal::from(b)).unwrap(), Decimal::from(a));
        }
    }
}
