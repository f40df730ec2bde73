//! Arbitrary-precision numeric payload for compile-time values. Integers are
//! exact at any width; floats are kept as f64 the whole way through. Every
//! operation that can fail reports how instead of saturating, and the fit
//! predicate is the single place that decides whether a value is
//! representable in a sized runtime type.

use std::cmp::Ordering;

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive, Zero};

#[derive(Debug, Clone, PartialEq)]
pub enum BigNum {
    Int(BigInt),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BigNumError {
    DivisionByZero,
    /// Shift amount (or repetition count) does not fit in a machine word
    ShiftOutOfRange,
    /// Operation is not defined for this operand mix (e.g. `^` on floats)
    IncompatibleOperands,
}

pub type BigNumResult = Result<BigNum, BigNumError>;

impl BigNum {
    pub fn from_u64(value: u64) -> Self {
        Self::Int(BigInt::from(value))
    }

    pub fn from_i64(value: i64) -> Self {
        Self::Int(BigInt::from(value))
    }

    pub fn from_usize(value: usize) -> Self {
        Self::Int(BigInt::from(value))
    }

    pub fn from_f64(value: f64) -> Self {
        Self::Float(value)
    }

    pub fn zero() -> Self {
        Self::Int(BigInt::zero())
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Self::Int(i) => i.is_zero(),
            Self::Float(f) => *f == 0.0,
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Self::Int(i) => i.is_negative(),
            Self::Float(f) => *f < 0.0,
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        match self {
            Self::Int(i) => i.to_u64(),
            Self::Float(_) => None,
        }
    }

    pub fn to_usize(&self) -> Option<usize> {
        match self {
            Self::Int(i) => i.to_usize(),
            Self::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(i) => i.to_f64().unwrap_or(f64::INFINITY),
            Self::Float(f) => *f,
        }
    }

    /// Lossy float-to-int truncation used by explicit casts
    pub fn truncate_to_int(&self) -> BigNum {
        match self {
            Self::Int(i) => Self::Int(i.clone()),
            Self::Float(f) => Self::Int(BigInt::from(f.trunc() as i128)),
        }
    }

    /// Exact int-to-float promotion used by explicit casts and mixed literals
    pub fn promote_to_float(&self) -> BigNum {
        Self::Float(self.as_f64())
    }

    pub fn negate(&self) -> BigNum {
        match self {
            Self::Int(i) => Self::Int(-i),
            Self::Float(f) => Self::Float(-f),
        }
    }

    pub fn bit_not_in_width(&self, bits: u32, signed: bool) -> BigNumResult {
        match self {
            Self::Int(i) => {
                let flipped = -i - 1;
                Ok(Self::Int(flipped).wrapped_to_bits(bits, signed))
            }
            Self::Float(_) => Err(BigNumError::IncompatibleOperands),
        }
    }

    pub fn add(&self, other: &BigNum) -> BigNumResult {
        self.arith(other, |a, b| a + b, |a, b| a + b)
    }

    pub fn sub(&self, other: &BigNum) -> BigNumResult {
        self.arith(other, |a, b| a - b, |a, b| a - b)
    }

    pub fn mul(&self, other: &BigNum) -> BigNumResult {
        self.arith(other, |a, b| a * b, |a, b| a * b)
    }

    pub fn div(&self, other: &BigNum) -> BigNumResult {
        if other.is_zero() {
            return Err(BigNumError::DivisionByZero);
        }
        self.arith(other, |a, b| a / b, |a, b| a / b)
    }

    pub fn rem(&self, other: &BigNum) -> BigNumResult {
        if other.is_zero() {
            return Err(BigNumError::DivisionByZero);
        }
        self.arith(other, |a, b| a % b, |a, b| a % b)
    }

    pub fn shl(&self, other: &BigNum) -> BigNumResult {
        let (a, b) = self.int_pair(other)?;
        let amount = b.to_u32().ok_or(BigNumError::ShiftOutOfRange)?;
        Ok(Self::Int(a << amount))
    }

    pub fn shr(&self, other: &BigNum) -> BigNumResult {
        let (a, b) = self.int_pair(other)?;
        let amount = b.to_u32().ok_or(BigNumError::ShiftOutOfRange)?;
        Ok(Self::Int(a >> amount))
    }

    pub fn bit_and(&self, other: &BigNum) -> BigNumResult {
        let (a, b) = self.int_pair(other)?;
        Ok(Self::Int(a & b))
    }

    pub fn bit_or(&self, other: &BigNum) -> BigNumResult {
        let (a, b) = self.int_pair(other)?;
        Ok(Self::Int(a | b))
    }

    pub fn bit_xor(&self, other: &BigNum) -> BigNumResult {
        let (a, b) = self.int_pair(other)?;
        Ok(Self::Int(a ^ b))
    }

    /// Two's-complement truncation to `bits`. Wrapping arithmetic is an
    /// ordinary exact operation followed by this.
    pub fn wrapped_to_bits(&self, bits: u32, signed: bool) -> BigNum {
        let Self::Int(i) = self else {
            return self.clone();
        };

        let modulus = BigInt::from(1) << bits;
        let mut wrapped = i % &modulus;
        if wrapped.sign() == Sign::Minus {
            wrapped += &modulus;
        }

        if signed {
            let half = BigInt::from(1) << (bits - 1);
            if wrapped >= half {
                wrapped -= &modulus;
            }
        }

        Self::Int(wrapped)
    }

    /// Whether the exact value is representable in a sized type of `bits`
    /// bits with the given signedness. Floats fit only when finite.
    pub fn fits_in_bits(&self, bits: u32, signed: bool) -> bool {
        match self {
            Self::Float(f) => f.is_finite(),
            Self::Int(i) => {
                if bits == 0 {
                    return i.is_zero();
                }
                if signed {
                    let max = (BigInt::from(1) << (bits - 1)) - 1;
                    let min = -(BigInt::from(1) << (bits - 1));
                    *i >= min && *i <= max
                } else {
                    if i.is_negative() {
                        return false;
                    }
                    let max = (BigInt::from(1) << bits) - 1;
                    *i <= max
                }
            }
        }
    }

    /// Number of leading zeros within a `bits`-wide representation
    pub fn leading_zeros(&self, bits: u32) -> Option<u64> {
        match self {
            Self::Int(i) if !i.is_negative() => Some(bits as u64 - i.bits()),
            _ => None,
        }
    }

    /// Number of trailing zeros within a `bits`-wide representation
    pub fn trailing_zeros(&self, bits: u32) -> Option<u64> {
        match self {
            Self::Int(i) if i.is_zero() => Some(bits as u64),
            Self::Int(i) if !i.is_negative() => i.trailing_zeros(),
            _ => None,
        }
    }

    pub fn compare(&self, other: &BigNum) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            _ => self
                .as_f64()
                .partial_cmp(&other.as_f64())
                .unwrap_or(Ordering::Equal),
        }
    }

    fn arith(
        &self,
        other: &BigNum,
        int_op: impl Fn(&BigInt, &BigInt) -> BigInt,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> BigNumResult {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Ok(Self::Int(int_op(a, b))),
            _ => Ok(Self::Float(float_op(self.as_f64(), other.as_f64()))),
        }
    }

    fn int_pair<'a>(&'a self, other: &'a BigNum) -> Result<(&'a BigInt, &'a BigInt), BigNumError> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Ok((a, b)),
            _ => Err(BigNumError::IncompatibleOperands),
        }
    }
}

impl core::fmt::Display for BigNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_checks_follow_signedness() {
        assert!(BigNum::from_u64(255).fits_in_bits(8, false));
        assert!(!BigNum::from_u64(256).fits_in_bits(8, false));
        assert!(!BigNum::from_u64(255).fits_in_bits(8, true));
        assert!(BigNum::from_i64(-128).fits_in_bits(8, true));
        assert!(!BigNum::from_i64(-129).fits_in_bits(8, true));
        assert!(!BigNum::from_i64(-1).fits_in_bits(64, false));
    }

    #[test]
    fn wrapping_truncates_twos_complement() {
        let v = BigNum::from_u64(300).wrapped_to_bits(8, false);
        assert_eq!(v, BigNum::from_u64(44));

        let v = BigNum::from_u64(255).wrapped_to_bits(8, true);
        assert_eq!(v, BigNum::from_i64(-1));

        let v = BigNum::from_i64(-1).wrapped_to_bits(8, false);
        assert_eq!(v, BigNum::from_u64(255));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let err = BigNum::from_u64(1).div(&BigNum::zero()).unwrap_err();
        assert_eq!(err, BigNumError::DivisionByZero);

        let err = BigNum::from_u64(1).rem(&BigNum::zero()).unwrap_err();
        assert_eq!(err, BigNumError::DivisionByZero);
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        let sum = BigNum::from_u64(1).add(&BigNum::from_f64(2.5)).unwrap();
        assert_eq!(sum, BigNum::from_f64(3.5));
    }

    #[test]
    fn clz_ctz_within_width() {
        assert_eq!(BigNum::from_u64(1).leading_zeros(8), Some(7));
        assert_eq!(BigNum::from_u64(0).leading_zeros(8), Some(8));
        assert_eq!(BigNum::from_u64(8).trailing_zeros(8), Some(3));
        assert_eq!(BigNum::from_u64(0).trailing_zeros(8), Some(8));
    }
}
