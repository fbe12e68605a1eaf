//! Mixed integer/double arithmetic and ordering
//!
//! Integers are fixed-width `i64` with checked arithmetic; overflow surfaces
//! as [`AxError::IntegerOverflow`] and the dispatch layer downgrades it to
//! `Undefined`. Mixed ordering never round-trips an `i64` through `f64`, so
//! the full integer range orders correctly against doubles, including ±∞.

use std::cmp::Ordering;

use crate::error::{AxError, Result};

/// Compare an integer with a double by mathematical value.
///
/// Returns `None` when the double is NaN. The comparison works on the
/// double's floor: any double at or beyond the `i64` range compares as
/// strictly outside it.
pub fn compare_int_double(int: i64, double: f64) -> Option<Ordering> {
    if double.is_nan() {
        return None;
    }
    // 2^63 is exactly representable; i64::MAX is not.
    const UPPER: f64 = 9_223_372_036_854_775_808.0;
    const LOWER: f64 = -9_223_372_036_854_775_808.0;
    if double >= UPPER {
        return Some(Ordering::Less);
    }
    if double < LOWER {
        return Some(Ordering::Greater);
    }
    let floor = double.floor();
    // Safe: floor is within [-2^63, 2^63).
    let floor_int = floor as i64;
    match int.cmp(&floor_int) {
        Ordering::Equal => {
            if double > floor {
                // double sits strictly between floor and floor + 1
                Some(Ordering::Less)
            } else {
                Some(Ordering::Equal)
            }
        }
        other => Some(other),
    }
}

/// Whether an integer and a double denote the same mathematical value
pub fn int_double_equal(int: i64, double: f64) -> bool {
    compare_int_double(int, double) == Some(Ordering::Equal)
}

/// Checked addition
pub fn checked_add(a: i64, b: i64) -> Result<i64> {
    a.checked_add(b)
        .ok_or(AxError::IntegerOverflow { operation: "add" })
}

/// Checked subtraction
pub fn checked_sub(a: i64, b: i64) -> Result<i64> {
    a.checked_sub(b)
        .ok_or(AxError::IntegerOverflow { operation: "sub" })
}

/// Checked multiplication
pub fn checked_mul(a: i64, b: i64) -> Result<i64> {
    a.checked_mul(b)
        .ok_or(AxError::IntegerOverflow { operation: "mul" })
}

/// Checked negation
pub fn checked_neg(a: i64) -> Result<i64> {
    a.checked_neg()
        .ok_or(AxError::IntegerOverflow { operation: "neg" })
}

/// Integer division rounding toward negative infinity.
///
/// `-7 div 2 == -4`; `7 div -2 == -4`.
pub fn floor_div(a: i64, b: i64) -> Result<i64> {
    if b == 0 {
        return Err(AxError::DivisionByZero);
    }
    if a == i64::MIN && b == -1 {
        return Err(AxError::IntegerOverflow { operation: "div" });
    }
    let quotient = a / b;
    let remainder = a % b;
    if remainder != 0 && (remainder < 0) != (b < 0) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

/// Modulo paired with [`floor_div`]: the result takes the divisor's sign.
///
/// `-7 mod 2 == 1`; `7 mod -2 == -1`.
pub fn floor_mod(a: i64, b: i64) -> Result<i64> {
    if b == 0 {
        return Err(AxError::DivisionByZero);
    }
    if a == i64::MIN && b == -1 {
        return Ok(0);
    }
    let remainder = a % b;
    if remainder != 0 && (remainder < 0) != (b < 0) {
        Ok(remainder + b)
    } else {
        Ok(remainder)
    }
}
