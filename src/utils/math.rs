//! Fixed-point arithmetic and mathematical utilities.
//!
//! All financial quantities are u128 wads (1e18 = 1.0). Products of two wads
//! (for example collateral times price) exceed u128, so the multiply-divide
//! helpers here run through a 256-bit intermediate built from two u128 limbs.

use crate::error::{Error, Result};
use crate::utils::constants::{SECONDS_PER_YEAR, WAD};

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn safe_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(Error::Overflow {
        operation: format!("{} + {}", a, b),
    })
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(Error::Underflow {
        operation: format!("{} - {}", a, b),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// 256-BIT MULTIPLY / DIVIDE
// ═══════════════════════════════════════════════════════════════════════════════

/// Full 256-bit product of two u128 values as (high, low) limbs
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = (1u128 << 64) - 1;

    let (a_hi, a_lo) = (a >> 64, a & MASK);
    let (b_hi, b_lo) = (b >> 64, b & MASK);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let (mid, mid_carry) = lh.overflowing_add(hl);
    let (lo, lo_carry) = ll.overflowing_add(mid << 64);
    let hi = hh + (mid >> 64) + ((mid_carry as u128) << 64) + lo_carry as u128;

    (hi, lo)
}

/// Divide a 256-bit value (hi, lo) by a u128 divisor
///
/// Returns (quotient, remainder). Errors when the divisor is zero or the
/// quotient exceeds u128.
fn div_wide(hi: u128, lo: u128, divisor: u128) -> Result<(u128, u128)> {
    if divisor == 0 {
        return Err(Error::InvalidParameter {
            name: "divisor".into(),
            reason: "division by zero".into(),
        });
    }
    if hi >= divisor {
        return Err(Error::Overflow {
            operation: format!("wide division by {}", divisor),
        });
    }
    if hi == 0 {
        return Ok((lo / divisor, lo % divisor));
    }

    // Binary long division, one bit of the low limb at a time. The remainder
    // stays below the divisor, so the shifted value fits in 129 bits and the
    // carry bit decides the subtraction.
    let mut rem = hi;
    let mut quotient = 0u128;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> i) & 1);
        if carry == 1 || rem >= divisor {
            rem = rem.wrapping_sub(divisor);
            quotient |= 1 << i;
        }
    }

    Ok((quotient, rem))
}

/// Compute (a * b) / c with a 256-bit intermediate, rounding down
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128> {
    let (hi, lo) = mul_wide(a, b);
    let (quotient, _) = div_wide(hi, lo, c)?;
    Ok(quotient)
}

/// Compute (a * b) / c with a 256-bit intermediate, rounding up
pub fn mul_div_up(a: u128, b: u128, c: u128) -> Result<u128> {
    let (hi, lo) = mul_wide(a, b);
    let (quotient, rem) = div_wide(hi, lo, c)?;
    if rem == 0 {
        Ok(quotient)
    } else {
        quotient.checked_add(1).ok_or(Error::Overflow {
            operation: format!("ceil(({} * {}) / {})", a, b, c),
        })
    }
}

/// Multiply two wads, rounding down
pub fn wad_mul(a: u128, b: u128) -> Result<u128> {
    mul_div(a, b, WAD)
}

/// Divide two wads, rounding down
pub fn wad_div(a: u128, b: u128) -> Result<u128> {
    mul_div(a, WAD, b)
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPONENTIAL
// ═══════════════════════════════════════════════════════════════════════════════

/// Largest exponent accepted by [`exp_wad`]
///
/// e^16 is already about 8.9 million wads; rates times elapsed time in this
/// protocol stay far below this bound.
pub const MAX_EXP_INPUT: u128 = 16 * WAD;

/// Compute e^x for a wad exponent via its Taylor series, rounding down
///
/// Each term floors, so the result underestimates the true value by a few
/// units in the last place for exponents around 1.0.
pub fn exp_wad(x: u128) -> Result<u128> {
    if x > MAX_EXP_INPUT {
        return Err(Error::Overflow {
            operation: format!("exp_wad({})", x),
        });
    }

    let mut sum = WAD;
    let mut term = WAD;
    let mut n: u128 = 1;
    while term > 0 {
        term = mul_div(term, x, WAD * n)?;
        sum = safe_add(sum, term)?;
        n += 1;
    }
    Ok(sum)
}

/// Interest factor e^(rate * dt / year) - 1 for an annual rate over dt seconds
pub fn interest_factor(annual_rate: u128, dt_secs: u64) -> Result<u128> {
    let exponent = mul_div(annual_rate, dt_secs as u128, SECONDS_PER_YEAR as u128)?;
    safe_sub(exp_wad(exponent)?, WAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_wide_small() {
        assert_eq!(mul_wide(6, 7), (0, 42));
        assert_eq!(mul_wide(u128::MAX, 1), (0, u128::MAX));
    }

    #[test]
    fn test_mul_wide_overflowing() {
        // (2^127) * 2 = 2^128 -> hi = 1, lo = 0
        assert_eq!(mul_wide(1u128 << 127, 2), (1, 0));
        // MAX * MAX = 2^256 - 2^129 + 1 -> hi = MAX - 1, lo = 1
        assert_eq!(mul_wide(u128::MAX, u128::MAX), (u128::MAX - 1, 1));
    }

    #[test]
    fn test_mul_div_basic() {
        assert_eq!(mul_div(10, 10, 4).unwrap(), 25);
        assert_eq!(mul_div(7, 3, 2).unwrap(), 10); // floor(21 / 2)
        assert_eq!(mul_div_up(7, 3, 2).unwrap(), 11);
        assert_eq!(mul_div_up(10, 10, 4).unwrap(), 25);
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // 1e18 collateral at price 1e23 (100,000 per unit): the product is
        // 1e41 and overflows u128 on its own.
        let coll = WAD;
        let price = 100_000 * WAD;
        assert_eq!(mul_div(coll, price, WAD).unwrap(), price);
        assert_eq!(mul_div(coll, price, 2_000 * WAD).unwrap(), 50 * WAD);
    }

    #[test]
    fn test_mul_div_errors() {
        assert!(mul_div(1, 1, 0).is_err());
        assert!(mul_div(u128::MAX, u128::MAX, 1).is_err());
    }

    #[test]
    fn test_wad_mul_div() {
        assert_eq!(wad_mul(2 * WAD, 3 * WAD).unwrap(), 6 * WAD);
        assert_eq!(wad_div(6 * WAD, 3 * WAD).unwrap(), 2 * WAD);
        assert_eq!(wad_mul(WAD / 2, WAD / 2).unwrap(), WAD / 4);
    }

    #[test]
    fn test_safe_arithmetic() {
        assert_eq!(safe_add(1, 2).unwrap(), 3);
        assert!(safe_add(u128::MAX, 1).is_err());
        assert_eq!(safe_sub(5, 3).unwrap(), 2);
        assert!(safe_sub(3, 5).is_err());
    }

    #[test]
    fn test_exp_wad_zero() {
        assert_eq!(exp_wad(0).unwrap(), WAD);
    }

    #[test]
    fn test_exp_wad_one() {
        // e^1 = 2.718281828459045235...
        let e = exp_wad(WAD).unwrap();
        let expected = 2_718_281_828_459_045_235u128;
        assert!(expected - e < 50, "e = {}", e);
    }

    #[test]
    fn test_exp_wad_quarter() {
        // e^0.25 = 1.284025416687741484...
        let e = exp_wad(WAD / 4).unwrap();
        let expected = 1_284_025_416_687_741_484u128;
        assert!(expected - e < 50, "e^0.25 = {}", e);
    }

    #[test]
    fn test_exp_wad_rejects_huge_input() {
        assert!(exp_wad(MAX_EXP_INPUT + 1).is_err());
    }

    #[test]
    fn test_interest_factor_full_year() {
        // 10% annual rate over a full year: e^0.1 - 1 = 0.105170918075647624...
        let f = interest_factor(WAD / 10, SECONDS_PER_YEAR).unwrap();
        let expected = 105_170_918_075_647_624u128;
        assert!(expected - f < 50, "factor = {}", f);
    }

    #[test]
    fn test_interest_factor_zero_elapsed() {
        assert_eq!(interest_factor(WAD / 10, 0).unwrap(), 0);
    }
}
