//! Fixed-point values.
//!
//! Decimal, numeric and money columns all decode to a [`Numeric`]: an
//! unscaled 128-bit integer plus the number of digits after the point.
//! Money is a numeric with scale 4.

use std::fmt;

use crate::error::TypeError;

/// Scale of money and smallmoney values.
pub const MONEY_SCALE: u8 = 4;

/// Largest precision the wire format carries.
pub const MAX_PRECISION: u8 = 38;

/// A scaled integer: `value / 10^scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Numeric {
    /// Unscaled value.
    pub value: i128,
    /// Digits after the decimal point.
    pub scale: u8,
}

fn pow10(exp: u32) -> Result<i128, TypeError> {
    10i128
        .checked_pow(exp)
        .ok_or(TypeError::OutOfRange { target_type: "numeric" })
}

impl Numeric {
    /// Create a numeric from its unscaled value and scale.
    #[must_use]
    pub const fn new(value: i128, scale: u8) -> Self {
        Self { value, scale }
    }

    /// Interpret a raw money amount (ten-thousandths).
    #[must_use]
    pub const fn from_money(raw: i64) -> Self {
        Self {
            value: raw as i128,
            scale: MONEY_SCALE,
        }
    }

    /// Raw money amount (ten-thousandths), rounding extra digits.
    pub fn to_money(self) -> Result<i64, TypeError> {
        let scaled = self.rescale(MONEY_SCALE)?;
        i64::try_from(scaled.value).map_err(|_| TypeError::OutOfRange { target_type: "money" })
    }

    /// The same amount at another scale.
    ///
    /// Reducing the scale rounds half away from zero.
    pub fn rescale(self, scale: u8) -> Result<Self, TypeError> {
        let value = match scale.cmp(&self.scale) {
            std::cmp::Ordering::Equal => self.value,
            std::cmp::Ordering::Greater => self
                .value
                .checked_mul(pow10(u32::from(scale - self.scale))?)
                .ok_or(TypeError::OutOfRange { target_type: "numeric" })?,
            std::cmp::Ordering::Less => {
                let divisor = pow10(u32::from(self.scale - scale))?;
                let quotient = self.value / divisor;
                let remainder = self.value % divisor;
                if remainder.abs() * 2 >= divisor {
                    quotient + self.value.signum()
                } else {
                    quotient
                }
            }
        };
        Ok(Self { value, scale })
    }

    /// Number of decimal digits in the unscaled value.
    #[must_use]
    pub fn digits(&self) -> u32 {
        let mut magnitude = self.value.unsigned_abs();
        let mut digits = 1;
        while magnitude >= 10 {
            magnitude /= 10;
            digits += 1;
        }
        digits
    }

    /// Approximate floating-point value.
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        self.value as f64 / 10f64.powi(i32::from(self.scale))
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.value.unsigned_abs().to_string();
        let scale = usize::from(self.scale);
        if self.value < 0 {
            f.write_str("-")?;
        }
        if scale == 0 {
            return f.write_str(&digits);
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int, frac) = padded.split_at(padded.len() - scale);
        write!(f, "{int}.{frac}")
    }
}

#[cfg(feature = "decimal")]
impl TryFrom<Numeric> for rust_decimal::Decimal {
    type Error = TypeError;

    fn try_from(n: Numeric) -> Result<Self, TypeError> {
        rust_decimal::Decimal::try_from_i128_with_scale(n.value, u32::from(n.scale))
            .map_err(|e| TypeError::InvalidDecimal(e.to_string()))
    }
}

#[cfg(feature = "decimal")]
impl From<rust_decimal::Decimal> for Numeric {
    fn from(d: rust_decimal::Decimal) -> Self {
        Self {
            value: d.mantissa(),
            scale: d.scale() as u8,
        }
    }
}
