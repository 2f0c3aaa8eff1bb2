use num_bigint::BigUint;

use crate::error::{ProbeError, Result};

/// Parses a non-negative integer given as `0x` hex or plain decimal text.
pub fn parse_big_uint(raw: &str) -> Option<BigUint> {
    let trimmed = raw.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        BigUint::parse_bytes(hex.as_bytes(), 16)
    } else {
        BigUint::parse_bytes(trimmed.as_bytes(), 10)
    }
}

/// Renders `value / 10^scale` as exact decimal text.
fn scaled_decimal_string(value: &BigUint, scale: u32) -> String {
    let digits = value.to_str_radix(10);
    let scale = scale as usize;
    if scale == 0 {
        return digits;
    }
    if digits.len() > scale {
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        format!("{}.{}", int_part, frac_part)
    } else {
        format!("0.{}{}", "0".repeat(scale - digits.len()), digits)
    }
}

/// Scales a big integer down by `10^scale` and narrows it to `f64`.
///
/// The division happens on the exact decimal text, so the only rounding
/// step is the final (correctly rounded) `f64` parse.
pub fn try_scaled_float(raw: &str, scale: u32) -> Result<f64> {
    let value = parse_big_uint(raw)
        .ok_or_else(|| ProbeError::Decode(format!("'{}' is not a hex or decimal integer", raw)))?;
    let text = scaled_decimal_string(&value, scale);
    text.parse::<f64>()
        .map_err(|e| ProbeError::Decode(format!("cannot narrow '{}' to f64: {}", text, e)))
}

/// Lenient variant of [`try_scaled_float`]: malformed input yields `0.0`.
pub fn to_scaled_float(raw: &str, scale: u32) -> f64 {
    try_scaled_float(raw, scale).unwrap_or_else(|err| {
        tracing::debug!("treating malformed numeric result as zero: {}", err);
        0.0
    })
}
