//! Kubernetes resource quantity parsing.
//!
//! Accepts `<number><suffix>` where the suffix is a binary SI unit
//! (`Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`), a decimal SI unit (`n`, `u`, `m`,
//! `k`, `M`, `G`, `T`, `P`, `E`), a decimal exponent (`e3`, `E-2`) or
//! nothing. The integer value is rounded up, like `Quantity.Value()`.

use thiserror::Error;

/// Quantity parse failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct QuantityError(String);

/// Largest decimal exponent accepted in a suffix.
const MAX_EXPONENT: i32 = 100;

enum Scale {
    Decimal(i32),
    Binary(u32),
}

/// Parse a quantity into its integer value, rounding up.
///
/// Values beyond `i128` saturate. Exponent suffixes are limited to ±100.
pub fn parse_quantity(input: &str) -> Result<i128, QuantityError> {
    let s = input.trim();
    let invalid = || QuantityError(format!("quantities must match the regular expression '^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$': '{}'", input));

    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let number_len = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let (number, suffix) = rest.split_at(number_len);

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
        return Err(invalid());
    }

    let scale = parse_suffix(suffix).ok_or_else(invalid)?;

    let mut mantissa: u128 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        let digit = c.to_digit(10).ok_or_else(invalid)? as u128;
        mantissa = mantissa.saturating_mul(10).saturating_add(digit);
    }
    let frac_digits = i32::try_from(frac_part.len()).map_err(|_| invalid())?;

    let magnitude = match scale {
        Scale::Decimal(exp) => {
            let exp = exp.checked_sub(frac_digits).ok_or_else(invalid)?;
            scale_decimal(mantissa, exp)
        }
        Scale::Binary(shift) => {
            let scaled = if shift >= 128 || mantissa.leading_zeros() < shift {
                u128::MAX
            } else {
                mantissa << shift
            };
            scale_decimal(scaled, -frac_digits)
        }
    };

    let value = i128::try_from(magnitude).unwrap_or(i128::MAX);
    Ok(if negative { -value } else { value })
}

fn parse_suffix(suffix: &str) -> Option<Scale> {
    let scale = match suffix {
        "" => Scale::Decimal(0),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        "Ki" => Scale::Binary(10),
        "Mi" => Scale::Binary(20),
        "Gi" => Scale::Binary(30),
        "Ti" => Scale::Binary(40),
        "Pi" => Scale::Binary(50),
        "Ei" => Scale::Binary(60),
        s if s.len() > 1 && (s.starts_with('e') || s.starts_with('E')) => {
            let exp: i32 = s[1..].parse().ok()?;
            if !(-MAX_EXPONENT..=MAX_EXPONENT).contains(&exp) {
                return None;
            }
            Scale::Decimal(exp)
        }
        _ => return None,
    };
    Some(scale)
}

/// `mantissa * 10^exp`, rounded up when `exp` is negative.
fn scale_decimal(mantissa: u128, exp: i32) -> u128 {
    if exp >= 0 {
        match 10u128.checked_pow(exp.unsigned_abs()) {
            Some(factor) => mantissa.saturating_mul(factor),
            None if mantissa == 0 => 0,
            None => u128::MAX,
        }
    } else {
        let divisor = 10u128.checked_pow(exp.unsigned_abs());
        match divisor {
            Some(d) => mantissa / d + u128::from(mantissa % d != 0),
            None => u128::from(mantissa != 0),
        }
    }
}
