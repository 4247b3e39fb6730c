//! Token Amount Arithmetic Module
//!
//! This module converts between human-readable decimal amount strings and
//! raw token values in smallest units, and evaluates the completion
//! tolerance. All arithmetic is integer-only on `U256`; floating point is
//! never used for amounts.

use ethereum_types::U256;
use thiserror::Error;

/// Errors produced when parsing a decimal amount string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is not a valid decimal number: {0}")]
    Malformed(String),
    #[error("amount has more than {decimals} fractional digits: {value}")]
    TooPrecise { value: String, decimals: u8 },
    #[error("amount must be positive: {0}")]
    NotPositive(String),
}

/// Parses a positive decimal string (e.g. `"1.5"`) into smallest units.
///
/// The fractional part may not exceed `decimals` digits: sub-unit precision
/// cannot be represented on chain and is rejected rather than rounded.
///
/// # Arguments
///
/// * `value` - Decimal amount string, without sign or exponent
/// * `decimals` - Token decimals, in [0, 30]
///
/// # Returns
///
/// * `Ok(U256)` - Amount in smallest units, guaranteed non-zero
/// * `Err(AmountError)` - Malformed, too precise, or non-positive input
pub fn parse_units(value: &str, decimals: u8) -> Result<U256, AmountError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Malformed(value.to_string()));
    }

    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((i, f)) => (i, f),
        None => (trimmed, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(AmountError::Malformed(value.to_string()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(AmountError::Malformed(value.to_string()));
    }
    if frac_part.len() > decimals as usize {
        return Err(AmountError::TooPrecise {
            value: value.to_string(),
            decimals,
        });
    }

    let scale = U256::from(10u64).pow(U256::from(decimals));
    let int_units = if int_part.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(int_part)
            .map_err(|_| AmountError::Malformed(value.to_string()))?
            .checked_mul(scale)
            .ok_or_else(|| AmountError::Malformed(value.to_string()))?
    };

    let frac_units = if frac_part.is_empty() {
        U256::zero()
    } else {
        let frac_scale = U256::from(10u64).pow(U256::from(decimals - frac_part.len() as u8));
        U256::from_dec_str(frac_part)
            .map_err(|_| AmountError::Malformed(value.to_string()))?
            * frac_scale
    };

    let units = int_units
        .checked_add(frac_units)
        .ok_or_else(|| AmountError::Malformed(value.to_string()))?;
    if units.is_zero() {
        return Err(AmountError::NotPositive(value.to_string()));
    }
    Ok(units)
}

/// Formats a raw smallest-unit value as a decimal string.
///
/// Trailing fractional zeros are trimmed; whole amounts render without a
/// decimal point (`"2"`, not `"2.000000000000000000"`).
pub fn format_units(raw: U256, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let int_part = raw / scale;
    let frac_part = raw % scale;
    if frac_part.is_zero() {
        return int_part.to_string();
    }
    let frac = format!("{:0>width$}", frac_part.to_string(), width = decimals as usize);
    let frac = frac.trim_end_matches('0');
    format!("{}.{}", int_part, frac)
}

/// Lower acceptance bound for a target amount: `target - target * 5 / 100`.
///
/// There is no upper bound; overpayments are accepted.
pub fn tolerance_floor(target: U256) -> U256 {
    target - target * U256::from(5u64) / U256::from(100u64)
}

/// Returns true when `raw_value` satisfies the tolerance band for `target`.
pub fn meets_tolerance(raw_value: U256, target: U256) -> bool {
    raw_value >= tolerance_floor(target)
}
