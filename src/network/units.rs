//! Conversion between decimal amounts and on-chain integer units

use crate::{Result, X402Error};
use ethereum_types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// `amount` in the asset's smallest unit (wei, lamports, token base units)
///
/// Rejects amounts with more precision than the asset supports; they are
/// never rounded.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u128> {
    if amount.is_sign_negative() {
        return Err(X402Error::validation("Amount must not be negative"));
    }

    let scale = Decimal::from_i128_with_scale(10i128.pow(decimals), 0);
    let scaled = amount
        .checked_mul(scale)
        .ok_or_else(|| X402Error::validation(format!("Amount {} is too large", amount)))?;

    if !scaled.fract().is_zero() {
        return Err(X402Error::validation(format!(
            "Amount {} has more than {} decimal places",
            amount, decimals
        )));
    }

    scaled
        .trunc()
        .to_u128()
        .ok_or_else(|| X402Error::validation(format!("Amount {} is out of range", amount)))
}

/// Decimal amount from the asset's smallest unit
pub fn from_base_units(units: u128, decimals: u32) -> Result<Decimal> {
    let units = i128::try_from(units)
        .map_err(|_| X402Error::chain(format!("On-chain amount {} is out of range", units)))?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .map(|d| d.normalize())
        .map_err(|_| X402Error::chain(format!("On-chain amount {} is out of range", units)))
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(raw: &str) -> Result<U256> {
    let digits = raw.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|_| X402Error::chain(format!("Invalid hex quantity: {}", raw)))
}

/// Narrow a U256 to u128, failing on overflow
pub fn u256_to_u128(value: U256) -> Result<u128> {
    if value.bits() > 128 {
        return Err(X402Error::chain(format!("Value {} exceeds u128", value)));
    }
    Ok(value.low_u128())
}
