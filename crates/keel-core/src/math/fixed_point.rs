//! # Fixed-Point Arithmetic
//!
//! WAD (18-decimal) and basis-point helpers. All amounts and prices in the
//! protocol are WAD integers; ratios are basis points.

use crate::constants::{BPS_DENOMINATOR, WAD};
use crate::errors::{CoreResult, KeelCoreError};
use crate::math::big_int::{mul_div, mul_div_i128, Rounding};

/// Multiply two WAD numbers
pub fn wad_mul(a: u128, b: u128, rounding: Rounding) -> CoreResult<u128> {
    mul_div(a, b, WAD, rounding)
}

/// Divide two WAD numbers
pub fn wad_div(a: u128, b: u128, rounding: Rounding) -> CoreResult<u128> {
    mul_div(a, WAD, b, rounding)
}

/// Signed WAD multiply
pub fn wad_mul_i128(a: i128, b: i128, rounding: Rounding) -> CoreResult<i128> {
    mul_div_i128(a, b, WAD as i128, rounding)
}

/// Basis-point share of a value, rounded down
pub fn bps_of(value: u128, bps: u16) -> CoreResult<u128> {
    mul_div(value, bps as u128, BPS_DENOMINATOR, Rounding::Down)
}

/// Value net of a basis-point fee (fee rounds down, in the protocol's favor)
pub fn after_bps_fee(value: u128, fee_bps: u16) -> CoreResult<(u128, u128)> {
    let fee = bps_of(value, fee_bps)?;
    let net = value
        .checked_sub(fee)
        .ok_or(KeelCoreError::MathUnderflow)?;
    Ok((net, fee))
}

/// Signed exposure imbalance in basis points
///
/// `(trading_expo - vault_balance) / vault_balance`, the quantity both the
/// imbalance limits and the rebalancer trigger are quoted in. An empty vault
/// saturates to the maximal imbalance instead of dividing by zero.
pub fn imbalance_bps(trading_expo: u128, vault_balance: u128) -> CoreResult<i64> {
    if vault_balance == 0 {
        return Ok(if trading_expo == 0 { 0 } else { i64::MAX });
    }
    let trading = i128::try_from(trading_expo).map_err(|_| KeelCoreError::ConversionError)?;
    let vault = i128::try_from(vault_balance).map_err(|_| KeelCoreError::ConversionError)?;
    let bps = mul_div_i128(
        trading - vault,
        BPS_DENOMINATOR as i128,
        vault,
        Rounding::Down,
    )?;
    i64::try_from(bps).map_err(|_| KeelCoreError::ConversionError)
}
