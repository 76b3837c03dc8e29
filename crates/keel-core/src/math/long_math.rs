//! # Long Position Math
//!
//! Leverage, exposure and valuation formulas for leveraged longs. All three
//! are tied together by the liquidation price net of penalty:
//!
//! - `leverage  = start_price / (start_price - liq_price)`
//! - `total_expo = amount * leverage` (price-independent notional)
//! - `value(p)  = total_expo * (p - liq_price) / p`

use crate::constants::WAD;
use crate::errors::{CoreResult, KeelCoreError};
use crate::math::big_int::{mul_div, mul_div_i128, Rounding};

/// Leverage in WAD implied by an entry price and a liquidation price
pub fn leverage(start_price: u128, liq_price_wo_penalty: u128) -> CoreResult<u128> {
    if liq_price_wo_penalty >= start_price {
        return Err(KeelCoreError::InvalidPrice);
    }
    mul_div(
        start_price,
        WAD,
        start_price - liq_price_wo_penalty,
        Rounding::Down,
    )
}

/// Price-independent total exposure: `amount * start / (start - liq)`
pub fn total_expo(
    amount: u128,
    start_price: u128,
    liq_price_wo_penalty: u128,
) -> CoreResult<u128> {
    if liq_price_wo_penalty >= start_price {
        return Err(KeelCoreError::InvalidPrice);
    }
    mul_div(
        amount,
        start_price,
        start_price - liq_price_wo_penalty,
        Rounding::Down,
    )
}

/// Collateral value of an exposure at the given price, signed
///
/// Negative below the liquidation price: the position carries bad debt.
pub fn position_value(
    total_expo: u128,
    price: u128,
    liq_price_wo_penalty: u128,
) -> CoreResult<i128> {
    if price == 0 {
        return Err(KeelCoreError::DivisionByZero);
    }
    let expo = i128::try_from(total_expo).map_err(|_| KeelCoreError::ConversionError)?;
    let price_i = i128::try_from(price).map_err(|_| KeelCoreError::ConversionError)?;
    let liq_i =
        i128::try_from(liq_price_wo_penalty).map_err(|_| KeelCoreError::ConversionError)?;
    mul_div_i128(expo, price_i - liq_i, price_i, Rounding::Down)
}

/// Liquidation price implied by an entry price and a target leverage
///
/// Inverse of [`leverage`]: `liq = start * (leverage - 1) / leverage`.
pub fn liq_price_for_leverage(start_price: u128, leverage_wad: u128) -> CoreResult<u128> {
    if leverage_wad <= WAD {
        return Err(KeelCoreError::LeverageTooLow(leverage_wad));
    }
    mul_div(
        start_price,
        leverage_wad - WAD,
        leverage_wad,
        Rounding::Down,
    )
}
