//! # Funding & PnL Accrual
//!
//! Brings the vault/long balance split current before any other mutation.
//! One atomic step per unit of wall-clock time: price PnL moves value
//! between the sides, then the funding transfer settles the imbalance
//! premium, then the EMA absorbs the applied rate. Calling again with no
//! elapsed time is a no-op.

use tracing::trace;

use crate::config::ProtocolParams;
use crate::constants::{SECONDS_PER_DAY, WAD};
use crate::errors::{CoreResult, KeelCoreError};
use crate::math::fixed_point::bps_of;
use crate::math::{mul_div, mul_div_i128, Rounding};
use crate::vault::VaultState;

/// What one accrual step applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accrual {
    /// Per-day funding rate applied, signed WAD; positive means longs pay
    pub rate: i128,
    /// Collateral moved long -> vault by the funding leg (WAD, signed)
    pub funding_asset: i128,
    /// Long-side balance change from the price move (WAD, signed)
    pub pnl_long: i128,
}

/// Instantaneous per-day funding rate from the current imbalance
///
/// `rate = sign(imb) * funding_sf * (imb / max(trading_expo, vault))^2 + ema`
/// The quadratic form keeps small imbalances cheap while the scaling factor
/// bounds the rate at full imbalance.
pub fn funding_rate(
    trading_expo: u128,
    balance_vault: u128,
    ema: i128,
    funding_sf: u128,
) -> CoreResult<i128> {
    let denom = trading_expo.max(balance_vault);
    if denom == 0 {
        return Ok(ema);
    }

    let imb = i128::try_from(trading_expo).map_err(|_| KeelCoreError::ConversionError)?
        - i128::try_from(balance_vault).map_err(|_| KeelCoreError::ConversionError)?;
    let denom_i = i128::try_from(denom).map_err(|_| KeelCoreError::ConversionError)?;

    let ratio = mul_div_i128(imb, WAD as i128, denom_i, Rounding::Down)?;
    let quad = mul_div_i128(ratio, ratio, WAD as i128, Rounding::Down)?;
    let scaled = mul_div_i128(
        quad,
        i128::try_from(funding_sf).map_err(|_| KeelCoreError::ConversionError)?,
        WAD as i128,
        Rounding::Down,
    )?;
    let signed = if imb < 0 { -scaled } else { scaled };

    signed.checked_add(ema).ok_or(KeelCoreError::MathOverflow)
}

/// Apply funding and PnL for the elapsed time, once
///
/// Returns `None` (and leaves every field untouched) when no time has
/// elapsed since the last update.
pub fn apply(
    vault: &mut VaultState,
    total_expo: u128,
    new_price: u128,
    now: u64,
    params: &ProtocolParams,
) -> CoreResult<Option<Accrual>> {
    if now <= vault.last_update_timestamp {
        return Ok(None);
    }
    if new_price == 0 {
        return Err(KeelCoreError::InvalidPrice);
    }
    let elapsed = now - vault.last_update_timestamp;

    let trading_expo = vault.trading_expo(total_expo);
    let total_balance = vault.total_balance();

    // rate and funding amount derive from the pre-accrual state
    let rate = funding_rate(trading_expo, vault.balance_vault, vault.ema, params.funding_sf)?;
    let funding_asset = {
        let notional = mul_div_i128(
            rate,
            i128::try_from(trading_expo).map_err(|_| KeelCoreError::ConversionError)?,
            WAD as i128,
            Rounding::Down,
        )?;
        mul_div_i128(
            notional,
            elapsed as i128,
            SECONDS_PER_DAY as i128,
            Rounding::Down,
        )?
    };

    // long side at the new price: total_expo - trading_expo * p0 / p1,
    // clamped into [0, total_balance]; the walk wipes what fell below zero
    let carried = mul_div(trading_expo, vault.last_price, new_price, Rounding::Down)?;
    let new_long_unclamped = i128::try_from(total_expo)
        .map_err(|_| KeelCoreError::ConversionError)?
        - i128::try_from(carried).map_err(|_| KeelCoreError::ConversionError)?;
    let new_long = new_long_unclamped
        .clamp(0, i128::try_from(total_balance).map_err(|_| KeelCoreError::ConversionError)?)
        as u128;
    let pnl_long = new_long as i128
        - i128::try_from(vault.balance_long).map_err(|_| KeelCoreError::ConversionError)?;

    vault.balance_long = new_long;
    vault.balance_vault = total_balance - new_long;

    // funding leg, with the protocol fee skimmed off the receiving side
    vault.transfer_long_to_vault(funding_asset);
    let fee = bps_of(funding_asset.unsigned_abs(), params.protocol_fee_bps)?;
    if fee > 0 {
        if funding_asset > 0 {
            let taken = fee.min(vault.balance_vault);
            vault.balance_vault -= taken;
            vault.pending_protocol_fee = vault.pending_protocol_fee.saturating_add(taken);
        } else {
            let taken = fee.min(vault.balance_long);
            vault.balance_long -= taken;
            vault.pending_protocol_fee = vault.pending_protocol_fee.saturating_add(taken);
        }
    }

    // EMA absorbs the applied rate over the configured period
    vault.ema = if params.ema_period == 0 || elapsed >= params.ema_period {
        rate
    } else {
        let step = mul_div_i128(
            rate - vault.ema,
            elapsed as i128,
            params.ema_period as i128,
            Rounding::Down,
        )?;
        vault
            .ema
            .checked_add(step)
            .ok_or(KeelCoreError::MathOverflow)?
    };

    vault.last_price = new_price;
    vault.last_update_timestamp = now;

    trace!(rate, funding_asset, pnl_long, "accrual applied");
    Ok(Some(Accrual {
        rate,
        funding_asset,
        pnl_long,
    }))
}
