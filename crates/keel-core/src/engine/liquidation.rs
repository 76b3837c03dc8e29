//! # Liquidation Engine
//!
//! Walks populated ticks in price order, wiping every tick whose
//! liquidation price the market crossed. The walk is bounded per call;
//! hitting the bound leaves the remaining ticks populated and a later call
//! resumes where this one stopped.

use tracing::info;

use crate::constants::{MAX_TICK, MIN_TICK};
use crate::errors::{CoreResult, KeelCoreError};
use crate::ledger::PositionLedger;
use crate::math::long_math::position_value;
use crate::math::tick_math;
use crate::types::TickLiquidationInfo;
use crate::vault::VaultState;

/// Ledger and balance effects of one liquidation pass
#[derive(Debug, Clone, Default)]
pub struct LiquidationEffects {
    /// Per-tick snapshots in processing order (highest tick first)
    pub ticks: Vec<TickLiquidationInfo>,
    /// Sum of the collateral freed across ticks; negative is bad debt
    pub remaining_collateral: i128,
}

/// Highest tick that survives the given price
///
/// Ticks strictly above it have a liquidation price the market crossed.
/// Prices outside the representable range clamp to "everything survives"
/// above and "nothing survives" below.
fn survival_boundary(price: u128) -> CoreResult<i32> {
    if price == 0 {
        return Err(KeelCoreError::InvalidPrice);
    }
    match tick_math::price_to_tick(price) {
        Ok(tick) => Ok(tick),
        Err(_) if price > tick_math::tick_to_price(MAX_TICK)? => Ok(MAX_TICK),
        Err(_) => Ok(MIN_TICK - 1),
    }
}

/// Liquidate every crossed tick, bounded by `max_iterations`
///
/// Freed collateral (tick value at the current price, measured against the
/// penalty-adjusted liquidation price) moves from the long side to the
/// vault; a negative tick value is bad debt the vault absorbs.
pub fn liquidate_ticks(
    ledger: &mut PositionLedger,
    vault: &mut VaultState,
    price: u128,
    penalty_bps: u16,
    max_iterations: u16,
) -> CoreResult<LiquidationEffects> {
    let boundary = survival_boundary(price)?;
    let mut effects = LiquidationEffects::default();

    while (effects.ticks.len() as u16) < max_iterations {
        let tick = match ledger.highest_populated_tick() {
            Some(tick) if tick > boundary => tick,
            _ => break,
        };

        let tick_price = tick_math::tick_to_price(tick)?;
        let price_without_penalty = tick_math::tick_price_without_penalty(tick, penalty_bps)?;
        let wiped = ledger.liquidate_tick(tick)?;
        let tick_value = position_value(wiped.total_expo, price, price_without_penalty)?;

        vault.transfer_long_to_vault(tick_value);
        vault.liquidation_boundary = Some((tick, wiped.version));

        effects.remaining_collateral = effects
            .remaining_collateral
            .checked_add(tick_value)
            .ok_or(KeelCoreError::MathOverflow)?;
        effects.ticks.push(TickLiquidationInfo {
            tick,
            tick_version: wiped.version,
            total_positions: wiped.positions.len(),
            total_expo: wiped.total_expo,
            remaining_collateral: tick_value,
            tick_price,
            price_without_penalty,
        });
    }

    if !effects.ticks.is_empty() {
        info!(
            ticks = effects.ticks.len(),
            remaining_collateral = effects.remaining_collateral,
            price,
            "liquidation pass"
        );
    }

    Ok(effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::WAD;
    use crate::types::{Address, Position};

    fn seed(ledger: &mut PositionLedger, tick: i32, amount: u128, expo: u128) {
        ledger
            .open_position(
                tick,
                Position {
                    user: Address::from_low_u64(tick as u64),
                    amount,
                    start_price: 2_000 * WAD,
                    total_expo: expo,
                    timestamp: 0,
                    validated: true,
                },
            )
            .unwrap();
    }

    fn setup(balance_long: u128, balance_vault: u128) -> (PositionLedger, VaultState) {
        let ledger = PositionLedger::new(100, WAD / 100).unwrap();
        let mut vault = VaultState::new(2_000 * WAD, 0);
        vault.balance_long = balance_long;
        vault.balance_vault = balance_vault;
        (ledger, vault)
    }

    #[test]
    fn test_no_tick_crossed() {
        let (mut ledger, mut vault) = setup(10 * WAD, 10 * WAD);
        // liquidation around price 1000, market at 2000
        let tick = tick_math::price_to_aligned_tick(1_000 * WAD, 100).unwrap();
        seed(&mut ledger, tick, 10 * WAD, 20 * WAD);

        let effects =
            liquidate_ticks(&mut ledger, &mut vault, 2_000 * WAD, 200, 10).unwrap();
        assert!(effects.ticks.is_empty());
        assert_eq!(ledger.total_positions(), 1);
    }

    #[test]
    fn test_single_tick_liquidated_with_penalty_pricing() {
        let (mut ledger, mut vault) = setup(10 * WAD, 10 * WAD);
        let tick = tick_math::price_to_aligned_tick(1_000 * WAD, 100).unwrap();
        seed(&mut ledger, tick, 10 * WAD, 20 * WAD);

        // price falls below the tick's nominal price
        let price = 990 * WAD;
        let effects = liquidate_ticks(&mut ledger, &mut vault, price, 200, 10).unwrap();
        assert_eq!(effects.ticks.len(), 1);

        let snapshot = &effects.ticks[0];
        assert_eq!(snapshot.tick, tick);
        assert_eq!(snapshot.total_positions, 1);
        assert_eq!(snapshot.total_expo, 20 * WAD);
        let expected_wo_penalty = tick_math::tick_price_without_penalty(tick, 200).unwrap();
        assert_eq!(snapshot.price_without_penalty, expected_wo_penalty);
        let expected_value =
            position_value(20 * WAD, price, expected_wo_penalty).unwrap();
        assert_eq!(snapshot.remaining_collateral, expected_value);

        // freed collateral moved long -> vault
        assert_eq!(vault.balance_vault, 10 * WAD + expected_value as u128);
        assert_eq!(ledger.total_positions(), 0);
        assert_eq!(ledger.tick_version(tick), 1);
    }

    #[test]
    fn test_walk_is_bounded_and_resumes() {
        let (mut ledger, mut vault) = setup(100 * WAD, 100 * WAD);
        // five populated ticks between ~1000 and ~1300
        let mut ticks = Vec::new();
        for price in [1_000u128, 1_050, 1_150, 1_250, 1_300] {
            let tick = tick_math::price_to_aligned_tick(price * WAD, 100).unwrap();
            if !ticks.contains(&tick) {
                seed(&mut ledger, tick, 10 * WAD, 20 * WAD);
                ticks.push(tick);
            }
        }
        let seeded = ticks.len();
        assert!(seeded >= 4);

        // market collapses below all of them, but the walk is capped at 2
        let effects = liquidate_ticks(&mut ledger, &mut vault, 500 * WAD, 200, 2).unwrap();
        assert_eq!(effects.ticks.len(), 2);
        assert_eq!(ledger.populated_count(), seeded - 2);

        // highest ticks went first
        let mut sorted = ticks.clone();
        sorted.sort_unstable();
        assert_eq!(effects.ticks[0].tick, sorted[seeded - 1]);
        assert_eq!(effects.ticks[1].tick, sorted[seeded - 2]);

        // a later call resumes and completes
        let effects = liquidate_ticks(&mut ledger, &mut vault, 500 * WAD, 200, 10).unwrap();
        assert_eq!(effects.ticks.len(), seeded - 2);
        assert_eq!(ledger.total_positions(), 0);
    }

    #[test]
    fn test_bad_debt_is_tracked_not_dropped() {
        let (mut ledger, mut vault) = setup(10 * WAD, 10 * WAD);
        let tick = tick_math::price_to_aligned_tick(1_000 * WAD, 100).unwrap();
        seed(&mut ledger, tick, 10 * WAD, 20 * WAD);

        // price gapped far below the liquidation price
        let effects = liquidate_ticks(&mut ledger, &mut vault, 500 * WAD, 200, 10).unwrap();
        assert_eq!(effects.ticks.len(), 1);
        assert!(effects.remaining_collateral < 0);
        // the vault absorbed the shortfall
        assert!(vault.balance_vault < 10 * WAD);
        assert!(vault.balance_long >= 10 * WAD);
    }
}
