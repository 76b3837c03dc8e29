//! # Liquidation Rewards
//!
//! The reward paid to whoever lands a liquidation is computed by an
//! external parameter contract; the engine only supplies the liquidation
//! outcome. A deterministic reference implementation is provided.

use serde::{Deserialize, Serialize};

use crate::constants::WAD;
use crate::math::fixed_point::bps_of;
use crate::oracle::PriceBlob;
use crate::types::{ProtocolAction, RebalancerAction, TickLiquidationInfo};

/// Pure reward computation over a liquidation outcome
pub trait LiquidationRewardsManager {
    /// Reward for a pass that liquidated `ticks`, in collateral (WAD)
    #[allow(clippy::too_many_arguments)]
    fn get_liquidation_rewards(
        &self,
        ticks: &[TickLiquidationInfo],
        current_price: u128,
        rebased: bool,
        rebalancer_action: RebalancerAction,
        action: ProtocolAction,
        rebase_callback_result: Option<u128>,
        blob: &PriceBlob,
    ) -> u128;
}

/// Reference rewards schedule
///
/// `base + per_tick * ticks + per_position * positions + share of the freed
/// collateral`, with flat bonuses when the pass also triggered a rebase or
/// the rebalancer. Zero when nothing was liquidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardRewardsManager {
    /// Flat reward per successful pass (WAD)
    pub base_reward: u128,
    /// Reward per liquidated tick (WAD)
    pub per_tick_reward: u128,
    /// Reward per liquidated position (WAD)
    pub per_position_reward: u128,
    /// Share of the positive freed collateral (basis points)
    pub collateral_share_bps: u16,
    /// Bonus when the pass triggered a rebase (WAD)
    pub rebase_bonus: u128,
    /// Bonus when the pass triggered the rebalancer (WAD)
    pub rebalancer_bonus: u128,
}

impl Default for StandardRewardsManager {
    fn default() -> Self {
        Self {
            base_reward: WAD / 1_000,
            per_tick_reward: WAD / 2_000,
            per_position_reward: WAD / 10_000,
            collateral_share_bps: 10,
            rebase_bonus: WAD / 5_000,
            rebalancer_bonus: WAD / 5_000,
        }
    }
}

impl LiquidationRewardsManager for StandardRewardsManager {
    fn get_liquidation_rewards(
        &self,
        ticks: &[TickLiquidationInfo],
        _current_price: u128,
        rebased: bool,
        rebalancer_action: RebalancerAction,
        _action: ProtocolAction,
        _rebase_callback_result: Option<u128>,
        _blob: &PriceBlob,
    ) -> u128 {
        if ticks.is_empty() {
            return 0;
        }

        let positions: usize = ticks.iter().map(|t| t.total_positions).sum();
        let freed: i128 = ticks
            .iter()
            .map(|t| t.remaining_collateral)
            .sum::<i128>()
            .max(0);

        let mut reward = self.base_reward;
        reward = reward.saturating_add(self.per_tick_reward.saturating_mul(ticks.len() as u128));
        reward =
            reward.saturating_add(self.per_position_reward.saturating_mul(positions as u128));
        reward = reward
            .saturating_add(bps_of(freed as u128, self.collateral_share_bps).unwrap_or(0));
        if rebased {
            reward = reward.saturating_add(self.rebase_bonus);
        }
        if rebalancer_action != RebalancerAction::None {
            reward = reward.saturating_add(self.rebalancer_bonus);
        }
        reward
    }
}
