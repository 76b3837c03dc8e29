//! # Vault State
//!
//! The global singleton every action mutates after accrual: the collateral
//! split between the vault side and the long side, funding bookkeeping, and
//! the stable-token conversion/rebase math.

use serde::{Deserialize, Serialize};

use tracing::info;

use crate::constants::WAD;
use crate::errors::{CoreResult, KeelCoreError};
use crate::math::{mul_div, Rounding};
use crate::token::StableToken;

/// Global vault and funding state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultState {
    /// Collateral backing the stable token, not allocated to longs (WAD)
    pub balance_vault: u128,
    /// Collateral currently attributed to the long side (WAD)
    pub balance_long: u128,
    /// Timestamp of the last funding/PnL accrual
    pub last_update_timestamp: u64,
    /// Price at the last accrual (WAD)
    pub last_price: u128,
    /// EMA of the per-day funding rate, signed WAD
    pub ema: i128,
    /// Boundary of the last liquidation pass: (tick, version before wipe)
    pub liquidation_boundary: Option<(i32, u64)>,
    /// Protocol share of collected fees, claimable by governance (WAD)
    pub pending_protocol_fee: u128,
    /// Timestamp of the last stable-token rebase
    pub last_rebase_timestamp: u64,
}

impl VaultState {
    /// Create the vault at a starting price and time
    pub fn new(price: u128, timestamp: u64) -> Self {
        Self {
            last_update_timestamp: timestamp,
            last_price: price,
            ..Self::default()
        }
    }

    /// Total collateral held by the protocol (WAD)
    pub fn total_balance(&self) -> u128 {
        self.balance_vault.saturating_add(self.balance_long)
    }

    /// Exposure backed by the vault rather than the longs' own collateral
    pub fn trading_expo(&self, total_expo: u128) -> u128 {
        total_expo.saturating_sub(self.balance_long)
    }

    /// Move value between the long side and the vault side, clamped
    ///
    /// Positive `amount` flows long -> vault. The transfer never moves more
    /// than the paying side holds, so total balance is conserved.
    pub fn transfer_long_to_vault(&mut self, amount: i128) {
        if amount >= 0 {
            let moved = (amount as u128).min(self.balance_long);
            self.balance_long -= moved;
            self.balance_vault = self.balance_vault.saturating_add(moved);
        } else {
            let moved = (amount.unsigned_abs()).min(self.balance_vault);
            self.balance_vault -= moved;
            self.balance_long = self.balance_long.saturating_add(moved);
        }
    }

    /// Stable tokens minted against a deposit at the given price
    ///
    /// The first deposit bootstraps the token at one unit of account; after
    /// that minting is proportional to the vault balance.
    pub fn tokens_to_mint(
        &self,
        amount: u128,
        price: u128,
        total_supply: u128,
    ) -> CoreResult<u128> {
        if amount == 0 {
            return Err(KeelCoreError::ZeroAmount);
        }
        if total_supply == 0 || self.balance_vault == 0 {
            return mul_div(amount, price, WAD, Rounding::Down);
        }
        mul_div(amount, total_supply, self.balance_vault, Rounding::Down)
    }

    /// Collateral released when burning stable tokens
    pub fn assets_for_tokens(&self, token_amount: u128, total_supply: u128) -> CoreResult<u128> {
        if token_amount == 0 {
            return Err(KeelCoreError::ZeroAmount);
        }
        if total_supply == 0 {
            return Err(KeelCoreError::EmptyVault);
        }
        mul_div(token_amount, self.balance_vault, total_supply, Rounding::Down)
    }

    /// Stable-token price in units of account (WAD)
    pub fn token_price(&self, asset_price: u128, total_supply: u128) -> CoreResult<u128> {
        if total_supply == 0 {
            return Err(KeelCoreError::EmptyVault);
        }
        mul_div(self.balance_vault, asset_price, total_supply, Rounding::Down)
    }

    /// Rebase the stable token if its price drifted above the threshold
    ///
    /// Returns whether a rebase fired. Skips silently when the interval has
    /// not elapsed, the token has no supply, or the price sits at or below
    /// the threshold.
    pub fn check_rebase(
        &mut self,
        asset_price: u128,
        now: u64,
        threshold: u128,
        interval: u64,
        token: &mut dyn StableToken,
    ) -> CoreResult<bool> {
        if now < self.last_rebase_timestamp.saturating_add(interval) {
            return Ok(false);
        }
        let supply = token.total_supply();
        if supply == 0 {
            return Ok(false);
        }
        let token_price = self.token_price(asset_price, supply)?;
        if token_price <= threshold {
            return Ok(false);
        }

        // scale the divisor back towards the one-unit target price
        let new_divisor = mul_div(token.divisor(), WAD, token_price, Rounding::Down)?;
        token.rebase(new_divisor)?;
        self.last_rebase_timestamp = now;
        info!(token_price, new_divisor, "stable token rebased");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::DivisorToken;
    use crate::types::Address;

    #[test]
    fn test_bootstrap_mint() {
        let vault = VaultState::new(2_000 * WAD, 0);
        let minted = vault.tokens_to_mint(10 * WAD, 2_000 * WAD, 0).unwrap();
        assert_eq!(minted, 20_000 * WAD);
    }

    #[test]
    fn test_proportional_mint_and_burn() {
        let mut vault = VaultState::new(2_000 * WAD, 0);
        vault.balance_vault = 100 * WAD;

        // supply 200k, vault 100: each token is backed by 0.0005 collateral
        let minted = vault
            .tokens_to_mint(10 * WAD, 2_000 * WAD, 200_000 * WAD)
            .unwrap();
        assert_eq!(minted, 20_000 * WAD);

        let released = vault.assets_for_tokens(20_000 * WAD, 200_000 * WAD).unwrap();
        assert_eq!(released, 10 * WAD);
    }

    #[test]
    fn test_transfer_clamps() {
        let mut vault = VaultState::new(WAD, 0);
        vault.balance_vault = 10 * WAD;
        vault.balance_long = 5 * WAD;

        vault.transfer_long_to_vault(20 * WAD as i128);
        assert_eq!(vault.balance_long, 0);
        assert_eq!(vault.balance_vault, 15 * WAD);

        vault.transfer_long_to_vault(-(40 * WAD as i128));
        assert_eq!(vault.balance_vault, 0);
        assert_eq!(vault.balance_long, 15 * WAD);
    }

    #[test]
    fn test_rebase_fires_above_threshold() {
        let mut vault = VaultState::new(2_000 * WAD, 0);
        let mut token = DivisorToken::new();

        // vault backs the supply 1:1.01 in units of account
        vault.balance_vault = 101 * WAD;
        token.mint(Address::from_low_u64(1), 200_000 * WAD).unwrap();
        vault.last_rebase_timestamp = 0;

        let rebased = vault
            .check_rebase(
                2_000 * WAD,
                100_000,
                WAD + WAD / 200, // 1.005 threshold
                3_600,
                &mut token,
            )
            .unwrap();
        assert!(rebased);
        // supply grew back to ~1 unit of account per token
        let price = vault.token_price(2_000 * WAD, token.total_supply()).unwrap();
        assert!(price >= WAD - WAD / 1_000_000 && price <= WAD + WAD / 1_000_000);
    }

    #[test]
    fn test_rebase_respects_interval() {
        let mut vault = VaultState::new(2_000 * WAD, 0);
        let mut token = DivisorToken::new();
        vault.balance_vault = 200 * WAD;
        token.mint(Address::from_low_u64(1), 200_000 * WAD).unwrap();
        vault.last_rebase_timestamp = 50;

        let rebased = vault
            .check_rebase(2_000 * WAD, 100, WAD, 3_600, &mut token)
            .unwrap();
        assert!(!rebased);
    }
}
