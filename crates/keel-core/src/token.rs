//! # Stable Token Interface
//!
//! The rebasing stable token is an external collaborator; the engine only
//! depends on its shares-with-global-divisor conversion contract. Balances
//! live with the host; the engine tracks supply, divisor and the divisor
//! adjustments (rebases) it requests.

use serde::{Deserialize, Serialize};

use crate::constants::{TOKEN_MAX_DIVISOR, TOKEN_MIN_DIVISOR, WAD};
use crate::errors::{CoreResult, KeelCoreError};
use crate::math::{mul_div, Rounding};
use crate::types::Address;

/// Divisor-adjustment contract of the stable token
pub trait StableToken {
    /// Current token supply (WAD)
    fn total_supply(&self) -> u128;

    /// Current shares-to-token divisor (WAD)
    fn divisor(&self) -> u128;

    /// Mint tokens to an address
    fn mint(&mut self, to: Address, amount: u128) -> CoreResult<()>;

    /// Burn tokens held by the protocol escrow
    fn burn(&mut self, amount: u128) -> CoreResult<()>;

    /// Lower the divisor, growing every balance proportionally
    ///
    /// The divisor may only decrease and never below the minimum.
    fn rebase(&mut self, new_divisor: u128) -> CoreResult<()>;
}

/// Reference shares-ledger token
///
/// `tokens = shares * WAD / divisor`; a rebase lowers the divisor so every
/// holder's token balance grows without touching shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivisorToken {
    total_shares: u128,
    divisor: u128,
}

impl Default for DivisorToken {
    fn default() -> Self {
        Self {
            total_shares: 0,
            divisor: TOKEN_MAX_DIVISOR,
        }
    }
}

impl DivisorToken {
    /// Create an empty token ledger at the initial divisor
    pub fn new() -> Self {
        Self::default()
    }

    /// Total shares outstanding
    pub fn total_shares(&self) -> u128 {
        self.total_shares
    }
}

impl StableToken for DivisorToken {
    fn total_supply(&self) -> u128 {
        // divisor is validated nonzero at every mutation
        mul_div(self.total_shares, WAD, self.divisor, Rounding::Down).unwrap_or(0)
    }

    fn divisor(&self) -> u128 {
        self.divisor
    }

    fn mint(&mut self, _to: Address, amount: u128) -> CoreResult<()> {
        let shares = mul_div(amount, self.divisor, WAD, Rounding::Down)?;
        self.total_shares = self
            .total_shares
            .checked_add(shares)
            .ok_or(KeelCoreError::MathOverflow)?;
        Ok(())
    }

    fn burn(&mut self, amount: u128) -> CoreResult<()> {
        let shares = mul_div(amount, self.divisor, WAD, Rounding::Up)?;
        self.total_shares = self
            .total_shares
            .checked_sub(shares)
            .ok_or(KeelCoreError::MathUnderflow)?;
        Ok(())
    }

    fn rebase(&mut self, new_divisor: u128) -> CoreResult<()> {
        if new_divisor >= self.divisor {
            return Err(KeelCoreError::DivisorNotMonotonic);
        }
        if new_divisor < TOKEN_MIN_DIVISOR {
            return Err(KeelCoreError::DivisorTooSmall);
        }
        self.divisor = new_divisor;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_burn_round() {
        let mut token = DivisorToken::new();
        token.mint(Address::from_low_u64(1), 100 * WAD).unwrap();
        assert_eq!(token.total_supply(), 100 * WAD);

        token.burn(40 * WAD).unwrap();
        assert_eq!(token.total_supply(), 60 * WAD);

        assert_eq!(
            token.burn(100 * WAD),
            Err(KeelCoreError::MathUnderflow)
        );
    }

    #[test]
    fn test_rebase_grows_supply() {
        let mut token = DivisorToken::new();
        token.mint(Address::from_low_u64(1), 100 * WAD).unwrap();

        token.rebase(TOKEN_MAX_DIVISOR / 2).unwrap();
        assert_eq!(token.total_supply(), 200 * WAD);
        // shares untouched
        assert_eq!(token.total_shares(), 100 * WAD);
    }

    #[test]
    fn test_rebase_bounds() {
        let mut token = DivisorToken::new();
        assert_eq!(
            token.rebase(TOKEN_MAX_DIVISOR),
            Err(KeelCoreError::DivisorNotMonotonic)
        );
        assert_eq!(
            token.rebase(TOKEN_MIN_DIVISOR - 1),
            Err(KeelCoreError::DivisorTooSmall)
        );
        token.rebase(TOKEN_MIN_DIVISOR).unwrap();
    }
}
