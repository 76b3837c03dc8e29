//! # Rebalancer Trigger
//!
//! After each liquidation pass the engine measures the protocol-level
//! imbalance and, past the configured thresholds, recommends opening or
//! closing the subsidized rebalancing position. The engine holds no
//! rebalancer state; the collaborator reports back what it actually did.

use crate::config::ProtocolParams;
use crate::errors::CoreResult;
use crate::math::fixed_point::imbalance_bps;
use crate::types::RebalancerAction;

/// Context handed to the rebalancer collaborator on a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerContext {
    /// Signed protocol imbalance in basis points
    pub imbalance_bps: i64,
    /// Action the engine recommends
    pub intent: RebalancerAction,
    /// Current neutral price (WAD)
    pub current_price: u128,
    /// Exposure backed by the vault (WAD)
    pub trading_expo: u128,
    /// Vault-side collateral (WAD)
    pub balance_vault: u128,
}

/// Collaborator maintaining the subsidized rebalancing position
pub trait Rebalancer {
    /// React to a trigger; returns the action actually performed
    fn on_trigger(&mut self, ctx: &TriggerContext) -> CoreResult<RebalancerAction>;
}

/// Trigger decision from the current imbalance
///
/// A vault-heavy protocol (imbalance below the negative open threshold)
/// wants a rebalancing long opened; a long-heavy protocol past the close
/// threshold wants it closed.
pub fn evaluate(
    trading_expo: u128,
    balance_vault: u128,
    params: &ProtocolParams,
) -> CoreResult<(i64, RebalancerAction)> {
    let imbalance = imbalance_bps(trading_expo, balance_vault)?;
    let intent = if imbalance <= -params.rebalancer_open_threshold_bps {
        RebalancerAction::Opened
    } else if imbalance >= params.rebalancer_close_threshold_bps {
        RebalancerAction::Closed
    } else {
        RebalancerAction::None
    };
    Ok((imbalance, intent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::WAD;

    #[test]
    fn test_balanced_is_quiet() {
        let params = ProtocolParams::default();
        let (imb, intent) = evaluate(100 * WAD, 100 * WAD, &params).unwrap();
        assert_eq!(imb, 0);
        assert_eq!(intent, RebalancerAction::None);
    }

    #[test]
    fn test_vault_heavy_opens() {
        let params = ProtocolParams::default();
        // trading expo 10% below the vault: -1000 bps
        let (imb, intent) = evaluate(90 * WAD, 100 * WAD, &params).unwrap();
        assert_eq!(imb, -1_000);
        assert_eq!(intent, RebalancerAction::Opened);
    }

    #[test]
    fn test_long_heavy_closes() {
        let params = ProtocolParams::default();
        let (imb, intent) = evaluate(110 * WAD, 100 * WAD, &params).unwrap();
        assert_eq!(imb, 1_000);
        assert_eq!(intent, RebalancerAction::Closed);
    }

    #[test]
    fn test_within_thresholds() {
        let params = ProtocolParams::default();
        // 400 bps, under both 500 bps thresholds
        let (_, intent) = evaluate(104 * WAD, 100 * WAD, &params).unwrap();
        assert_eq!(intent, RebalancerAction::None);
    }
}
