//! # Action Types
//!
//! The two-phase action vocabulary: pending-action records queued between
//! initiate and validate, the oracle-facing action tags, and the outcome
//! reports returned by the entry points.

use crate::types::{Address, PositionId, RebalancerAction, TickLiquidationInfo};

/// Kind of a two-phase user action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub enum ActionKind {
    Deposit,
    Withdrawal,
    OpenPosition,
    ClosePosition,
}

/// Action tag handed to the oracle middleware
///
/// Initiations may settle on a degraded (cached or fallback) price source;
/// validations and liquidations require confirmed data for their target
/// timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub enum ProtocolAction {
    None,
    InitiateDeposit,
    ValidateDeposit,
    InitiateWithdrawal,
    ValidateWithdrawal,
    InitiateOpenPosition,
    ValidateOpenPosition,
    InitiateClosePosition,
    ValidateClosePosition,
    Liquidation,
}

impl ProtocolAction {
    /// Oracle action for the initiation phase of a kind
    pub fn initiate(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Deposit => Self::InitiateDeposit,
            ActionKind::Withdrawal => Self::InitiateWithdrawal,
            ActionKind::OpenPosition => Self::InitiateOpenPosition,
            ActionKind::ClosePosition => Self::InitiateClosePosition,
        }
    }

    /// Oracle action for the validation phase of a kind
    pub fn validate(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Deposit => Self::ValidateDeposit,
            ActionKind::Withdrawal => Self::ValidateWithdrawal,
            ActionKind::OpenPosition => Self::ValidateOpenPosition,
            ActionKind::ClosePosition => Self::ValidateClosePosition,
        }
    }
}

/// Kind-specific payload of a pending action
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum ActionPayload {
    /// Assets escrowed, waiting to be priced and minted against
    Deposit { amount: u128 },
    /// Stable-token shares escrowed, waiting to be converted out
    Withdrawal { shares: u128 },
    /// Position inserted unvalidated, waiting to be repriced
    OpenPosition { position_id: PositionId },
    /// Ledger entry already reduced; value held until settlement
    ClosePosition {
        /// Collateral share being closed (WAD)
        amount: u128,
        /// Exposure share being closed (WAD)
        total_expo: u128,
        /// Liquidation price net of penalty frozen at initiation (WAD)
        liq_price_wo_penalty: u128,
        /// Liquidation trigger price frozen at initiation (WAD)
        liq_price: u128,
        /// Long-side value withheld at initiation (WAD)
        value_held: u128,
    },
}

impl ActionPayload {
    /// The action kind this payload belongs to
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Deposit { .. } => ActionKind::Deposit,
            Self::Withdrawal { .. } => ActionKind::Withdrawal,
            Self::OpenPosition { .. } => ActionKind::OpenPosition,
            Self::ClosePosition { .. } => ActionKind::ClosePosition,
        }
    }
}

/// One in-flight two-phase action, at most one per validator address
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct PendingAction {
    /// Address that must (or may, after the deadline, anyone) validate
    pub validator: Address,
    /// Destination of the action's proceeds
    pub to: Address,
    /// Initiation timestamp
    pub timestamp: u64,
    /// Refundable stake charged at initiation (WAD)
    pub security_deposit: u128,
    /// Kind-specific data
    pub payload: ActionPayload,
}

impl PendingAction {
    /// The action kind
    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}

// ============================================================================
// Outcome Reports
// ============================================================================

/// Result of a validated deposit
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct DepositOutcome {
    /// Stable-token shares minted to the destination
    pub minted_shares: u128,
    /// Vault fee retained (WAD)
    pub fee: u128,
}

/// Result of a validated withdrawal
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct WithdrawalOutcome {
    /// Assets released to the destination (WAD)
    pub asset_out: u128,
    /// Vault fee retained (WAD)
    pub fee: u128,
}

/// Result of an opened (or repriced) position
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct OpenOutcome {
    /// Ledger slot of the position
    pub id: PositionId,
    /// Exposure booked (WAD)
    pub total_expo: u128,
    /// Leverage at the booked entry price (WAD)
    pub leverage: u128,
}

/// Result of validating a position opening
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum ValidateOpenOutcome {
    /// Position confirmed, possibly moved to a lower tick by the leverage cap
    Validated(OpenOutcome),
    /// The position's tick was liquidated while the action was in flight
    Liquidated,
}

/// Result of a validated close
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CloseOutcome {
    /// Assets released to the destination (WAD); zero if liquidated in flight
    pub asset_out: u128,
    /// Position fee retained (WAD)
    pub fee: u128,
    /// True when the price crossed the liquidation price before settlement
    pub liquidated: bool,
}

/// Where a validated action's security deposit goes
///
/// The initiator when they validate their own action; the caller when a
/// third party resolves it past the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct SecurityRefund {
    /// Recipient of the deposit
    pub to: Address,
    /// Deposit amount (WAD)
    pub amount: u128,
}

/// Outcome of validating any pending action, kind-tagged
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum ValidatedAction {
    Deposit(DepositOutcome),
    Withdrawal(WithdrawalOutcome),
    Open(ValidateOpenOutcome),
    Close(CloseOutcome),
}

/// Aggregate result of a liquidation pass
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct LiquidationReport {
    /// Per-tick snapshots, in the order they were processed
    pub ticks: Vec<TickLiquidationInfo>,
    /// Sum of collateral freed across ticks; negative is bad debt
    pub remaining_collateral: i128,
    /// Whether the accrual step triggered a stable-token rebase
    pub rebased: bool,
    /// Rebalancer decision evaluated after the pass
    pub rebalancer_action: RebalancerAction,
    /// Liquidator reward granted from the vault (WAD)
    pub rewards: u128,
}

impl LiquidationReport {
    /// Number of ticks liquidated by the pass
    pub fn liquidated_ticks(&self) -> usize {
        self.ticks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_action_serde_round_trip() {
        let action = PendingAction {
            validator: Address::from_low_u64(7),
            to: Address::from_low_u64(8),
            timestamp: 1_234,
            security_deposit: 500,
            payload: ActionPayload::ClosePosition {
                amount: 10,
                total_expo: 20,
                liq_price_wo_penalty: 980,
                liq_price: 1_000,
                value_held: 9,
            },
        };
        let encoded = serde_json::to_string(&action).unwrap();
        let decoded: PendingAction = serde_json::from_str(&encoded).unwrap();
        assert_eq!(action, decoded);
    }

    #[test]
    fn test_payload_kind() {
        let payload = ActionPayload::Deposit { amount: 1 };
        assert_eq!(payload.kind(), ActionKind::Deposit);

        let payload = ActionPayload::OpenPosition {
            position_id: PositionId {
                tick: 0,
                tick_version: 0,
                index: 0,
            },
        };
        assert_eq!(payload.kind(), ActionKind::OpenPosition);
    }

    #[test]
    fn test_oracle_action_mapping() {
        assert_eq!(
            ProtocolAction::initiate(ActionKind::Deposit),
            ProtocolAction::InitiateDeposit
        );
        assert_eq!(
            ProtocolAction::validate(ActionKind::ClosePosition),
            ProtocolAction::ValidateClosePosition
        );
    }
}
