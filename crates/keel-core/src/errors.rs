//! # Core Error Types
//!
//! Single crate-wide error enum covering the whole taxonomy: input
//! validation, temporal, arithmetic, ledger/structural and oracle errors.
//! Every error aborts the whole call; nothing is recovered mid-call.

use thiserror::Error;

use crate::types::ActionKind;

/// Core protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "client", derive(serde::Serialize))]
pub enum KeelCoreError {
    // ========================================================================
    // Math Errors
    // ========================================================================

    #[error("Math overflow")]
    MathOverflow,

    #[error("Math underflow")]
    MathUnderflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Mul div overflow")]
    MulDivOverflow,

    #[error("Conversion error")]
    ConversionError,

    // ========================================================================
    // Tick Errors
    // ========================================================================

    #[error("Invalid tick {0}")]
    InvalidTick(i32),

    #[error("Tick {0} out of range")]
    TickOutOfRange(i32),

    #[error("Invalid tick spacing {0}")]
    InvalidTickSpacing(i32),

    #[error("Outdated tick version: expected {expected}, found {found}")]
    OutdatedTick { expected: u64, found: u64 },

    #[error("Invalid price")]
    InvalidPrice,

    // ========================================================================
    // Ledger Errors
    // ========================================================================

    #[error("Position index {index} out of bounds for tick {tick}")]
    InvalidPositionIndex { tick: i32, index: usize },

    #[error("Position collateral {amount} below the minimum {min}")]
    PositionTooSmall { amount: u128, min: u128 },

    #[error("Position is not validated yet")]
    PositionNotValidated,

    #[error("Caller is not the position owner")]
    Unauthorized,

    // ========================================================================
    // Input Validation Errors
    // ========================================================================

    #[error("Amount is zero")]
    ZeroAmount,

    #[error("Invalid destination address")]
    InvalidAddressTo,

    #[error("Leverage {0} below the protocol minimum")]
    LeverageTooLow(u128),

    #[error("Leverage {0} above the protocol maximum")]
    LeverageTooHigh(u128),

    #[error("Liquidation price {desired} above the safety margin limit {limit}")]
    LiquidationPriceSafetyMargin { desired: u128, limit: u128 },

    #[error("Exposure imbalance {0} bps beyond the configured limit")]
    ImbalanceLimitReached(i64),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    // ========================================================================
    // Temporal Errors
    // ========================================================================

    #[error("Price timestamp {got} earlier than required {required}")]
    TimestampTooEarly { required: u64, got: u64 },

    #[error("Price timestamp {got} too old, minimum accepted {min}")]
    PriceTooOld { min: u64, got: u64 },

    #[error("Price timestamp {got} ahead of the reference time {now}")]
    PriceTooRecent { now: u64, got: u64 },

    #[error("A pending action already exists for this validator")]
    PendingActionActive,

    #[error("No pending action for this validator")]
    NoPendingAction,

    #[error("Pending action kind mismatch: expected {expected:?}, found {found:?}")]
    ActionKindMismatch {
        expected: ActionKind,
        found: ActionKind,
    },

    #[error("Validation deadline has not elapsed")]
    DeadlineNotElapsed,

    // ========================================================================
    // Deposit / Fee Errors
    // ========================================================================

    #[error("Security deposit mismatch: expected {expected}, provided {provided}")]
    SecurityDepositMismatch { expected: u128, provided: u128 },

    #[error("Oracle fee mismatch: expected {expected}, provided {provided}")]
    OracleFeeMismatch { expected: u128, provided: u128 },

    // ========================================================================
    // Oracle Errors
    // ========================================================================

    #[error("Oracle returned a non-positive price")]
    OracleNegativePrice,

    #[error("Oracle data rejected: {0}")]
    OracleValidationFailed(&'static str),

    #[error("Oracle data required for this action")]
    OracleDataRequired,

    // ========================================================================
    // Vault / Token Errors
    // ========================================================================

    #[error("Vault has no collateral")]
    EmptyVault,

    #[error("Vault balance {available} insufficient for {required}")]
    InsufficientVaultBalance { required: u128, available: u128 },

    #[error("Stable token divisor may only decrease")]
    DivisorNotMonotonic,

    #[error("Stable token divisor below the minimum")]
    DivisorTooSmall,
}

/// Result type using core errors
pub type CoreResult<T> = Result<T, KeelCoreError>;

impl KeelCoreError {
    /// Create a kind-mismatch error
    pub fn kind_mismatch(expected: ActionKind, found: ActionKind) -> Self {
        Self::ActionKindMismatch { expected, found }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KeelCoreError::OutdatedTick {
            expected: 3,
            found: 2,
        };
        assert_eq!(
            format!("{err}"),
            "Outdated tick version: expected 3, found 2"
        );

        let err = KeelCoreError::PositionTooSmall {
            amount: 5,
            min: 10,
        };
        assert_eq!(
            format!("{err}"),
            "Position collateral 5 below the minimum 10"
        );
    }

    #[test]
    fn test_kind_mismatch_helper() {
        let err = KeelCoreError::kind_mismatch(ActionKind::Deposit, ActionKind::Withdrawal);
        assert!(format!("{err}").contains("Deposit"));
    }
}
