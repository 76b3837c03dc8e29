//! # Core Types
//!
//! Plain data types shared across the engine: addresses, positions,
//! pending actions and outcome reports.

pub mod action;
pub mod position;

pub use action::{
    ActionKind, ActionPayload, CloseOutcome, DepositOutcome, LiquidationReport, OpenOutcome,
    PendingAction, ProtocolAction, SecurityRefund, ValidateOpenOutcome, ValidatedAction,
    WithdrawalOutcome,
};
pub use position::{Position, PositionId, TickLiquidationInfo};

use std::fmt;

/// Opaque 32-byte account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub struct Address(pub [u8; 32]);

impl Address {
    /// The zero address, never a valid destination
    pub const ZERO: Address = Address([0u8; 32]);

    /// Whether this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Build an address from a low u64, for tests and fixtures
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Address(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Rebalancer action recommended after a liquidation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub enum RebalancerAction {
    /// Imbalance within bounds, nothing to do
    #[default]
    None,
    /// A rebalancing position should be opened
    Opened,
    /// The current rebalancing position should be closed
    Closed,
    /// The current position should be closed and a new one opened
    ClosedOpened,
}
