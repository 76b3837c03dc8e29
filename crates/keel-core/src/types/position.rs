//! # Position Types
//!
//! One leveraged long and the identifiers addressing it inside the
//! tick-indexed ledger.

use crate::types::Address;

/// Addresses one position slot in the ledger
///
/// The `tick_version` pins the generation of the tick bucket: after the tick
/// is liquidated the version is bumped and every id minted before then is
/// rejected with `OutdatedTick`. Within a live tick, a full close swaps the
/// last position into the vacated slot, so indices of *other* positions in
/// the same tick may be reassigned and must be re-resolved by their holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct PositionId {
    /// Liquidation-price bucket
    pub tick: i32,
    /// Generation of the tick bucket at creation
    pub tick_version: u64,
    /// Slot inside the tick's position array
    pub index: usize,
}

/// One leveraged long position
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub struct Position {
    /// Position owner
    pub user: Address,
    /// Collateral amount at open (WAD)
    pub amount: u128,
    /// Entry price (WAD)
    pub start_price: u128,
    /// Price-independent leveraged notional (WAD)
    pub total_expo: u128,
    /// Initiation timestamp
    pub timestamp: u64,
    /// False between initiate and validate of the opening
    pub validated: bool,
}

/// Snapshot of one liquidated tick, fed to the rewards manager
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct TickLiquidationInfo {
    /// The liquidated tick
    pub tick: i32,
    /// Tick version before the liquidation bumped it
    pub tick_version: u64,
    /// Number of positions wiped
    pub total_positions: usize,
    /// Aggregate exposure wiped (WAD)
    pub total_expo: u128,
    /// Collateral left after settling the adverse move; negative is bad debt
    pub remaining_collateral: i128,
    /// Nominal tick price, the liquidation trigger (WAD)
    pub tick_price: u128,
    /// Tick price net of the liquidation penalty (WAD)
    pub price_without_penalty: u128,
}
