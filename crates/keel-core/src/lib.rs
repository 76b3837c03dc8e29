//! # Keel Core - Protocol Engine
//!
//! Deterministic accounting engine for the Keel leveraged-trading protocol:
//! a collateral vault minting a rebasing stable token, leveraged longs
//! indexed by liquidation-price ticks, and the two-phase action machinery
//! bridging user calls with asynchronous oracle price delivery. It provides:
//!
//! - Fixed-point and tick math
//! - The tick-indexed position ledger
//! - Funding/PnL accrual and the bounded liquidation walk
//! - The initiate/validate action state machine
//! - Oracle, rewards, token and rebalancer collaborator interfaces
//!
//! The crate holds no clock and no asset custody: hosts pass timestamps in
//! and execute the transfers the outcome values describe.
//!
//! ## Feature Flags
//!
//! - `client`: enables borsh wire serialization for embedding hosts

pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod math;
pub mod oracle;
pub mod rewards;
pub mod token;
pub mod types;
pub mod vault;

// Re-export commonly used items
pub use config::ProtocolParams;
pub use engine::{Collaborators, Protocol};
pub use errors::{CoreResult, KeelCoreError};
pub use types::*;
