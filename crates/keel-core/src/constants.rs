//! # Protocol Constants
//!
//! Fundamental constants for the Keel core engine:
//! - Fixed-point scales (WAD, basis points, Q64)
//! - Tick range bounds
//! - Funding and rebase timing
//! - Default protocol parameters

// ============================================================================
// Fixed-Point Scales
// ============================================================================

/// WAD fixed-point scale: all asset amounts and prices carry 18 decimals
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Q64 fixed-point scale used internally by tick math: 2^64
pub const Q64: u128 = 1u128 << 64;

/// Basis points denominator (10,000 = 100%)
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Maximum percentage in basis points (100%)
pub const MAX_BPS: u16 = 10_000;

// ============================================================================
// Tick Bounds
// ============================================================================

/// Minimum representable tick; below this, adjacent tick prices are no
/// longer distinguishable at WAD granularity
pub const MIN_TICK: i32 = -60_000;

/// Maximum representable tick (1.0005^MAX_TICK stays in the Q64 range)
pub const MAX_TICK: i32 = 80_000;

/// Relative width of one tick in basis points (base 1.0005 per tick)
pub const TICK_SIZE_BPS: u16 = 5;

/// Minimum tick spacing
pub const MIN_TICK_SPACING: i32 = 1;

/// Maximum tick spacing
pub const MAX_TICK_SPACING: i32 = 10_000;

// ============================================================================
// Timing
// ============================================================================

/// Funding rates are quoted per day
pub const SECONDS_PER_DAY: u64 = 86_400;

// ============================================================================
// Hard Limits
// ============================================================================

/// Upper bound on the per-call liquidation walk, whatever the configuration
pub const MAX_LIQUIDATION_ITERATION: u16 = 10;

/// Upper bound on stale pending actions swept by a single initiate call
pub const MAX_STALE_VALIDATIONS: u16 = 4;

/// Leverage of exactly 1x in WAD
pub const LEVERAGE_WAD: u128 = WAD;

/// Stable-token divisor at first mint (1.0, WAD)
pub const TOKEN_MAX_DIVISOR: u128 = WAD;

/// Floor under the stable-token divisor; rebases stop here
pub const TOKEN_MIN_DIVISOR: u128 = 1_000_000_000;

// ============================================================================
// Default Protocol Parameters
// ============================================================================

/// Default tick spacing (100 ticks = 5% buckets)
pub const DEFAULT_TICK_SPACING: i32 = 100;

/// Default minimum leverage (1x plus one part per billion)
pub const DEFAULT_MIN_LEVERAGE: u128 = WAD + 1_000_000_000;

/// Default maximum leverage (10x)
pub const DEFAULT_MAX_LEVERAGE: u128 = 10 * WAD;

/// Default liquidation penalty (2%)
pub const DEFAULT_LIQUIDATION_PENALTY_BPS: u16 = 200;

/// Default safety margin between the current price and the highest
/// accepted liquidation price (2%)
pub const DEFAULT_SAFETY_MARGIN_BPS: u16 = 200;

/// Default liquidation walk bound per call
pub const DEFAULT_LIQUIDATION_ITERATION_LIMIT: u16 = 10;

/// Default EMA period for the funding rate (8 hours)
pub const DEFAULT_EMA_PERIOD: u64 = 28_800;

/// Default funding scaling factor (5% per day at full imbalance, WAD)
pub const DEFAULT_FUNDING_SF: u128 = 50_000_000_000_000_000;

/// Default protocol share of collected fees (8%)
pub const DEFAULT_PROTOCOL_FEE_BPS: u16 = 800;

/// Default fee on position open/close notional (0.04%)
pub const DEFAULT_POSITION_FEE_BPS: u16 = 4;

/// Default fee on vault deposit/withdrawal (0.04%)
pub const DEFAULT_VAULT_FEE_BPS: u16 = 4;

/// Default minimum collateral left in a long position
pub const DEFAULT_MIN_LONG_POSITION: u128 = WAD / 100;

/// Default security deposit charged on initiate (0.5 asset units)
pub const DEFAULT_SECURITY_DEPOSIT: u128 = WAD / 2;

/// Default delay before a pending action becomes validatable (seconds)
pub const DEFAULT_VALIDATION_DELAY: u64 = 24;

/// Default deadline after which a pending action is validatable by anyone
/// for its security deposit (seconds)
pub const DEFAULT_VALIDATION_DEADLINE: u64 = 1_200;

/// Default exposure imbalance limits (basis points)
pub const DEFAULT_OPEN_IMBALANCE_LIMIT_BPS: i64 = 500;
pub const DEFAULT_DEPOSIT_IMBALANCE_LIMIT_BPS: i64 = 500;
pub const DEFAULT_WITHDRAWAL_IMBALANCE_LIMIT_BPS: i64 = 600;
pub const DEFAULT_CLOSE_IMBALANCE_LIMIT_BPS: i64 = 600;

/// Default rebalancer trigger thresholds (basis points)
pub const DEFAULT_REBALANCER_OPEN_THRESHOLD_BPS: i64 = 500;
pub const DEFAULT_REBALANCER_CLOSE_THRESHOLD_BPS: i64 = 600;

/// Default stable-token price above which a rebase fires (1.005, WAD)
pub const DEFAULT_REBASE_THRESHOLD: u128 = WAD + 5_000_000_000_000_000;

/// Default minimum interval between rebases (12 hours)
pub const DEFAULT_REBASE_INTERVAL: u64 = 43_200;

// ============================================================================
// Helper Functions
// ============================================================================

/// Check that a tick spacing is within the accepted range
pub const fn is_valid_tick_spacing(spacing: i32) -> bool {
    spacing >= MIN_TICK_SPACING && spacing <= MAX_TICK_SPACING
}
