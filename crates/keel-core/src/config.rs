//! # Protocol Parameters
//!
//! Tunable parameters of a protocol instance, loadable from a TOML file.
//! Defaults carry the reference deployment values; deliberately
//! configuration-driven knobs (liquidation walk bound, EMA period, funding
//! scaling factor) are fields here rather than hard-coded constants.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::errors::{CoreResult, KeelCoreError};

/// Protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    /// Spacing between usable ticks
    pub tick_spacing: i32,

    /// Minimum position leverage (WAD)
    #[serde(with = "wad_serde")]
    pub min_leverage: u128,

    /// Maximum position leverage (WAD)
    #[serde(with = "wad_serde")]
    pub max_leverage: u128,

    /// Liquidation penalty applied below the tick price (basis points)
    pub liquidation_penalty_bps: u16,

    /// Gap required between the current price and a new position's
    /// liquidation price (basis points)
    pub safety_margin_bps: u16,

    /// Ticks liquidated per call at most
    pub liquidation_iteration_limit: u16,

    /// Funding-rate EMA period in seconds; zero short-circuits the EMA to
    /// the instantaneous rate
    pub ema_period: u64,

    /// Funding scaling factor bounding rate sensitivity to imbalance (WAD)
    #[serde(with = "wad_serde")]
    pub funding_sf: u128,

    /// Protocol share of collected fees (basis points)
    pub protocol_fee_bps: u16,

    /// Fee on position open/close notional (basis points)
    pub position_fee_bps: u16,

    /// Fee on vault deposit/withdrawal (basis points)
    pub vault_fee_bps: u16,

    /// Minimum collateral that must remain in a long position (WAD)
    #[serde(with = "wad_serde")]
    pub min_long_position: u128,

    /// Security deposit charged on every initiate (WAD)
    #[serde(with = "wad_serde")]
    pub security_deposit_value: u128,

    /// Delay before a pending action becomes validatable (seconds)
    pub validation_delay: u64,

    /// Deadline after which anyone may validate a pending action for its
    /// security deposit (seconds)
    pub validation_deadline: u64,

    /// Stale actions swept from the queue front per initiate call
    pub max_stale_validations: u16,

    /// Exposure imbalance limits per action kind (basis points)
    pub open_imbalance_limit_bps: i64,
    pub deposit_imbalance_limit_bps: i64,
    pub withdrawal_imbalance_limit_bps: i64,
    pub close_imbalance_limit_bps: i64,

    /// Rebalancer trigger thresholds (basis points)
    pub rebalancer_open_threshold_bps: i64,
    pub rebalancer_close_threshold_bps: i64,

    /// Stable-token price above which a rebase fires (WAD)
    #[serde(with = "wad_serde")]
    pub rebase_threshold: u128,

    /// Minimum interval between rebases (seconds)
    pub rebase_interval: u64,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            tick_spacing: DEFAULT_TICK_SPACING,
            min_leverage: DEFAULT_MIN_LEVERAGE,
            max_leverage: DEFAULT_MAX_LEVERAGE,
            liquidation_penalty_bps: DEFAULT_LIQUIDATION_PENALTY_BPS,
            safety_margin_bps: DEFAULT_SAFETY_MARGIN_BPS,
            liquidation_iteration_limit: DEFAULT_LIQUIDATION_ITERATION_LIMIT,
            ema_period: DEFAULT_EMA_PERIOD,
            funding_sf: DEFAULT_FUNDING_SF,
            protocol_fee_bps: DEFAULT_PROTOCOL_FEE_BPS,
            position_fee_bps: DEFAULT_POSITION_FEE_BPS,
            vault_fee_bps: DEFAULT_VAULT_FEE_BPS,
            min_long_position: DEFAULT_MIN_LONG_POSITION,
            security_deposit_value: DEFAULT_SECURITY_DEPOSIT,
            validation_delay: DEFAULT_VALIDATION_DELAY,
            validation_deadline: DEFAULT_VALIDATION_DEADLINE,
            max_stale_validations: 1,
            open_imbalance_limit_bps: DEFAULT_OPEN_IMBALANCE_LIMIT_BPS,
            deposit_imbalance_limit_bps: DEFAULT_DEPOSIT_IMBALANCE_LIMIT_BPS,
            withdrawal_imbalance_limit_bps: DEFAULT_WITHDRAWAL_IMBALANCE_LIMIT_BPS,
            close_imbalance_limit_bps: DEFAULT_CLOSE_IMBALANCE_LIMIT_BPS,
            rebalancer_open_threshold_bps: DEFAULT_REBALANCER_OPEN_THRESHOLD_BPS,
            rebalancer_close_threshold_bps: DEFAULT_REBALANCER_CLOSE_THRESHOLD_BPS,
            rebase_threshold: DEFAULT_REBASE_THRESHOLD,
            rebase_interval: DEFAULT_REBASE_INTERVAL,
        }
    }
}

impl ProtocolParams {
    /// Load parameters from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|_| KeelCoreError::InvalidParameter("unreadable parameter file"))?;
        Self::from_toml(&contents)
    }

    /// Parse parameters from a TOML string
    pub fn from_toml(contents: &str) -> CoreResult<Self> {
        let params: Self = toml::from_str(contents)
            .map_err(|_| KeelCoreError::InvalidParameter("malformed parameter file"))?;
        params.validate()?;
        Ok(params)
    }

    /// Check internal consistency
    pub fn validate(&self) -> CoreResult<()> {
        if !is_valid_tick_spacing(self.tick_spacing) {
            return Err(KeelCoreError::InvalidTickSpacing(self.tick_spacing));
        }
        if self.min_leverage <= LEVERAGE_WAD {
            return Err(KeelCoreError::InvalidParameter("min_leverage must exceed 1x"));
        }
        if self.max_leverage <= self.min_leverage {
            return Err(KeelCoreError::InvalidParameter(
                "max_leverage must exceed min_leverage",
            ));
        }
        if self.liquidation_penalty_bps >= MAX_BPS {
            return Err(KeelCoreError::InvalidParameter(
                "liquidation_penalty_bps must stay below 100%",
            ));
        }
        if self.safety_margin_bps >= MAX_BPS {
            return Err(KeelCoreError::InvalidParameter(
                "safety_margin_bps must stay below 100%",
            ));
        }
        if self.liquidation_iteration_limit == 0
            || self.liquidation_iteration_limit > MAX_LIQUIDATION_ITERATION
        {
            return Err(KeelCoreError::InvalidParameter(
                "liquidation_iteration_limit out of range",
            ));
        }
        if self.max_stale_validations > MAX_STALE_VALIDATIONS {
            return Err(KeelCoreError::InvalidParameter(
                "max_stale_validations out of range",
            ));
        }
        if self.position_fee_bps >= MAX_BPS
            || self.vault_fee_bps >= MAX_BPS
            || self.protocol_fee_bps > MAX_BPS
        {
            return Err(KeelCoreError::InvalidParameter("fee out of range"));
        }
        if self.validation_deadline <= self.validation_delay {
            return Err(KeelCoreError::InvalidParameter(
                "validation_deadline must exceed validation_delay",
            ));
        }
        if self.rebase_threshold < WAD {
            return Err(KeelCoreError::InvalidParameter(
                "rebase_threshold below the token target price",
            ));
        }
        Ok(())
    }
}

/// WAD amounts exceed the TOML integer range; encode them as decimal strings
mod wad_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
