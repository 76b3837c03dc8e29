//! # Price Sources
//!
//! One implementation of the [`PriceSource`] capability per external data
//! source, selected by configuration through the tagged [`PriceFeed`] enum.
//! Each source receives the already-verified sample for its feed; a blob
//! from a different source is rejected, not coerced.

use serde::{Deserialize, Serialize};

use crate::errors::{CoreResult, KeelCoreError};
use crate::oracle::PriceInfo;
use crate::types::ProtocolAction;

/// Pre-verified sample from a Pyth feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub struct PythSample {
    /// Price mantissa
    pub price: i64,
    /// Confidence interval, same scale as the price
    pub conf: u64,
    /// Decimal exponent (price = mantissa * 10^expo)
    pub expo: i32,
    /// Publish time
    pub publish_time: u64,
    /// Update fee attached to the sample (WAD)
    pub fee: u128,
}

/// Pre-verified round from a Chainlink aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub struct ChainlinkRound {
    /// Round answer, `decimals` decimals
    pub answer: i128,
    /// Round update time
    pub updated_at: u64,
}

/// Pre-verified Redstone payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub struct RedstoneSample {
    /// Price, `decimals` decimals
    pub price: u128,
    /// Sample time
    pub timestamp: u64,
}

/// Pre-verified Chainlink Data Streams report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub struct DataStreamsReport {
    /// Benchmark price, 18 decimals
    pub price: i128,
    /// Timestamp the report observations were made at
    pub observations_timestamp: u64,
    /// Fee billed in the native asset (WAD)
    pub native_fee: u128,
}

/// Source-tagged price payload handed through the entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub enum PriceBlob {
    Pyth(PythSample),
    Chainlink(ChainlinkRound),
    Redstone(RedstoneSample),
    DataStreams(DataStreamsReport),
}

impl PriceBlob {
    /// Fee the source bills for validating this blob (WAD)
    pub fn fee(&self) -> u128 {
        match self {
            Self::Pyth(sample) => sample.fee,
            Self::DataStreams(report) => report.native_fee,
            Self::Chainlink(_) | Self::Redstone(_) => 0,
        }
    }
}

/// Capability every price source exposes
pub trait PriceSource {
    /// Validate a blob into a usable price
    fn validate(
        &self,
        target_timestamp: u64,
        action: ProtocolAction,
        blob: &PriceBlob,
    ) -> CoreResult<PriceInfo>;
}

/// Pyth source configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythSource {
    /// Maximum accepted confidence interval relative to the price (bps)
    pub max_conf_bps: u16,
}

/// Chainlink aggregator source configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainlinkSource {
    /// Feed decimals
    pub decimals: u32,
    /// Maximum round age relative to the target timestamp (seconds)
    pub heartbeat: u64,
}

/// Redstone source configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedstoneSource {
    /// Feed decimals
    pub decimals: u32,
    /// Maximum sample age relative to the target timestamp (seconds)
    pub heartbeat: u64,
}

/// Chainlink Data Streams source configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStreamsSource {
    /// Maximum report age relative to the target timestamp (seconds)
    pub max_age: u64,
}

/// Configured data source, tagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceFeed {
    Pyth(PythSource),
    Chainlink(ChainlinkSource),
    Redstone(RedstoneSource),
    DataStreams(DataStreamsSource),
}

impl PriceSource for PriceFeed {
    fn validate(
        &self,
        target_timestamp: u64,
        action: ProtocolAction,
        blob: &PriceBlob,
    ) -> CoreResult<PriceInfo> {
        match self {
            Self::Pyth(source) => source.validate(target_timestamp, action, blob),
            Self::Chainlink(source) => source.validate(target_timestamp, action, blob),
            Self::Redstone(source) => source.validate(target_timestamp, action, blob),
            Self::DataStreams(source) => source.validate(target_timestamp, action, blob),
        }
    }
}

/// Scale a positive integer price with `decimals` decimals to WAD
fn scale_to_wad(value: u128, decimals: u32) -> CoreResult<u128> {
    if decimals == 18 {
        return Ok(value);
    }
    if decimals < 18 {
        let factor = 10u128
            .checked_pow(18 - decimals)
            .ok_or(KeelCoreError::ConversionError)?;
        value
            .checked_mul(factor)
            .ok_or(KeelCoreError::MathOverflow)
    } else {
        let factor = 10u128
            .checked_pow(decimals - 18)
            .ok_or(KeelCoreError::ConversionError)?;
        Ok(value / factor)
    }
}

/// Shift the neutral price against the caller by the confidence interval
///
/// Opening a long settles at the high end of the interval; withdrawals and
/// closes value the caller's claim at the low end. Everything else sees the
/// neutral price.
fn apply_confidence(neutral: u128, conf: u128, action: ProtocolAction) -> u128 {
    match action {
        ProtocolAction::InitiateOpenPosition | ProtocolAction::ValidateOpenPosition => {
            neutral.saturating_add(conf)
        }
        ProtocolAction::InitiateWithdrawal
        | ProtocolAction::ValidateWithdrawal
        | ProtocolAction::InitiateClosePosition
        | ProtocolAction::ValidateClosePosition => neutral.saturating_sub(conf),
        _ => neutral,
    }
}

impl PriceSource for PythSource {
    fn validate(
        &self,
        _target_timestamp: u64,
        action: ProtocolAction,
        blob: &PriceBlob,
    ) -> CoreResult<PriceInfo> {
        let PriceBlob::Pyth(sample) = blob else {
            return Err(KeelCoreError::OracleValidationFailed(
                "sample is not a Pyth payload",
            ));
        };
        if sample.price <= 0 {
            return Err(KeelCoreError::OracleNegativePrice);
        }
        if sample.expo > 0 || sample.expo < -18 {
            return Err(KeelCoreError::OracleValidationFailed(
                "unsupported price exponent",
            ));
        }

        let decimals = sample.expo.unsigned_abs();
        let neutral = scale_to_wad(sample.price as u128, decimals)?;
        let conf = scale_to_wad(sample.conf as u128, decimals)?;

        // reject samples whose uncertainty band is too wide to settle on
        let conf_bps = crate::math::mul_div(
            conf,
            crate::constants::BPS_DENOMINATOR,
            neutral,
            crate::math::Rounding::Up,
        )?;
        if conf_bps > self.max_conf_bps as u128 {
            return Err(KeelCoreError::OracleValidationFailed(
                "confidence interval too wide",
            ));
        }

        Ok(PriceInfo {
            price: apply_confidence(neutral, conf, action),
            neutral_price: neutral,
            timestamp: sample.publish_time,
        })
    }
}

impl PriceSource for ChainlinkSource {
    fn validate(
        &self,
        target_timestamp: u64,
        _action: ProtocolAction,
        blob: &PriceBlob,
    ) -> CoreResult<PriceInfo> {
        let PriceBlob::Chainlink(round) = blob else {
            return Err(KeelCoreError::OracleValidationFailed(
                "sample is not a Chainlink round",
            ));
        };
        if round.answer <= 0 {
            return Err(KeelCoreError::OracleNegativePrice);
        }
        if round.updated_at + self.heartbeat < target_timestamp {
            return Err(KeelCoreError::PriceTooOld {
                min: target_timestamp.saturating_sub(self.heartbeat),
                got: round.updated_at,
            });
        }

        let neutral = scale_to_wad(round.answer as u128, self.decimals)?;
        Ok(PriceInfo {
            price: neutral,
            neutral_price: neutral,
            timestamp: round.updated_at,
        })
    }
}

impl PriceSource for RedstoneSource {
    fn validate(
        &self,
        target_timestamp: u64,
        _action: ProtocolAction,
        blob: &PriceBlob,
    ) -> CoreResult<PriceInfo> {
        let PriceBlob::Redstone(sample) = blob else {
            return Err(KeelCoreError::OracleValidationFailed(
                "sample is not a Redstone payload",
            ));
        };
        if sample.price == 0 {
            return Err(KeelCoreError::OracleNegativePrice);
        }
        if sample.timestamp + self.heartbeat < target_timestamp {
            return Err(KeelCoreError::PriceTooOld {
                min: target_timestamp.saturating_sub(self.heartbeat),
                got: sample.timestamp,
            });
        }

        let neutral = scale_to_wad(sample.price, self.decimals)?;
        Ok(PriceInfo {
            price: neutral,
            neutral_price: neutral,
            timestamp: sample.timestamp,
        })
    }
}

impl PriceSource for DataStreamsSource {
    fn validate(
        &self,
        target_timestamp: u64,
        _action: ProtocolAction,
        blob: &PriceBlob,
    ) -> CoreResult<PriceInfo> {
        let PriceBlob::DataStreams(report) = blob else {
            return Err(KeelCoreError::OracleValidationFailed(
                "sample is not a Data Streams report",
            ));
        };
        if report.price <= 0 {
            return Err(KeelCoreError::OracleNegativePrice);
        }
        if report.observations_timestamp + self.max_age < target_timestamp {
            return Err(KeelCoreError::PriceTooOld {
                min: target_timestamp.saturating_sub(self.max_age),
                got: report.observations_timestamp,
            });
        }

        // Data Streams reports are already 18-decimal
        let neutral = report.price as u128;
        Ok(PriceInfo {
            price: neutral,
            neutral_price: neutral,
            timestamp: report.observations_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::WAD;

    #[test]
    fn test_scaling() {
        assert_eq!(scale_to_wad(200_000_000_000, 8).unwrap(), 2_000 * WAD);
        assert_eq!(scale_to_wad(2_000 * WAD, 18).unwrap(), 2_000 * WAD);
        assert_eq!(scale_to_wad(2_000 * WAD * 100, 20).unwrap(), 2_000 * WAD);
    }

    #[test]
    fn test_pyth_confidence_direction() {
        let source = PythSource { max_conf_bps: 100 };
        let sample = PriceBlob::Pyth(PythSample {
            price: 200_000_000_000,
            conf: 100_000_000,
            expo: -8,
            publish_time: 50,
            fee: 1,
        });

        let open = source
            .validate(50, ProtocolAction::ValidateOpenPosition, &sample)
            .unwrap();
        assert_eq!(open.neutral_price, 2_000 * WAD);
        assert_eq!(open.price, 2_001 * WAD);

        let close = source
            .validate(50, ProtocolAction::ValidateClosePosition, &sample)
            .unwrap();
        assert_eq!(close.price, 1_999 * WAD);

        let liq = source
            .validate(50, ProtocolAction::Liquidation, &sample)
            .unwrap();
        assert_eq!(liq.price, 2_000 * WAD);
    }

    #[test]
    fn test_pyth_rejects_wide_confidence() {
        let source = PythSource { max_conf_bps: 10 };
        let sample = PriceBlob::Pyth(PythSample {
            price: 200_000_000_000,
            conf: 10_000_000_000, // 5%
            expo: -8,
            publish_time: 50,
            fee: 0,
        });
        assert!(matches!(
            source.validate(50, ProtocolAction::Liquidation, &sample),
            Err(KeelCoreError::OracleValidationFailed(_))
        ));
    }

    #[test]
    fn test_negative_prices_rejected() {
        let source = ChainlinkSource {
            decimals: 8,
            heartbeat: 3_600,
        };
        let round = PriceBlob::Chainlink(ChainlinkRound {
            answer: -1,
            updated_at: 10,
        });
        assert_eq!(
            source.validate(10, ProtocolAction::None, &round),
            Err(KeelCoreError::OracleNegativePrice)
        );
    }

    #[test]
    fn test_wrong_blob_variant_rejected() {
        let source = RedstoneSource {
            decimals: 8,
            heartbeat: 3_600,
        };
        let round = PriceBlob::Chainlink(ChainlinkRound {
            answer: 1,
            updated_at: 10,
        });
        assert!(matches!(
            source.validate(10, ProtocolAction::None, &round),
            Err(KeelCoreError::OracleValidationFailed(_))
        ));
    }
}
