//! # Oracle Middleware
//!
//! Price delivery abstraction between the engine and the external data
//! sources. The engine consumes a single capability: validate a price blob
//! against a target timestamp for a given protocol action. Signature
//! verification and feed parsing happen upstream; the blobs here are the
//! already-verified samples those layers produce.

pub mod sources;

pub use sources::{
    ChainlinkRound, ChainlinkSource, DataStreamsReport, DataStreamsSource, PriceBlob, PriceFeed,
    PriceSource, PythSample, PythSource, RedstoneSample, RedstoneSource,
};

use serde::{Deserialize, Serialize};

use crate::errors::{CoreResult, KeelCoreError};
use crate::types::ProtocolAction;

/// Validated price returned to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "client", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
pub struct PriceInfo {
    /// Price adjusted in the direction unfavorable to the caller (WAD)
    pub price: u128,
    /// Unadjusted price (WAD)
    pub neutral_price: u128,
    /// Timestamp the sample was produced at
    pub timestamp: u64,
}

/// Single-call price-validation contract consumed by the engine
pub trait OracleMiddleware {
    /// Validate a price blob for an action targeting a timestamp
    ///
    /// `action_id` uniquely identifies the pending action being priced;
    /// sources that bill per validation may key their accounting on it.
    fn parse_and_validate_price(
        &self,
        action_id: [u8; 32],
        target_timestamp: u64,
        action: ProtocolAction,
        blob: &PriceBlob,
    ) -> CoreResult<PriceInfo>;

    /// Exact fee required alongside the given blob
    fn validation_cost(&self, blob: &PriceBlob, action: ProtocolAction) -> u128;
}

/// Middleware over one configured price feed
///
/// Initiations accept any sample no older than `recent_price_delay` relative
/// to the target; validations and liquidations require a sample at or after
/// the target timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceMiddleware {
    /// Configured data source
    pub feed: PriceFeed,
    /// Maximum sample age accepted for initiations (seconds)
    pub recent_price_delay: u64,
}

impl PriceMiddleware {
    /// Create a middleware over a feed
    pub fn new(feed: PriceFeed, recent_price_delay: u64) -> Self {
        Self {
            feed,
            recent_price_delay,
        }
    }

    fn is_initiation(action: ProtocolAction) -> bool {
        matches!(
            action,
            ProtocolAction::None
                | ProtocolAction::InitiateDeposit
                | ProtocolAction::InitiateWithdrawal
                | ProtocolAction::InitiateOpenPosition
                | ProtocolAction::InitiateClosePosition
        )
    }
}

impl OracleMiddleware for PriceMiddleware {
    fn parse_and_validate_price(
        &self,
        _action_id: [u8; 32],
        target_timestamp: u64,
        action: ProtocolAction,
        blob: &PriceBlob,
    ) -> CoreResult<PriceInfo> {
        let info = self.feed.validate(target_timestamp, action, blob)?;

        if Self::is_initiation(action) {
            // degraded mode: a recent sample is enough
            let min = target_timestamp.saturating_sub(self.recent_price_delay);
            if info.timestamp < min {
                return Err(KeelCoreError::PriceTooOld {
                    min,
                    got: info.timestamp,
                });
            }
            if info.timestamp > target_timestamp {
                return Err(KeelCoreError::PriceTooRecent {
                    now: target_timestamp,
                    got: info.timestamp,
                });
            }
        } else if info.timestamp < target_timestamp {
            // confirmations must cover the target timestamp
            return Err(KeelCoreError::TimestampTooEarly {
                required: target_timestamp,
                got: info.timestamp,
            });
        }

        Ok(info)
    }

    fn validation_cost(&self, blob: &PriceBlob, _action: ProtocolAction) -> u128 {
        blob.fee()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::WAD;

    fn middleware() -> PriceMiddleware {
        PriceMiddleware::new(
            PriceFeed::Redstone(RedstoneSource {
                decimals: 8,
                heartbeat: 3_600,
            }),
            45,
        )
    }

    fn blob(price_e8: u128, timestamp: u64) -> PriceBlob {
        PriceBlob::Redstone(RedstoneSample {
            price: price_e8,
            timestamp,
        })
    }

    #[test]
    fn test_initiation_accepts_recent_sample() {
        let info = middleware()
            .parse_and_validate_price(
                [0; 32],
                1_000,
                ProtocolAction::InitiateDeposit,
                &blob(2_000_00000000, 980),
            )
            .unwrap();
        assert_eq!(info.price, 2_000 * WAD);
        assert_eq!(info.timestamp, 980);
    }

    #[test]
    fn test_initiation_rejects_old_sample() {
        let err = middleware().parse_and_validate_price(
            [0; 32],
            1_000,
            ProtocolAction::InitiateDeposit,
            &blob(2_000_00000000, 900),
        );
        assert!(matches!(err, Err(KeelCoreError::PriceTooOld { .. })));
    }

    #[test]
    fn test_validation_requires_target_coverage() {
        let err = middleware().parse_and_validate_price(
            [0; 32],
            1_000,
            ProtocolAction::ValidateDeposit,
            &blob(2_000_00000000, 999),
        );
        assert!(matches!(err, Err(KeelCoreError::TimestampTooEarly { .. })));

        let info = middleware()
            .parse_and_validate_price(
                [0; 32],
                1_000,
                ProtocolAction::ValidateDeposit,
                &blob(2_000_00000000, 1_000),
            )
            .unwrap();
        assert_eq!(info.timestamp, 1_000);
    }
}
