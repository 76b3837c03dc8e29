//! Shared protocol test harness: a deterministic Redstone-style feed, the
//! reference token and rewards manager, and thin wrappers over the entry
//! points so scenarios read as flows rather than plumbing.

// not every binary uses every helper
#![allow(dead_code)]

use keel_core::constants::WAD;
use keel_core::engine::Collaborators;
use keel_core::oracle::{PriceBlob, PriceFeed, PriceMiddleware, RedstoneSample, RedstoneSource};
use keel_core::rewards::StandardRewardsManager;
use keel_core::token::DivisorToken;
use keel_core::types::{
    Address, CloseOutcome, DepositOutcome, PositionId, SecurityRefund, ValidateOpenOutcome,
    WithdrawalOutcome,
};
use keel_core::{CoreResult, LiquidationReport, Protocol, ProtocolParams};

pub const START_PRICE: u128 = 2_000 * WAD;

/// Fee-free parameters with fine tick spacing, for exact arithmetic
pub fn test_params() -> ProtocolParams {
    ProtocolParams {
        tick_spacing: 1,
        liquidation_penalty_bps: 0,
        position_fee_bps: 0,
        vault_fee_bps: 0,
        protocol_fee_bps: 0,
        ..ProtocolParams::default()
    }
}

pub fn addr(value: u64) -> Address {
    Address::from_low_u64(value)
}

pub fn blob(price: u128, timestamp: u64) -> PriceBlob {
    PriceBlob::Redstone(RedstoneSample { price, timestamp })
}

pub struct Harness {
    pub protocol: Protocol,
    pub token: DivisorToken,
    pub oracle: PriceMiddleware,
    pub rewards: StandardRewardsManager,
}

/// One macro so every wrapper borrows the collaborators the same way
macro_rules! with_collab {
    ($self:ident, $c:ident, $body:expr) => {{
        let mut $c = Collaborators {
            oracle: &$self.oracle,
            rewards: &$self.rewards,
            token: &mut $self.token,
            rebalancer: None,
        };
        $body
    }};
}

impl Harness {
    pub fn new(params: ProtocolParams) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Self {
            protocol: Protocol::new(params, START_PRICE, 0).unwrap(),
            token: DivisorToken::new(),
            oracle: PriceMiddleware::new(
                PriceFeed::Redstone(RedstoneSource {
                    decimals: 18,
                    heartbeat: 1_000_000,
                }),
                600,
            ),
            rewards: StandardRewardsManager::default(),
        }
    }

    pub fn security_deposit(&self) -> u128 {
        self.protocol.params().security_deposit_value
    }

    pub fn initiate_deposit(
        &mut self,
        user: u64,
        amount: u128,
        price: u128,
        now: u64,
    ) -> CoreResult<u128> {
        let sd = self.security_deposit();
        with_collab!(self, c, {
            self.protocol.initiate_deposit(
                &mut c,
                addr(user),
                amount,
                addr(user),
                sd,
                0,
                &blob(price, now),
                &[],
                now,
            )
        })
    }

    pub fn initiate_deposit_sweeping(
        &mut self,
        user: u64,
        amount: u128,
        price: u128,
        previous: &[PriceBlob],
        now: u64,
    ) -> CoreResult<u128> {
        let sd = self.security_deposit();
        with_collab!(self, c, {
            self.protocol.initiate_deposit(
                &mut c,
                addr(user),
                amount,
                addr(user),
                sd,
                0,
                &blob(price, now),
                previous,
                now,
            )
        })
    }

    pub fn validate_deposit(
        &mut self,
        caller: u64,
        validator: u64,
        price: u128,
        now: u64,
    ) -> CoreResult<(DepositOutcome, SecurityRefund)> {
        with_collab!(self, c, {
            self.protocol.validate_deposit(
                &mut c,
                addr(caller),
                addr(validator),
                0,
                &blob(price, now),
                now,
            )
        })
    }

    pub fn initiate_withdrawal(
        &mut self,
        user: u64,
        token_amount: u128,
        price: u128,
        now: u64,
    ) -> CoreResult<u128> {
        let sd = self.security_deposit();
        with_collab!(self, c, {
            self.protocol.initiate_withdrawal(
                &mut c,
                addr(user),
                token_amount,
                addr(user),
                sd,
                0,
                &blob(price, now),
                &[],
                now,
            )
        })
    }

    pub fn validate_withdrawal(
        &mut self,
        caller: u64,
        validator: u64,
        price: u128,
        now: u64,
    ) -> CoreResult<(WithdrawalOutcome, SecurityRefund)> {
        with_collab!(self, c, {
            self.protocol.validate_withdrawal(
                &mut c,
                addr(caller),
                addr(validator),
                0,
                &blob(price, now),
                now,
            )
        })
    }

    pub fn initiate_open(
        &mut self,
        user: u64,
        amount: u128,
        desired_liq_price: u128,
        price: u128,
        now: u64,
    ) -> CoreResult<(PositionId, u128)> {
        let sd = self.security_deposit();
        with_collab!(self, c, {
            self.protocol.initiate_open_position(
                &mut c,
                addr(user),
                amount,
                desired_liq_price,
                addr(user),
                sd,
                0,
                &blob(price, now),
                &[],
                now,
            )
        })
    }

    pub fn validate_open(
        &mut self,
        caller: u64,
        validator: u64,
        price: u128,
        now: u64,
    ) -> CoreResult<(ValidateOpenOutcome, SecurityRefund)> {
        with_collab!(self, c, {
            self.protocol.validate_open_position(
                &mut c,
                addr(caller),
                addr(validator),
                0,
                &blob(price, now),
                now,
            )
        })
    }

    pub fn initiate_close(
        &mut self,
        user: u64,
        id: &PositionId,
        amount: u128,
        price: u128,
        now: u64,
    ) -> CoreResult<u128> {
        let sd = self.security_deposit();
        with_collab!(self, c, {
            self.protocol.initiate_close_position(
                &mut c,
                addr(user),
                id,
                amount,
                addr(user),
                sd,
                0,
                &blob(price, now),
                &[],
                now,
            )
        })
    }

    pub fn validate_close(
        &mut self,
        caller: u64,
        validator: u64,
        price: u128,
        now: u64,
    ) -> CoreResult<(CloseOutcome, SecurityRefund)> {
        with_collab!(self, c, {
            self.protocol.validate_close_position(
                &mut c,
                addr(caller),
                addr(validator),
                0,
                &blob(price, now),
                now,
            )
        })
    }

    pub fn liquidate(
        &mut self,
        caller: u64,
        price: u128,
        max_iterations: u16,
        now: u64,
    ) -> CoreResult<LiquidationReport> {
        with_collab!(self, c, {
            self.protocol.liquidate(
                &mut c,
                addr(caller),
                0,
                &blob(price, now),
                max_iterations,
                now,
            )
        })
    }

    /// Open and validate a position in one step
    pub fn open_validated(
        &mut self,
        user: u64,
        amount: u128,
        desired_liq_price: u128,
        price: u128,
        now: u64,
    ) -> PositionId {
        self.initiate_open(user, amount, desired_liq_price, price, now)
            .unwrap();
        let delay = self.protocol.params().validation_delay;
        let validate_at = now + delay + 1;
        let (outcome, _) = self
            .validate_open(user, user, price, validate_at)
            .unwrap();
        match outcome {
            ValidateOpenOutcome::Validated(open) => open.id,
            ValidateOpenOutcome::Liquidated => panic!("position liquidated during setup"),
        }
    }
}
