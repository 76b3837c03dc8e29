//! # Protocol Engine
//!
//! The top-level state machine tying everything together. Every entry point
//! follows the same ordering: resolve the oracle price, run the funding/PnL
//! accrual, run the liquidation walk, then apply the action-specific
//! mutation and update the pending queue. Skipping or reordering those
//! steps is a correctness bug, so they live in one helper every entry point
//! goes through.
//!
//! The engine owns no clock and no token custody: callers pass the current
//! timestamp, and asset movements are reported through outcome values for
//! the host to execute.

pub mod actions;
pub mod funding;
pub mod liquidation;
pub mod rebalancer;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProtocolParams;
use crate::constants::{BPS_DENOMINATOR, MAX_LIQUIDATION_ITERATION};
use crate::errors::{CoreResult, KeelCoreError};
use crate::ledger::PositionLedger;
use crate::math::fixed_point::{after_bps_fee, bps_of, imbalance_bps};
use crate::math::{long_math, mul_div, tick_math, Rounding};
use crate::oracle::{OracleMiddleware, PriceBlob, PriceInfo};
use crate::rewards::LiquidationRewardsManager;
use crate::token::StableToken;
use crate::types::{
    ActionKind, ActionPayload, Address, CloseOutcome, DepositOutcome, LiquidationReport,
    OpenOutcome, PendingAction, Position, PositionId, ProtocolAction, RebalancerAction,
    SecurityRefund, ValidateOpenOutcome, ValidatedAction, WithdrawalOutcome,
};
use crate::vault::VaultState;

use actions::PendingQueue;
use liquidation::LiquidationEffects;
use rebalancer::{Rebalancer, TriggerContext};

/// External contracts every entry point may touch
pub struct Collaborators<'a> {
    /// Price middleware
    pub oracle: &'a dyn OracleMiddleware,
    /// Liquidation rewards parameter contract
    pub rewards: &'a dyn LiquidationRewardsManager,
    /// Stable token (divisor contract)
    pub token: &'a mut dyn StableToken,
    /// Optional rebalancer
    pub rebalancer: Option<&'a mut dyn Rebalancer>,
}

/// What one accrual-plus-liquidation step changed
struct StateUpdate {
    effects: LiquidationEffects,
    rebased: bool,
    rebase_divisor: Option<u128>,
    rebalancer_action: RebalancerAction,
}

/// The protocol instance: parameters plus every piece of persisted state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Protocol {
    params: ProtocolParams,
    vault: VaultState,
    ledger: PositionLedger,
    pending: PendingQueue,
}

impl Protocol {
    /// Create a fresh protocol instance
    pub fn new(params: ProtocolParams, price: u128, timestamp: u64) -> CoreResult<Self> {
        params.validate()?;
        let ledger = PositionLedger::new(params.tick_spacing, params.min_long_position)?;
        Ok(Self {
            vault: VaultState::new(price, timestamp),
            ledger,
            pending: PendingQueue::new(),
            params,
        })
    }

    /// Protocol parameters
    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// Vault state
    pub fn vault(&self) -> &VaultState {
        &self.vault
    }

    /// Position ledger
    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// A validator's in-flight action, if any
    pub fn pending_action(&self, validator: &Address) -> Option<&PendingAction> {
        self.pending.get(validator)
    }

    /// Seed both sides of the protocol in one trusted step
    ///
    /// Bypasses the two-phase flow: used once, before the instance is
    /// opened to the public, to establish a balanced starting state.
    pub fn initialize(
        &mut self,
        token: &mut dyn StableToken,
        owner: Address,
        deposit_amount: u128,
        long_amount: u128,
        desired_liq_price: u128,
        price: u128,
        now: u64,
    ) -> CoreResult<(u128, PositionId)> {
        if deposit_amount == 0 || long_amount == 0 {
            return Err(KeelCoreError::ZeroAmount);
        }
        if owner.is_zero() {
            return Err(KeelCoreError::InvalidAddressTo);
        }
        if self.vault.total_balance() > 0 || self.ledger.total_positions() > 0 {
            return Err(KeelCoreError::InvalidParameter("already initialized"));
        }

        let tick = tick_math::price_to_aligned_tick(desired_liq_price, self.params.tick_spacing)?;
        let liq_wo = tick_math::tick_price_without_penalty(tick, self.params.liquidation_penalty_bps)?;
        let leverage = long_math::leverage(price, liq_wo)?;
        self.check_leverage_bounds(leverage)?;
        let total_expo = long_math::total_expo(long_amount, price, liq_wo)?;
        let minted = self.vault.tokens_to_mint(deposit_amount, price, 0)?;

        let id = self.ledger.open_position(
            tick,
            Position {
                user: owner,
                amount: long_amount,
                start_price: price,
                total_expo,
                timestamp: now,
                validated: true,
            },
        )?;
        self.vault.balance_vault = deposit_amount;
        self.vault.balance_long = long_amount;
        self.vault.last_price = price;
        self.vault.last_update_timestamp = now;
        token.mint(owner, minted)?;

        debug!(deposit_amount, long_amount, tick, "protocol initialized");
        Ok((minted, id))
    }

    // ========================================================================
    // Deposit
    // ========================================================================

    /// Initiate a vault deposit
    ///
    /// Returns the security deposits of stale actions the call swept,
    /// credited to the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate_deposit(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        amount: u128,
        to: Address,
        security_deposit: u128,
        oracle_fee: u128,
        blob: &PriceBlob,
        previous_blobs: &[PriceBlob],
        now: u64,
    ) -> CoreResult<u128> {
        if amount == 0 {
            return Err(KeelCoreError::ZeroAmount);
        }
        self.check_action_preconditions(c, &caller, &to, security_deposit)?;
        self.check_oracle_fee(c, blob, ProtocolAction::InitiateDeposit, oracle_fee)?;

        let price = c.oracle.parse_and_validate_price(
            caller.0,
            now,
            ProtocolAction::InitiateDeposit,
            blob,
        )?;
        self.apply_state(c, price.neutral_price, now, self.params.liquidation_iteration_limit)?;
        let swept = self.sweep_stale(c, caller, previous_blobs, now)?;

        // a deposit pushes the vault side heavier
        let trading = self.vault.trading_expo(self.ledger.total_expo());
        if trading > 0 {
            let new_vault = self
                .vault
                .balance_vault
                .checked_add(amount)
                .ok_or(KeelCoreError::MathOverflow)?;
            let imb = imbalance_bps(trading, new_vault)?;
            if imb < -self.params.deposit_imbalance_limit_bps {
                return Err(KeelCoreError::ImbalanceLimitReached(imb));
            }
        }

        self.pending.push(PendingAction {
            validator: caller,
            to,
            timestamp: now,
            security_deposit,
            payload: ActionPayload::Deposit { amount },
        })?;
        debug!(%caller, amount, "deposit initiated");
        Ok(swept)
    }

    /// Validate a pending deposit
    pub fn validate_deposit(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        validator: Address,
        oracle_fee: u128,
        blob: &PriceBlob,
        now: u64,
    ) -> CoreResult<(DepositOutcome, SecurityRefund)> {
        self.check_pending_kind(&validator, ActionKind::Deposit)?;
        self.check_oracle_fee(c, blob, ProtocolAction::ValidateDeposit, oracle_fee)?;
        match self.validate_pending(c, caller, &validator, blob, now, true)? {
            (ValidatedAction::Deposit(outcome), refund) => Ok((outcome, refund)),
            (other, _) => Err(KeelCoreError::kind_mismatch(
                ActionKind::Deposit,
                validated_kind(&other),
            )),
        }
    }

    // ========================================================================
    // Withdrawal
    // ========================================================================

    /// Initiate a withdrawal of stable tokens from the vault
    #[allow(clippy::too_many_arguments)]
    pub fn initiate_withdrawal(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        token_amount: u128,
        to: Address,
        security_deposit: u128,
        oracle_fee: u128,
        blob: &PriceBlob,
        previous_blobs: &[PriceBlob],
        now: u64,
    ) -> CoreResult<u128> {
        if token_amount == 0 {
            return Err(KeelCoreError::ZeroAmount);
        }
        self.check_action_preconditions(c, &caller, &to, security_deposit)?;
        self.check_oracle_fee(c, blob, ProtocolAction::InitiateWithdrawal, oracle_fee)?;

        let price = c.oracle.parse_and_validate_price(
            caller.0,
            now,
            ProtocolAction::InitiateWithdrawal,
            blob,
        )?;
        self.apply_state(c, price.neutral_price, now, self.params.liquidation_iteration_limit)?;
        let swept = self.sweep_stale(c, caller, previous_blobs, now)?;

        // a withdrawal thins the vault under the existing long exposure
        let trading = self.vault.trading_expo(self.ledger.total_expo());
        if trading > 0 {
            let expected_out =
                self.vault.assets_for_tokens(token_amount, c.token.total_supply())?;
            let new_vault = self.vault.balance_vault.saturating_sub(expected_out);
            let imb = imbalance_bps(trading, new_vault)?;
            if imb > self.params.withdrawal_imbalance_limit_bps {
                return Err(KeelCoreError::ImbalanceLimitReached(imb));
            }
        }

        self.pending.push(PendingAction {
            validator: caller,
            to,
            timestamp: now,
            security_deposit,
            payload: ActionPayload::Withdrawal {
                shares: token_amount,
            },
        })?;
        debug!(%caller, token_amount, "withdrawal initiated");
        Ok(swept)
    }

    /// Validate a pending withdrawal
    pub fn validate_withdrawal(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        validator: Address,
        oracle_fee: u128,
        blob: &PriceBlob,
        now: u64,
    ) -> CoreResult<(WithdrawalOutcome, SecurityRefund)> {
        self.check_pending_kind(&validator, ActionKind::Withdrawal)?;
        self.check_oracle_fee(c, blob, ProtocolAction::ValidateWithdrawal, oracle_fee)?;
        match self.validate_pending(c, caller, &validator, blob, now, true)? {
            (ValidatedAction::Withdrawal(outcome), refund) => Ok((outcome, refund)),
            (other, _) => Err(KeelCoreError::kind_mismatch(
                ActionKind::Withdrawal,
                validated_kind(&other),
            )),
        }
    }

    // ========================================================================
    // Open Position
    // ========================================================================

    /// Initiate a leveraged long
    ///
    /// Returns the assigned (not yet validated) position id and the swept
    /// security deposits.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate_open_position(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        amount: u128,
        desired_liq_price: u128,
        to: Address,
        security_deposit: u128,
        oracle_fee: u128,
        blob: &PriceBlob,
        previous_blobs: &[PriceBlob],
        now: u64,
    ) -> CoreResult<(PositionId, u128)> {
        if amount == 0 {
            return Err(KeelCoreError::ZeroAmount);
        }
        self.check_action_preconditions(c, &caller, &to, security_deposit)?;
        self.check_oracle_fee(c, blob, ProtocolAction::InitiateOpenPosition, oracle_fee)?;

        let price = c.oracle.parse_and_validate_price(
            caller.0,
            now,
            ProtocolAction::InitiateOpenPosition,
            blob,
        )?;
        self.apply_state(c, price.neutral_price, now, self.params.liquidation_iteration_limit)?;
        let swept = self.sweep_stale(c, caller, previous_blobs, now)?;

        let entry_price = price.price;
        let (net, fee) = after_bps_fee(amount, self.params.position_fee_bps)?;

        let tick = tick_math::price_to_aligned_tick(desired_liq_price, self.params.tick_spacing)?;
        let tick_price = tick_math::tick_to_price(tick)?;
        let max_liq_price = mul_div(
            entry_price,
            BPS_DENOMINATOR - self.params.safety_margin_bps as u128,
            BPS_DENOMINATOR,
            Rounding::Down,
        )?;
        if tick_price > max_liq_price {
            return Err(KeelCoreError::LiquidationPriceSafetyMargin {
                desired: tick_price,
                limit: max_liq_price,
            });
        }

        let liq_wo =
            tick_math::tick_price_without_penalty(tick, self.params.liquidation_penalty_bps)?;
        let leverage = long_math::leverage(entry_price, liq_wo)?;
        self.check_leverage_bounds(leverage)?;
        let total_expo = long_math::total_expo(net, entry_price, liq_wo)?;

        // an open grows the trading side by the leveraged part
        if self.vault.balance_vault > 0 || self.vault.trading_expo(self.ledger.total_expo()) > 0 {
            let trading = self.vault.trading_expo(self.ledger.total_expo());
            let new_trading = trading
                .checked_add(total_expo - net)
                .ok_or(KeelCoreError::MathOverflow)?;
            let imb = imbalance_bps(new_trading, self.vault.balance_vault)?;
            if imb > self.params.open_imbalance_limit_bps {
                return Err(KeelCoreError::ImbalanceLimitReached(imb));
            }
        }

        let new_balance_long = self
            .vault
            .balance_long
            .checked_add(net)
            .ok_or(KeelCoreError::MathOverflow)?;

        let id = self.ledger.open_position(
            tick,
            Position {
                user: to,
                amount: net,
                start_price: entry_price,
                total_expo,
                timestamp: now,
                validated: false,
            },
        )?;
        self.vault.balance_long = new_balance_long;
        self.credit_fee(fee)?;
        self.pending.push(PendingAction {
            validator: caller,
            to,
            timestamp: now,
            security_deposit,
            payload: ActionPayload::OpenPosition { position_id: id },
        })?;
        debug!(%caller, amount, tick, leverage, "open initiated");
        Ok((id, swept))
    }

    /// Validate a pending position opening
    pub fn validate_open_position(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        validator: Address,
        oracle_fee: u128,
        blob: &PriceBlob,
        now: u64,
    ) -> CoreResult<(ValidateOpenOutcome, SecurityRefund)> {
        self.check_pending_kind(&validator, ActionKind::OpenPosition)?;
        self.check_oracle_fee(c, blob, ProtocolAction::ValidateOpenPosition, oracle_fee)?;
        match self.validate_pending(c, caller, &validator, blob, now, true)? {
            (ValidatedAction::Open(outcome), refund) => Ok((outcome, refund)),
            (other, _) => Err(KeelCoreError::kind_mismatch(
                ActionKind::OpenPosition,
                validated_kind(&other),
            )),
        }
    }

    // ========================================================================
    // Close Position
    // ========================================================================

    /// Initiate closing part or all of a position
    ///
    /// The closed slice leaves the ledger immediately; its value is held
    /// aside and settled at the validation price.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate_close_position(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        id: &PositionId,
        amount_to_close: u128,
        to: Address,
        security_deposit: u128,
        oracle_fee: u128,
        blob: &PriceBlob,
        previous_blobs: &[PriceBlob],
        now: u64,
    ) -> CoreResult<u128> {
        self.check_action_preconditions(c, &caller, &to, security_deposit)?;
        self.check_oracle_fee(c, blob, ProtocolAction::InitiateClosePosition, oracle_fee)?;

        let price = c.oracle.parse_and_validate_price(
            caller.0,
            now,
            ProtocolAction::InitiateClosePosition,
            blob,
        )?;
        self.apply_state(c, price.neutral_price, now, self.params.liquidation_iteration_limit)?;
        let swept = self.sweep_stale(c, caller, previous_blobs, now)?;

        // resolve after the walk: a liquidated position cannot be closed
        let position = self.ledger.get(id)?;
        if position.user != caller {
            return Err(KeelCoreError::Unauthorized);
        }
        if !position.validated {
            return Err(KeelCoreError::PositionNotValidated);
        }
        if amount_to_close == 0 {
            return Err(KeelCoreError::ZeroAmount);
        }
        if amount_to_close > position.amount {
            return Err(KeelCoreError::InvalidParameter(
                "amount exceeds the position collateral",
            ));
        }

        let liq_price = tick_math::tick_to_price(id.tick)?;
        let liq_wo =
            tick_math::tick_price_without_penalty(id.tick, self.params.liquidation_penalty_bps)?;
        let expo_to_close = if amount_to_close == position.amount {
            position.total_expo
        } else {
            mul_div(
                position.total_expo,
                amount_to_close,
                position.amount,
                Rounding::Down,
            )?
        };
        let value = long_math::position_value(expo_to_close, price.price, liq_wo)?.max(0) as u128;
        let value_held = value.min(self.vault.balance_long);

        // a close shrinks the trading side; protect the vault-heavy bound
        let trading = self.vault.trading_expo(self.ledger.total_expo());
        if self.vault.balance_vault > 0 {
            let new_trading = trading.saturating_sub(expo_to_close).saturating_add(value_held);
            let imb = imbalance_bps(new_trading, self.vault.balance_vault)?;
            if imb < -self.params.close_imbalance_limit_bps {
                return Err(KeelCoreError::ImbalanceLimitReached(imb));
            }
        }

        let slice = self.ledger.close_position(id, amount_to_close)?;
        self.vault.balance_long -= value_held;
        self.pending.push(PendingAction {
            validator: caller,
            to,
            timestamp: now,
            security_deposit,
            payload: ActionPayload::ClosePosition {
                amount: slice.amount,
                total_expo: slice.total_expo,
                liq_price_wo_penalty: liq_wo,
                liq_price,
                value_held,
            },
        })?;
        debug!(%caller, amount_to_close, tick = id.tick, "close initiated");
        Ok(swept)
    }

    /// Validate a pending close
    pub fn validate_close_position(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        validator: Address,
        oracle_fee: u128,
        blob: &PriceBlob,
        now: u64,
    ) -> CoreResult<(CloseOutcome, SecurityRefund)> {
        self.check_pending_kind(&validator, ActionKind::ClosePosition)?;
        self.check_oracle_fee(c, blob, ProtocolAction::ValidateClosePosition, oracle_fee)?;
        match self.validate_pending(c, caller, &validator, blob, now, true)? {
            (ValidatedAction::Close(outcome), refund) => Ok((outcome, refund)),
            (other, _) => Err(KeelCoreError::kind_mismatch(
                ActionKind::ClosePosition,
                validated_kind(&other),
            )),
        }
    }

    // ========================================================================
    // Liquidation & Maintenance
    // ========================================================================

    /// Run a liquidation pass against fresh price data
    ///
    /// `max_iterations` overrides the configured walk bound for this call;
    /// zero keeps the configured value.
    pub fn liquidate(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        oracle_fee: u128,
        blob: &PriceBlob,
        max_iterations: u16,
        now: u64,
    ) -> CoreResult<LiquidationReport> {
        self.check_oracle_fee(c, blob, ProtocolAction::Liquidation, oracle_fee)?;
        let price =
            c.oracle
                .parse_and_validate_price(caller.0, now, ProtocolAction::Liquidation, blob)?;

        let iterations = if max_iterations == 0 {
            self.params.liquidation_iteration_limit
        } else {
            max_iterations.min(MAX_LIQUIDATION_ITERATION)
        };
        let update = self.apply_state(c, price.neutral_price, now, iterations)?;

        let rewards = c.rewards.get_liquidation_rewards(
            &update.effects.ticks,
            price.neutral_price,
            update.rebased,
            update.rebalancer_action,
            ProtocolAction::Liquidation,
            update.rebase_divisor,
            blob,
        );
        let paid = rewards.min(self.vault.balance_vault);
        self.vault.balance_vault -= paid;

        Ok(LiquidationReport {
            ticks: update.effects.ticks,
            remaining_collateral: update.effects.remaining_collateral,
            rebased: update.rebased,
            rebalancer_action: update.rebalancer_action,
            rewards: paid,
        })
    }

    /// Validate stale pending actions on behalf of their validators
    ///
    /// Anyone may call this after the deadline; each resolved action's
    /// security deposit goes to the caller. Blobs are consumed in queue
    /// order and resolution stops at the first failure or still-live action.
    pub fn validate_actionable_pending_actions(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        blobs: &[PriceBlob],
        now: u64,
    ) -> CoreResult<Vec<(ValidatedAction, SecurityRefund)>> {
        let mut resolved = Vec::new();
        for blob in blobs {
            let Some(oldest) = self.pending.oldest() else {
                break;
            };
            if now <= oldest.timestamp.saturating_add(self.params.validation_deadline) {
                break;
            }
            let validator = oldest.validator;
            match self.validate_pending(c, caller, &validator, blob, now, true) {
                Ok(result) => resolved.push(result),
                Err(_) => break,
            }
        }
        Ok(resolved)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Accrual, then the liquidation walk, then rebase and rebalancer checks
    ///
    /// The mandatory prefix of every state-changing call.
    fn apply_state(
        &mut self,
        c: &mut Collaborators<'_>,
        neutral_price: u128,
        now: u64,
        max_iterations: u16,
    ) -> CoreResult<StateUpdate> {
        funding::apply(
            &mut self.vault,
            self.ledger.total_expo(),
            neutral_price,
            now,
            &self.params,
        )?;

        let effects = liquidation::liquidate_ticks(
            &mut self.ledger,
            &mut self.vault,
            neutral_price,
            self.params.liquidation_penalty_bps,
            max_iterations,
        )?;

        let rebased = self.vault.check_rebase(
            neutral_price,
            now,
            self.params.rebase_threshold,
            self.params.rebase_interval,
            c.token,
        )?;
        let rebase_divisor = rebased.then(|| c.token.divisor());

        let trading = self.vault.trading_expo(self.ledger.total_expo());
        let (imbalance, intent) =
            rebalancer::evaluate(trading, self.vault.balance_vault, &self.params)?;
        let rebalancer_action = match (&mut c.rebalancer, intent) {
            (_, RebalancerAction::None) => RebalancerAction::None,
            (Some(rb), intent) => rb.on_trigger(&TriggerContext {
                imbalance_bps: imbalance,
                intent,
                current_price: neutral_price,
                trading_expo: trading,
                balance_vault: self.vault.balance_vault,
            })?,
            (None, intent) => intent,
        };

        Ok(StateUpdate {
            effects,
            rebased,
            rebase_divisor,
            rebalancer_action,
        })
    }

    /// Resolve one pending action at its validated price
    ///
    /// `run_state` is false when the caller already brought the state
    /// current this call (the stale-action sweep inside initiates).
    fn validate_pending(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        validator: &Address,
        blob: &PriceBlob,
        now: u64,
        run_state: bool,
    ) -> CoreResult<(ValidatedAction, SecurityRefund)> {
        let action = self
            .pending
            .get(validator)
            .cloned()
            .ok_or(KeelCoreError::NoPendingAction)?;
        let kind = action.kind();

        // before the deadline, only the initiator may validate
        let deadline = action.timestamp.saturating_add(self.params.validation_deadline);
        let third_party = caller != action.validator;
        if third_party && now <= deadline {
            return Err(KeelCoreError::DeadlineNotElapsed);
        }

        let target = action.timestamp.saturating_add(self.params.validation_delay);
        let price = c.oracle.parse_and_validate_price(
            validator.0,
            target,
            ProtocolAction::validate(kind),
            blob,
        )?;
        if price.timestamp < target {
            return Err(KeelCoreError::TimestampTooEarly {
                required: target,
                got: price.timestamp,
            });
        }

        if run_state {
            self.apply_state(
                c,
                price.neutral_price,
                now,
                self.params.liquidation_iteration_limit,
            )?;
        }

        let outcome = match &action.payload {
            ActionPayload::Deposit { .. } => {
                ValidatedAction::Deposit(self.settle_deposit(c, &action, &price)?)
            }
            ActionPayload::Withdrawal { .. } => {
                ValidatedAction::Withdrawal(self.settle_withdrawal(c, &action, &price)?)
            }
            ActionPayload::OpenPosition { .. } => {
                ValidatedAction::Open(self.settle_open(&action, &price)?)
            }
            ActionPayload::ClosePosition { .. } => {
                ValidatedAction::Close(self.settle_close(&action, &price)?)
            }
        };

        self.pending.remove(validator);
        let refund = SecurityRefund {
            to: if third_party { caller } else { action.validator },
            amount: action.security_deposit,
        };
        debug!(validator = %action.validator, ?kind, third_party, "action validated");
        Ok((outcome, refund))
    }

    fn settle_deposit(
        &mut self,
        c: &mut Collaborators<'_>,
        action: &PendingAction,
        price: &PriceInfo,
    ) -> CoreResult<DepositOutcome> {
        let &ActionPayload::Deposit { amount } = &action.payload else {
            return Err(KeelCoreError::kind_mismatch(
                ActionKind::Deposit,
                action.kind(),
            ));
        };

        let (net, fee) = after_bps_fee(amount, self.params.vault_fee_bps)?;
        let minted =
            self.vault
                .tokens_to_mint(net, price.neutral_price, c.token.total_supply())?;

        self.vault.balance_vault = self
            .vault
            .balance_vault
            .checked_add(net)
            .ok_or(KeelCoreError::MathOverflow)?;
        self.credit_fee(fee)?;
        c.token.mint(action.to, minted)?;

        Ok(DepositOutcome {
            minted_shares: minted,
            fee,
        })
    }

    fn settle_withdrawal(
        &mut self,
        c: &mut Collaborators<'_>,
        action: &PendingAction,
        _price: &PriceInfo,
    ) -> CoreResult<WithdrawalOutcome> {
        let &ActionPayload::Withdrawal { shares } = &action.payload else {
            return Err(KeelCoreError::kind_mismatch(
                ActionKind::Withdrawal,
                action.kind(),
            ));
        };

        let assets = self
            .vault
            .assets_for_tokens(shares, c.token.total_supply())?;
        c.token.burn(shares)?;
        self.vault.balance_vault = self
            .vault
            .balance_vault
            .checked_sub(assets)
            .ok_or(KeelCoreError::InsufficientVaultBalance {
                required: assets,
                available: self.vault.balance_vault,
            })?;

        let (net, fee) = after_bps_fee(assets, self.params.vault_fee_bps)?;
        self.credit_fee(fee)?;

        Ok(WithdrawalOutcome {
            asset_out: net,
            fee,
        })
    }

    fn settle_open(
        &mut self,
        action: &PendingAction,
        price: &PriceInfo,
    ) -> CoreResult<ValidateOpenOutcome> {
        let &ActionPayload::OpenPosition { position_id } = &action.payload else {
            return Err(KeelCoreError::kind_mismatch(
                ActionKind::OpenPosition,
                action.kind(),
            ));
        };

        let position = match self.ledger.get(&position_id) {
            Ok(position) => position.clone(),
            // the tick was wiped while the action was in flight
            Err(KeelCoreError::OutdatedTick { .. }) => {
                return Ok(ValidateOpenOutcome::Liquidated)
            }
            Err(err) => return Err(err),
        };

        let entry_price = price.price;
        let penalty = self.params.liquidation_penalty_bps;
        let liq_wo = tick_math::tick_price_without_penalty(position_id.tick, penalty)?;

        match long_math::leverage(entry_price, liq_wo) {
            Ok(leverage) if leverage <= self.params.max_leverage => {
                let total_expo = long_math::total_expo(position.amount, entry_price, liq_wo)?;
                let updated = Position {
                    start_price: entry_price,
                    total_expo,
                    validated: true,
                    ..position
                };
                self.ledger.update_position(&position_id, updated)?;
                Ok(ValidateOpenOutcome::Validated(OpenOutcome {
                    id: position_id,
                    total_expo,
                    leverage,
                }))
            }
            // the validated price pushed leverage past the cap (or into the
            // penalty band): reprice the position at the cap, one tick down
            _ => {
                let target_liq =
                    long_math::liq_price_for_leverage(entry_price, self.params.max_leverage)?;
                let nominal = mul_div(
                    target_liq,
                    BPS_DENOMINATOR,
                    BPS_DENOMINATOR - penalty as u128,
                    Rounding::Down,
                )?;
                let new_tick =
                    tick_math::price_to_aligned_tick(nominal, self.params.tick_spacing)?;
                let new_liq_wo = tick_math::tick_price_without_penalty(new_tick, penalty)?;
                let total_expo =
                    long_math::total_expo(position.amount, entry_price, new_liq_wo)?;
                let leverage = long_math::leverage(entry_price, new_liq_wo)?;

                self.ledger.close_position(&position_id, position.amount)?;
                let new_id = self.ledger.open_position(
                    new_tick,
                    Position {
                        start_price: entry_price,
                        total_expo,
                        validated: true,
                        ..position
                    },
                )?;
                debug!(
                    old_tick = position_id.tick,
                    new_tick, "leverage cap moved position"
                );
                Ok(ValidateOpenOutcome::Validated(OpenOutcome {
                    id: new_id,
                    total_expo,
                    leverage,
                }))
            }
        }
    }

    fn settle_close(
        &mut self,
        action: &PendingAction,
        price: &PriceInfo,
    ) -> CoreResult<CloseOutcome> {
        let &ActionPayload::ClosePosition {
            amount,
            total_expo,
            liq_price_wo_penalty,
            liq_price,
            value_held,
        } = &action.payload
        else {
            return Err(KeelCoreError::kind_mismatch(
                ActionKind::ClosePosition,
                action.kind(),
            ));
        };

        // crossed the trigger while in flight: the held value backs the
        // vault instead of paying the closer
        if price.neutral_price <= liq_price {
            self.vault.balance_vault = self
                .vault
                .balance_vault
                .checked_add(value_held)
                .ok_or(KeelCoreError::MathOverflow)?;
            debug!(amount, "close liquidated in flight");
            return Ok(CloseOutcome {
                asset_out: 0,
                fee: 0,
                liquidated: true,
            });
        }

        let value_now =
            long_math::position_value(total_expo, price.price, liq_price_wo_penalty)?.max(0)
                as u128;
        let payout = if value_now > value_held {
            // the position gained between initiate and validate; the vault
            // funds the difference up to what it holds
            let extra = (value_now - value_held).min(self.vault.balance_vault);
            self.vault.balance_vault -= extra;
            value_held + extra
        } else {
            self.vault.balance_vault = self
                .vault
                .balance_vault
                .checked_add(value_held - value_now)
                .ok_or(KeelCoreError::MathOverflow)?;
            value_now
        };

        let (net, fee) = after_bps_fee(payout, self.params.position_fee_bps)?;
        self.credit_fee(fee)?;
        debug!(amount, net, "close settled");

        Ok(CloseOutcome {
            asset_out: net,
            fee,
            liquidated: false,
        })
    }

    /// Sweep expired actions from the queue front, best effort
    fn sweep_stale(
        &mut self,
        c: &mut Collaborators<'_>,
        caller: Address,
        previous_blobs: &[PriceBlob],
        now: u64,
    ) -> CoreResult<u128> {
        let mut credited = 0u128;
        for (used, blob) in previous_blobs.iter().enumerate() {
            if used as u16 >= self.params.max_stale_validations {
                break;
            }
            let Some(oldest) = self.pending.oldest() else {
                break;
            };
            if now <= oldest.timestamp.saturating_add(self.params.validation_deadline) {
                break;
            }
            let validator = oldest.validator;
            if validator == caller {
                break;
            }
            // state is already current; a failed resolution never fails the
            // caller's own action
            match self.validate_pending(c, caller, &validator, blob, now, false) {
                Ok((_, refund)) => credited = credited.saturating_add(refund.amount),
                Err(_) => break,
            }
        }
        Ok(credited)
    }

    fn check_action_preconditions(
        &self,
        _c: &Collaborators<'_>,
        caller: &Address,
        to: &Address,
        security_deposit: u128,
    ) -> CoreResult<()> {
        if to.is_zero() {
            return Err(KeelCoreError::InvalidAddressTo);
        }
        if self.pending.get(caller).is_some() {
            return Err(KeelCoreError::PendingActionActive);
        }
        if security_deposit != self.params.security_deposit_value {
            return Err(KeelCoreError::SecurityDepositMismatch {
                expected: self.params.security_deposit_value,
                provided: security_deposit,
            });
        }
        Ok(())
    }

    fn check_pending_kind(&self, validator: &Address, expected: ActionKind) -> CoreResult<()> {
        let action = self
            .pending
            .get(validator)
            .ok_or(KeelCoreError::NoPendingAction)?;
        if action.kind() != expected {
            return Err(KeelCoreError::kind_mismatch(expected, action.kind()));
        }
        Ok(())
    }

    fn check_oracle_fee(
        &self,
        c: &Collaborators<'_>,
        blob: &PriceBlob,
        action: ProtocolAction,
        provided: u128,
    ) -> CoreResult<()> {
        let expected = c.oracle.validation_cost(blob, action);
        if provided != expected {
            return Err(KeelCoreError::OracleFeeMismatch { expected, provided });
        }
        Ok(())
    }

    fn check_leverage_bounds(&self, leverage: u128) -> CoreResult<()> {
        if leverage < self.params.min_leverage {
            return Err(KeelCoreError::LeverageTooLow(leverage));
        }
        if leverage > self.params.max_leverage {
            return Err(KeelCoreError::LeverageTooHigh(leverage));
        }
        Ok(())
    }

    /// Credit a collected fee: the protocol takes its share, the rest backs
    /// the vault
    fn credit_fee(&mut self, fee: u128) -> CoreResult<()> {
        if fee == 0 {
            return Ok(());
        }
        let protocol_cut = bps_of(fee, self.params.protocol_fee_bps)?;
        self.vault.pending_protocol_fee = self
            .vault
            .pending_protocol_fee
            .checked_add(protocol_cut)
            .ok_or(KeelCoreError::MathOverflow)?;
        self.vault.balance_vault = self
            .vault
            .balance_vault
            .checked_add(fee - protocol_cut)
            .ok_or(KeelCoreError::MathOverflow)?;
        Ok(())
    }
}

fn validated_kind(action: &ValidatedAction) -> ActionKind {
    match action {
        ValidatedAction::Deposit(_) => ActionKind::Deposit,
        ValidatedAction::Withdrawal(_) => ActionKind::Withdrawal,
        ValidatedAction::Open(_) => ActionKind::OpenPosition,
        ValidatedAction::Close(_) => ActionKind::ClosePosition,
    }
}
