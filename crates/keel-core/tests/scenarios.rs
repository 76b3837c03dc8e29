//! End-to-end protocol scenarios: balanced opening, penalty liquidation,
//! withdrawal settlement, temporal rejection and the bounded walk.

mod common;

use common::*;
use keel_core::constants::WAD;
use keel_core::math::tick_math;
use keel_core::rewards::LiquidationRewardsManager;
use keel_core::token::StableToken;
use keel_core::types::{ProtocolAction, ValidateOpenOutcome};
use keel_core::KeelCoreError;

/// Fee-free params with wide-open imbalance limits so flows are
/// unconstrained; dedicated tests pin the limits down.
fn flow_params() -> keel_core::ProtocolParams {
    keel_core::ProtocolParams {
        funding_sf: 0,
        open_imbalance_limit_bps: 5_000,
        deposit_imbalance_limit_bps: 5_000,
        withdrawal_imbalance_limit_bps: 5_000,
        close_imbalance_limit_bps: 5_000,
        ..test_params()
    }
}

fn seeded() -> Harness {
    let mut harness = Harness::new(flow_params());
    harness
        .protocol
        .initialize(
            &mut harness.token,
            addr(999),
            100 * WAD,
            100 * WAD,
            1_000 * WAD,
            START_PRICE,
            0,
        )
        .unwrap();
    harness
}

#[test]
fn scenario_deposit_and_open_reach_balance() {
    let mut harness = Harness::new(flow_params());

    // deposit 10 at price 2000
    harness.initiate_deposit(1, 10 * WAD, START_PRICE, 100).unwrap();
    let (deposit, _) = harness.validate_deposit(1, 1, START_PRICE, 125).unwrap();
    assert_eq!(deposit.minted_shares, 20_000 * WAD);
    assert_eq!(harness.protocol.vault().balance_vault, 10 * WAD);

    // open 10 with liquidation at 1000: ~2x leverage
    harness
        .initiate_open(2, 10 * WAD, 1_000 * WAD, START_PRICE, 200)
        .unwrap();
    let (outcome, _) = harness.validate_open(2, 2, START_PRICE, 225).unwrap();
    let open = match outcome {
        ValidateOpenOutcome::Validated(open) => open,
        ValidateOpenOutcome::Liquidated => panic!("unexpected liquidation"),
    };

    let two_x = 2 * WAD;
    let tolerance = WAD / 50; // one tick of slack
    assert!(open.leverage > two_x - tolerance && open.leverage <= two_x);
    assert!(open.total_expo > 20 * WAD - 10 * tolerance && open.total_expo <= 20 * WAD);

    // the deposit needed to balance this long is its expo minus its own
    // collateral
    let balancing_deposit = open.total_expo - 10 * WAD;
    assert!(balancing_deposit > 10 * WAD - 10 * tolerance && balancing_deposit <= 10 * WAD);
}

#[test]
fn scenario_penalty_liquidation_and_deterministic_reward() {
    let params = keel_core::ProtocolParams {
        liquidation_penalty_bps: 200,
        ..flow_params()
    };
    let mut harness = Harness::new(params);
    harness
        .protocol
        .initialize(
            &mut harness.token,
            addr(999),
            100 * WAD,
            100 * WAD,
            1_000 * WAD,
            START_PRICE,
            0,
        )
        .unwrap();

    let report = harness.liquidate(7, 990 * WAD, 0, 1_000).unwrap();
    assert_eq!(report.liquidated_ticks(), 1);

    let info = &report.ticks[0];
    // effective liquidation price is the tick price net of 2%
    let expected_wo_penalty = keel_core::math::mul_div(
        info.tick_price,
        10_000 - 200,
        10_000,
        keel_core::math::Rounding::Up,
    )
    .unwrap();
    assert_eq!(info.price_without_penalty, expected_wo_penalty);
    assert!(info.remaining_collateral > 0);

    // the reward is a pure function of the reported outcome
    let expected_reward = harness.rewards.get_liquidation_rewards(
        &report.ticks,
        990 * WAD,
        report.rebased,
        report.rebalancer_action,
        ProtocolAction::Liquidation,
        None,
        &blob(990 * WAD, 1_000),
    );
    assert!(!report.rebased);
    assert_eq!(report.rewards, expected_reward);

    // every liquidated position's collateral stayed in the protocol; only
    // the reward left it
    let vault = harness.protocol.vault();
    assert_eq!(vault.total_balance(), 200 * WAD - report.rewards);
    assert_eq!(vault.balance_long, 0);
}

#[test]
fn scenario_withdrawal_settles_and_refunds_deposit() {
    let mut harness = seeded();

    // initial supply 200k backed by 100 collateral
    harness
        .initiate_withdrawal(3, 6_000 * WAD, START_PRICE, 100)
        .unwrap();

    let vault_before = harness.protocol.vault().balance_vault;
    let supply_before = harness.token.total_supply();

    let (outcome, refund) = harness.validate_withdrawal(3, 3, START_PRICE, 125).unwrap();
    assert_eq!(outcome.asset_out, 3 * WAD);
    assert_eq!(outcome.fee, 0);

    // security deposit went back to the initiator
    assert_eq!(refund.to, addr(3));
    assert_eq!(refund.amount, harness.security_deposit());

    let vault = harness.protocol.vault();
    assert_eq!(vault.balance_vault, vault_before - 3 * WAD);
    assert_eq!(harness.token.total_supply(), supply_before - 6_000 * WAD);
    assert!(harness.protocol.pending_action(&addr(3)).is_none());
}

#[test]
fn scenario_early_validation_rejected_without_mutation() {
    let mut harness = seeded();
    harness.initiate_deposit(4, 5 * WAD, START_PRICE, 100).unwrap();

    let snapshot = harness.protocol.clone();

    // validation delay is 24s; a price stamped 10s after initiation is too
    // early
    let err = harness.validate_deposit(4, 4, START_PRICE, 110);
    assert!(matches!(
        err,
        Err(KeelCoreError::TimestampTooEarly { .. })
    ));

    assert_eq!(harness.protocol.vault(), snapshot.vault());
    assert!(harness.protocol.pending_action(&addr(4)).is_some());

    // after the delay the same action settles
    harness.validate_deposit(4, 4, START_PRICE, 125).unwrap();
    assert!(harness.protocol.pending_action(&addr(4)).is_none());
}

#[test]
fn scenario_bounded_walk_resumes() {
    let mut harness = seeded();

    // four more populated ticks above the seeded one
    let mut now = 100;
    for (user, liq) in [(11u64, 1_100u128), (12, 1_200), (13, 1_300), (14, 1_400)] {
        harness.open_validated(user, 5 * WAD, liq * WAD, START_PRICE, now);
        now += 100;
    }
    assert_eq!(harness.protocol.ledger().populated_count(), 5);

    // market collapses below every liquidation price; the walk is capped
    let report = harness.liquidate(7, 500 * WAD, 2, 2_000).unwrap();
    assert_eq!(report.liquidated_ticks(), 2);
    assert_eq!(harness.protocol.ledger().populated_count(), 3);

    // boundary parked at the last processed tick
    let boundary = harness.protocol.vault().liquidation_boundary.unwrap();
    assert_eq!(boundary.0, report.ticks[1].tick);

    // a later call resumes and completes the sweep
    let report = harness.liquidate(7, 500 * WAD, 10, 2_001).unwrap();
    assert_eq!(report.liquidated_ticks(), 3);
    assert_eq!(harness.protocol.ledger().total_positions(), 0);
    assert_eq!(harness.protocol.ledger().total_expo(), 0);
}

#[test]
fn scenario_liquidation_is_idempotent_at_same_state() {
    let mut harness = seeded();

    harness.liquidate(7, START_PRICE, 0, 500).unwrap();
    let snapshot = harness.protocol.vault().clone();

    // same timestamp, same price: nothing accrues, nothing liquidates
    let report = harness.liquidate(7, START_PRICE, 0, 500).unwrap();
    assert_eq!(report.liquidated_ticks(), 0);
    assert_eq!(report.rewards, 0);
    assert_eq!(harness.protocol.vault(), &snapshot);
}

#[test]
fn scenario_desired_liq_price_lands_on_grid() {
    let mut harness = seeded();
    let (id, _) = harness
        .initiate_open(21, 5 * WAD, 1_234 * WAD, START_PRICE, 100)
        .unwrap();

    // stored tick price never exceeds the requested liquidation price
    let tick_price = tick_math::tick_to_price(id.tick).unwrap();
    assert!(tick_price <= 1_234 * WAD);
    assert!(tick_price > 1_233 * WAD);
}
