//! # Tick Math
//!
//! Conversions between ticks and WAD prices. Ticks are geometric price
//! buckets: one tick is a 0.05% price step (base 1.0005), so bucket width is
//! a constant relative percentage at every price level.
//!
//! The forward map decomposes the tick over precomputed Q64 powers of
//! 1.0005^(2^i); the inverse is a binary search over the forward map, which
//! makes the round trip `price_to_tick(tick_to_price(t)) == t` exact for
//! every valid tick.

use crate::constants::{BPS_DENOMINATOR, MAX_TICK, MIN_TICK, Q64, WAD};
use crate::errors::{CoreResult, KeelCoreError};
use crate::math::big_int::{mul_div, Rounding};

/// Precomputed values of 1.0005^(2^i) in Q64 format
const MAGIC_1_0005_POW_2: [u128; 17] = [
    18455967445746406392,             // 2^0
    18465195429469279595,             // 2^1
    18483665241197606242,             // 2^2
    18520660306420851100,             // 2^3
    18594872721994361904,             // 2^4
    18744190853710774470,             // 2^5
    19046433850680128333,             // 2^6
    19665619091303586997,             // 2^7
    20965031698760552683,             // 2^8
    23827107503294314436,             // 2^9
    30776761996859873560,             // 2^10
    51348307063105416435,             // 2^11
    142933009083415132027,            // 2^12
    1107504121269639804658,           // 2^13
    66492242410266205068906,          // 2^14
    239674724335052694807272689,      // 2^15
    3114044042436362229484975885119537, // 2^16
];

/// Get the WAD price at a tick
pub fn tick_to_price(tick: i32) -> CoreResult<u128> {
    let q64 = tick_to_price_q64(tick)?;
    mul_div(q64, WAD, Q64, Rounding::Down)
}

/// Get the Q64 price ratio at a tick: 1.0005^tick
fn tick_to_price_q64(tick: i32) -> CoreResult<u128> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(KeelCoreError::TickOutOfRange(tick));
    }

    let abs_tick = tick.unsigned_abs();
    let mut ratio = Q64;

    // Binary decomposition over the magic constants
    for (i, magic) in MAGIC_1_0005_POW_2.iter().enumerate() {
        if abs_tick & (1 << i) != 0 {
            ratio = mul_shift(ratio, *magic)?;
        }
    }

    if tick < 0 {
        ratio = reciprocal(ratio)?;
    }

    Ok(ratio)
}

/// Get the highest tick whose price does not exceed the given WAD price
pub fn price_to_tick(price: u128) -> CoreResult<i32> {
    if price < tick_to_price(MIN_TICK)? || price > tick_to_price(MAX_TICK)? {
        return Err(KeelCoreError::InvalidPrice);
    }

    let mut low = MIN_TICK;
    let mut high = MAX_TICK;

    while low <= high {
        let mid = low + (high - low) / 2;
        let mid_price = tick_to_price(mid)?;

        if mid_price == price {
            return Ok(mid);
        } else if mid_price < price {
            low = mid + 1;
        } else {
            high = mid - 1;
        }
    }

    Ok(high)
}

/// Get the highest spacing-aligned tick whose price does not exceed the
/// given WAD price
pub fn price_to_aligned_tick(price: u128, tick_spacing: i32) -> CoreResult<i32> {
    check_spacing(tick_spacing)?;
    let tick = price_to_tick(price)?;
    let aligned = align_tick_down(tick, tick_spacing);
    if aligned < min_usable_tick(tick_spacing) {
        return Err(KeelCoreError::InvalidPrice);
    }
    Ok(aligned)
}

/// Multiply two Q64 values, dividing the product back by 2^64
fn mul_shift(a: u128, b: u128) -> CoreResult<u128> {
    mul_div(a, b, Q64, Rounding::Down)
}

/// Reciprocal of a Q64 value: Q64^2 / value
fn reciprocal(value: u128) -> CoreResult<u128> {
    if value == 0 {
        return Err(KeelCoreError::DivisionByZero);
    }
    mul_div(Q64, Q64, value, Rounding::Down)
}

/// Check that a tick spacing is within bounds
fn check_spacing(tick_spacing: i32) -> CoreResult<()> {
    if !crate::constants::is_valid_tick_spacing(tick_spacing) {
        return Err(KeelCoreError::InvalidTickSpacing(tick_spacing));
    }
    Ok(())
}

/// Round a tick towards negative infinity to a multiple of the spacing
pub fn align_tick_down(tick: i32, tick_spacing: i32) -> i32 {
    let compressed = tick / tick_spacing;
    if tick < 0 && tick % tick_spacing != 0 {
        (compressed - 1) * tick_spacing
    } else {
        compressed * tick_spacing
    }
}

/// Round a tick towards positive infinity to a multiple of the spacing
pub fn align_tick_up(tick: i32, tick_spacing: i32) -> i32 {
    let compressed = tick / tick_spacing;
    if tick > 0 && tick % tick_spacing != 0 {
        (compressed + 1) * tick_spacing
    } else {
        compressed * tick_spacing
    }
}

/// Smallest usable tick: MIN_TICK rounded inward to a multiple of spacing
pub fn min_usable_tick(tick_spacing: i32) -> i32 {
    align_tick_up(MIN_TICK, tick_spacing)
}

/// Largest usable tick: MAX_TICK rounded inward to a multiple of spacing
pub fn max_usable_tick(tick_spacing: i32) -> i32 {
    align_tick_down(MAX_TICK, tick_spacing)
}

/// Check that a tick is usable as a position bucket for the given spacing
pub fn validate_usable_tick(tick: i32, tick_spacing: i32) -> CoreResult<()> {
    check_spacing(tick_spacing)?;
    if tick < min_usable_tick(tick_spacing)
        || tick > max_usable_tick(tick_spacing)
        || tick % tick_spacing != 0
    {
        return Err(KeelCoreError::InvalidTick(tick));
    }
    Ok(())
}

/// Liquidation price net of the penalty, in WAD
///
/// The tick's nominal price is the liquidation trigger; positions are valued
/// as if closed at `tick_price * (1 - penalty_bps / 10^4)`, the gap covering
/// the liquidation penalty. Rounds up.
pub fn tick_price_without_penalty(tick: i32, penalty_bps: u16) -> CoreResult<u128> {
    let tick_price = tick_to_price(tick)?;
    mul_div(
        tick_price,
        BPS_DENOMINATOR - penalty_bps as u128,
        BPS_DENOMINATOR,
        Rounding::Up,
    )
}
