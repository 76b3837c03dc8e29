//! # Position Ledger
//!
//! Tick-indexed store of every open long position. Each tick bucket holds an
//! insertion-ordered position array, an aggregate exposure counter and a
//! generation counter (`version`) bumped when the whole tick is liquidated.
//!
//! Invariants:
//! - a tick's aggregate exposure equals the sum of its live positions' expo
//! - a stale `(tick, version, index)` reference is rejected with
//!   `OutdatedTick`, never resolved to a reused slot
//!
//! Removal is swap-and-pop: a full close moves the tick's last position into
//! the vacated slot, so callers holding ids for other positions in the same
//! tick must re-resolve after a removal.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::errors::{CoreResult, KeelCoreError};
use crate::math::tick_math;
use crate::math::{mul_div, Rounding};
use crate::types::{Position, PositionId};

/// One liquidation-price bucket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickData {
    /// Generation counter; ids minted under an older version are rejected
    pub version: u64,
    /// Sum of the live positions' total exposure (WAD)
    pub total_expo: u128,
    /// Live positions, insertion-ordered
    pub positions: Vec<Position>,
}

/// Everything captured from a tick at the moment it is liquidated
#[derive(Debug, Clone)]
pub struct LiquidatedTick {
    /// Version the tick had before the bump
    pub version: u64,
    /// Aggregate exposure wiped (WAD)
    pub total_expo: u128,
    /// The wiped positions
    pub positions: Vec<Position>,
}

/// The slice of a position removed by a (partial or full) close
#[derive(Debug, Clone)]
pub struct ClosedSlice {
    /// Collateral removed (WAD)
    pub amount: u128,
    /// Exposure removed, pro rata to the amount (WAD)
    pub total_expo: u128,
    /// Whether the position was removed entirely
    pub full_close: bool,
}

/// Tick-indexed position store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLedger {
    tick_spacing: i32,
    min_long_position: u128,
    ticks: HashMap<i32, TickData>,
    /// Ticks currently holding at least one position, ordered
    populated: BTreeSet<i32>,
    /// Sum of every live position's exposure (WAD)
    total_expo: u128,
    /// Number of live positions
    total_positions: usize,
}

impl PositionLedger {
    /// Create an empty ledger
    pub fn new(tick_spacing: i32, min_long_position: u128) -> CoreResult<Self> {
        if !crate::constants::is_valid_tick_spacing(tick_spacing) {
            return Err(KeelCoreError::InvalidTickSpacing(tick_spacing));
        }
        Ok(Self {
            tick_spacing,
            min_long_position,
            ticks: HashMap::new(),
            populated: BTreeSet::new(),
            total_expo: 0,
            total_positions: 0,
        })
    }

    /// Global aggregate exposure (WAD)
    pub fn total_expo(&self) -> u128 {
        self.total_expo
    }

    /// Number of live positions across all ticks
    pub fn total_positions(&self) -> usize {
        self.total_positions
    }

    /// Current version of a tick (zero if never touched)
    pub fn tick_version(&self, tick: i32) -> u64 {
        self.ticks.get(&tick).map(|t| t.version).unwrap_or(0)
    }

    /// Aggregate exposure of one tick (WAD)
    pub fn tick_expo(&self, tick: i32) -> u128 {
        self.ticks.get(&tick).map(|t| t.total_expo).unwrap_or(0)
    }

    /// Highest tick currently holding positions
    pub fn highest_populated_tick(&self) -> Option<i32> {
        self.populated.iter().next_back().copied()
    }

    /// Number of ticks currently holding positions
    pub fn populated_count(&self) -> usize {
        self.populated.len()
    }

    /// Append a position to its tick bucket
    ///
    /// Fails with `InvalidTick` outside the usable range or off the spacing
    /// grid, and with `PositionTooSmall` below the collateral floor. No
    /// state is touched on failure.
    pub fn open_position(&mut self, tick: i32, position: Position) -> CoreResult<PositionId> {
        tick_math::validate_usable_tick(tick, self.tick_spacing)?;
        if position.amount < self.min_long_position {
            return Err(KeelCoreError::PositionTooSmall {
                amount: position.amount,
                min: self.min_long_position,
            });
        }

        let new_total = self
            .total_expo
            .checked_add(position.total_expo)
            .ok_or(KeelCoreError::MathOverflow)?;

        let bucket = self.ticks.entry(tick).or_default();
        let index = bucket.positions.len();
        bucket.total_expo = bucket
            .total_expo
            .checked_add(position.total_expo)
            .ok_or(KeelCoreError::MathOverflow)?;
        bucket.positions.push(position);

        self.total_expo = new_total;
        self.total_positions += 1;
        self.populated.insert(tick);

        Ok(PositionId {
            tick,
            tick_version: bucket.version,
            index,
        })
    }

    /// Resolve a position id, rejecting stale versions and bad indices
    pub fn get(&self, id: &PositionId) -> CoreResult<&Position> {
        let bucket = self
            .ticks
            .get(&id.tick)
            .ok_or(KeelCoreError::InvalidTick(id.tick))?;
        if bucket.version != id.tick_version {
            return Err(KeelCoreError::OutdatedTick {
                expected: bucket.version,
                found: id.tick_version,
            });
        }
        bucket
            .positions
            .get(id.index)
            .ok_or(KeelCoreError::InvalidPositionIndex {
                tick: id.tick,
                index: id.index,
            })
    }

    /// Overwrite a resolved position in place
    pub fn update_position(&mut self, id: &PositionId, position: Position) -> CoreResult<()> {
        let global_expo = self.total_expo;
        let new_expo = position.total_expo;
        let bucket = Self::resolve_bucket_mut(&mut self.ticks, id)?;
        let old_expo = bucket.positions[id.index].total_expo;

        bucket.total_expo = bucket
            .total_expo
            .checked_sub(old_expo)
            .and_then(|e| e.checked_add(new_expo))
            .ok_or(KeelCoreError::MathOverflow)?;
        bucket.positions[id.index] = position;

        self.total_expo = global_expo
            .checked_sub(old_expo)
            .and_then(|e| e.checked_add(new_expo))
            .ok_or(KeelCoreError::MathOverflow)?;
        Ok(())
    }

    /// Resolve a tick bucket mutably, with the same checks as [`Self::get`]
    fn resolve_bucket_mut<'a>(
        ticks: &'a mut HashMap<i32, TickData>,
        id: &PositionId,
    ) -> CoreResult<&'a mut TickData> {
        let bucket = ticks
            .get_mut(&id.tick)
            .ok_or(KeelCoreError::InvalidTick(id.tick))?;
        if bucket.version != id.tick_version {
            return Err(KeelCoreError::OutdatedTick {
                expected: bucket.version,
                found: id.tick_version,
            });
        }
        if id.index >= bucket.positions.len() {
            return Err(KeelCoreError::InvalidPositionIndex {
                tick: id.tick,
                index: id.index,
            });
        }
        Ok(bucket)
    }

    /// Remove collateral from a position, pro rata in exposure
    ///
    /// A partial close must leave at least the collateral floor behind; a
    /// full close swap-and-pops the slot. Validation happens before any
    /// mutation, so a failed call leaves the ledger untouched.
    pub fn close_position(
        &mut self,
        id: &PositionId,
        amount_to_remove: u128,
    ) -> CoreResult<ClosedSlice> {
        if amount_to_remove == 0 {
            return Err(KeelCoreError::ZeroAmount);
        }
        let floor = self.min_long_position;
        let bucket = Self::resolve_bucket_mut(&mut self.ticks, id)?;
        let position = &bucket.positions[id.index];
        if amount_to_remove > position.amount {
            return Err(KeelCoreError::InvalidParameter(
                "amount exceeds the position collateral",
            ));
        }

        let full_close = amount_to_remove == position.amount;
        let expo_to_remove = if full_close {
            position.total_expo
        } else {
            let remaining = position.amount - amount_to_remove;
            if remaining < floor {
                return Err(KeelCoreError::PositionTooSmall {
                    amount: remaining,
                    min: floor,
                });
            }
            mul_div(
                position.total_expo,
                amount_to_remove,
                position.amount,
                Rounding::Down,
            )?
        };

        if full_close {
            bucket.positions.swap_remove(id.index);
            self.total_positions -= 1;
        } else {
            let position = &mut bucket.positions[id.index];
            position.amount -= amount_to_remove;
            position.total_expo -= expo_to_remove;
        }
        bucket.total_expo -= expo_to_remove;
        self.total_expo -= expo_to_remove;
        if bucket.positions.is_empty() {
            self.populated.remove(&id.tick);
        }

        Ok(ClosedSlice {
            amount: amount_to_remove,
            total_expo: expo_to_remove,
            full_close,
        })
    }

    /// Wipe a whole tick, bumping its version
    ///
    /// Every outstanding id into the tick is invalidated by the bump.
    pub fn liquidate_tick(&mut self, tick: i32) -> CoreResult<LiquidatedTick> {
        let bucket = self
            .ticks
            .get_mut(&tick)
            .filter(|b| !b.positions.is_empty())
            .ok_or(KeelCoreError::InvalidTick(tick))?;

        let version = bucket.version;
        let total_expo = bucket.total_expo;
        let positions = std::mem::take(&mut bucket.positions);

        bucket.version += 1;
        bucket.total_expo = 0;
        self.populated.remove(&tick);
        self.total_expo -= total_expo;
        self.total_positions -= positions.len();

        Ok(LiquidatedTick {
            version,
            total_expo,
            positions,
        })
    }
}
