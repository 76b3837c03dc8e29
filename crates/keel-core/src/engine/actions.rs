//! # Pending Action Queue
//!
//! FIFO queue of in-flight two-phase actions, at most one per validator
//! address. Any caller can resolve the oldest entries once they expire,
//! which keeps a single abandoned action from wedging its validator slot.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::errors::{CoreResult, KeelCoreError};
use crate::types::{Address, PendingAction};

/// Queue of pending actions keyed by validator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingQueue {
    actions: HashMap<Address, PendingAction>,
    /// Validators in initiation order; the front is the oldest
    order: VecDeque<Address>,
}

impl PendingQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of in-flight actions
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The pending action of a validator, if any
    pub fn get(&self, validator: &Address) -> Option<&PendingAction> {
        self.actions.get(validator)
    }

    /// The oldest pending action, if any
    pub fn oldest(&self) -> Option<&PendingAction> {
        self.order.front().and_then(|v| self.actions.get(v))
    }

    /// Register a new pending action
    ///
    /// At most one action per validator may be in flight; a second initiate
    /// is rejected until the first is validated, however stale it is.
    pub fn push(&mut self, action: PendingAction) -> CoreResult<()> {
        if self.actions.contains_key(&action.validator) {
            return Err(KeelCoreError::PendingActionActive);
        }
        self.order.push_back(action.validator);
        self.actions.insert(action.validator, action);
        Ok(())
    }

    /// Remove and return a validator's pending action
    pub fn remove(&mut self, validator: &Address) -> Option<PendingAction> {
        let action = self.actions.remove(validator)?;
        self.order.retain(|v| v != validator);
        Some(action)
    }
}
