//! Per-identity duplicate suppression for attendance marks.
//!
//! Each identity gets its own async mutex guarding the instant of its last
//! successful mark. Callers hold the [`CooldownSlot`] across the whole
//! check, ledger append and record sequence, so two concurrent marks for the
//! same identity cannot both pass the check.

use crate::types::IdentityId;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<Option<DateTime<Utc>>>>;

#[derive(Debug, Default)]
pub struct CooldownTracker {
    slots: Mutex<HashMap<IdentityId, Slot>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`'s cooldown state.
    pub async fn acquire(&self, id: IdentityId) -> CooldownSlot {
        let slot = Arc::clone(self.slots.lock().entry(id).or_default());
        CooldownSlot {
            id,
            last_success: slot.lock_owned().await,
        }
    }
}

/// Exclusive handle on one identity's cooldown state. Released on drop.
#[derive(Debug)]
pub struct CooldownSlot {
    id: IdentityId,
    last_success: OwnedMutexGuard<Option<DateTime<Utc>>>,
}

impl CooldownSlot {
    pub fn identity(&self) -> IdentityId {
        self.id
    }

    /// True when the last successful mark lies less than `window` before `now`.
    /// A clock that has gone backwards counts as inside the window.
    pub fn should_suppress(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        match *self.last_success {
            Some(last) => now - last < window,
            None => false,
        }
    }

    pub fn record(&mut self, now: DateTime<Utc>) {
        *self.last_success = Some(now);
    }
}
