//! Communication staleness monitor
//!
//! Raises the stale bit of `statusFlags` when no J1939 frame has been
//! decoded for longer than the timeout, and clears it again once fresh data
//! arrives. Timestamps are wrapping 32-bit milliseconds.

use tracing::{info, warn};

use crate::constants::DEFAULT_STALE_TIMEOUT_MS;
use crate::state::EngineStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessMonitor {
    timeout_ms: u32,
}

impl Default for StalenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_TIMEOUT_MS)
    }
}

impl StalenessMonitor {
    pub fn new(timeout_ms: u32) -> Self {
        Self { timeout_ms }
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Run one tick at `now_ms`; returns whether the data is stale.
    pub fn tick(&self, store: &mut EngineStore, now_ms: u32) -> bool {
        let age = now_ms.wrapping_sub(store.last_update());
        let stale = age > self.timeout_ms;
        let was_stale = store.is_stale();

        if stale {
            store.mark_stale();
            if !was_stale {
                warn!(
                    "no J1939 data for {} ms, flagging communication stale",
                    age
                );
            }
        } else {
            store.clear_stale();
            if was_stale {
                info!("J1939 data resumed, communication stale cleared");
            }
        }

        stale
    }
}
