// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

/// `MaxTimerSeconds` as required by the timing engine: the largest future
/// offset we ever ask the OS monotonic clock for in one step. `u32::MAX`
/// safely fits in `Instant`'s working span on every platform we target, so
/// we do not need a narrower span than the spec's floor of 255s.
pub(crate) const MAX_TIMER_SECONDS: u64 = u32::MAX as u64;

/// Long waits (lease/renewal/rebinding intervals beyond `MAX_TIMER_SECONDS`)
/// are decomposed into a sequence of sub-waits by `next_sub_interval`; the
/// caller re-arms against its own absolute deadline on every fire (see
/// `DhcpV4Client::sleep_with_link_check`) so missed ticks cannot accumulate
/// drift.
pub(crate) struct DhcpTimer;

impl DhcpTimer {
    /// Given a total number of seconds still to wait, return the sub-wait
    /// to arm next: never longer than `MAX_TIMER_SECONDS`.
    pub(crate) fn next_sub_interval(remaining_secs: u64) -> Duration {
        Duration::from_secs(remaining_secs.min(MAX_TIMER_SECONDS))
    }
}

/// Tracks `lease_time_elapsed`: seconds since the request that produced the
/// current or pending lease was first sent, recomputed from an absolute
/// anchor on every timer fire so missed ticks cannot cause drift (see
/// timer decomposition design note).
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeaseClock {
    anchor: Instant,
}

impl LeaseClock {
    pub(crate) fn start_now() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    pub(crate) fn anchor(&self) -> Instant {
        self.anchor
    }

    pub(crate) fn elapsed_secs(&self) -> u32 {
        self.anchor.elapsed().as_secs().min(u32::MAX as u64) as u32
    }
}
