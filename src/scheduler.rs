//! C5 — Scheduler: a lazy, cancellable sequence of tick events pacing the
//! audit at a fixed period, with coalesce-on-overrun semantics (§4.5).

use crate::clock::Clock;
use crate::error::ConfigError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Preserve the grid: after a long tick, fire back-to-back until caught up.
    Burst,
    /// Skip straight to the next future deadline after an overrun (default).
    Coalesce,
}

impl Default for OverrunPolicy {
    fn default() -> Self {
        OverrunPolicy::Coalesce
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub tick_id: u64,
    pub schedule_index: u64,
    pub period_ns: i64,
    pub t0_ns: i64,
    pub deadline_ns: i64,
    pub start_ns: i64,
    pub dt_ns: i64,
    pub lateness_ns: i64,
    pub skipped_periods: u64,
}

/// A single cooperative cancellation token, shared between the controller
/// and the scheduler (§5 Cancellation and timeouts).
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct Scheduler<C> {
    clock: C,
    period_ns: i64,
    t0_ns: i64,
    policy: OverrunPolicy,
    cancellation: CancellationToken,

    tick_id: u64,
    schedule_index: u64,
    prev_start_ns: Option<i64>,
}

impl<C> Scheduler<C>
where
    C: Clock,
{
    pub fn new(
        clock: C,
        period_ms: u64,
        policy: OverrunPolicy,
        cancellation: CancellationToken,
    ) -> Result<Self, ConfigError> {
        if period_ms == 0 {
            return Err(ConfigError::InvalidPeriod);
        }

        let period_ns = (period_ms as i64)
            .checked_mul(1_000_000)
            .ok_or(ConfigError::InvalidPeriod)?;

        let t0_ns = clock.now_ns();

        Ok(Self {
            clock,
            period_ns,
            t0_ns,
            policy,
            cancellation,
            tick_id: 0,
            schedule_index: 0,
            prev_start_ns: None,
        })
    }

    pub fn t0_ns(&self) -> i64 {
        self.t0_ns
    }

    /// Await and produce the next tick, or `None` if cancellation fired
    /// during the wait (§4.5 step 2).
    pub async fn next_tick(&mut self) -> Option<Tick> {
        let naive_deadline_ns = self.t0_ns + (self.schedule_index as i64) * self.period_ns;

        // Decide which grid slot to target *before* sleeping. `now_ns` here
        // reflects only how late the caller was in asking for this tick (the
        // previous tick's body duration); it is never the clock's own wake
        // jitter, so a normal on-time tick always keeps servicing the slot
        // it was going to await.
        let (actual_index, deadline_ns, skipped_periods) = match self.policy {
            OverrunPolicy::Burst => (self.schedule_index, naive_deadline_ns, 0),
            OverrunPolicy::Coalesce => {
                let now_ns = self.clock.now_ns();
                if now_ns <= naive_deadline_ns {
                    (self.schedule_index, naive_deadline_ns, 0)
                } else {
                    // Already behind before we even sleep: jump straight to
                    // the next deadline at or after now, i.e. the smallest i
                    // with t0 + i*period >= now (ceil((now - t0) / period)).
                    let elapsed = now_ns - self.t0_ns;
                    let ceil_index = (elapsed + self.period_ns - 1) / self.period_ns;
                    let actual_index = self.schedule_index.max(ceil_index.max(0) as u64);
                    let skipped = actual_index.saturating_sub(self.schedule_index);
                    let deadline_ns = self.t0_ns + (actual_index as i64) * self.period_ns;
                    (actual_index, deadline_ns, skipped)
                }
            }
        };

        self.clock.sleep_until(deadline_ns).await;

        if self.cancellation.is_cancelled() {
            return None;
        }

        let start_ns = self.clock.now_ns();
        let dt_ns = match self.prev_start_ns {
            None => 0,
            Some(prev) => start_ns - prev,
        };
        let lateness_ns = (start_ns - deadline_ns).max(0);

        let tick = Tick {
            tick_id: self.tick_id,
            schedule_index: actual_index,
            period_ns: self.period_ns,
            t0_ns: self.t0_ns,
            deadline_ns,
            start_ns,
            dt_ns,
            lateness_ns,
            skipped_periods,
        };

        self.tick_id += 1;
        self.schedule_index = actual_index + 1;
        self.prev_start_ns = Some(start_ns);

        Some(tick)
    }
}
