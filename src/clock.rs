//! Monotone time abstraction shared by the scheduler and every reader.
//!
//! The spec requires every reader to agree on a single timestamp per tick and
//! forbids relying on "the runtime's global clock" directly so that tests can
//! drive time deterministically (see DESIGN NOTES, "Global monotone time").

use std::sync::atomic::{AtomicI64, Ordering};
use tokio::time::Instant;

/// A source of monotone nanosecond timestamps, independent of wall time.
pub trait Clock: Send + Sync + 'static {
    /// Current monotone time, in nanoseconds since some arbitrary origin.
    fn now_ns(&self) -> i64;

    /// Suspend until the monotone clock reaches `deadline_ns`. The sleep
    /// primitive only guarantees "not before"; callers must re-read
    /// [`Clock::now_ns`] after waking rather than trusting the deadline.
    fn sleep_until(&self, deadline_ns: i64) -> impl Future<Output = ()> + Send;
}

/// Real clock backed by `tokio::time::Instant`, anchored at construction.
#[derive(Clone)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ns(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }

    #[allow(clippy::manual_async_fn)]
    fn sleep_until(&self, deadline_ns: i64) -> impl Future<Output = ()> + Send {
        let target = self.origin + std::time::Duration::from_nanos(deadline_ns.max(0) as u64);
        async move {
            tokio::time::sleep_until(target).await;
        }
    }
}

/// Deterministic clock for tests: time only moves when explicitly advanced.
/// Mirrors the teacher's `HardcodedReader` test-double convention
/// (`datasource::tests`) but lives alongside the production type since
/// several modules need to share one fake clock instance across readers.
#[cfg(test)]
#[derive(Clone)]
pub struct FakeClock {
    now: std::sync::Arc<AtomicI64>,
}

#[cfg(test)]
impl FakeClock {
    pub fn new(start_ns: i64) -> Self {
        Self {
            now: std::sync::Arc::new(AtomicI64::new(start_ns)),
        }
    }

    pub fn advance(&self, delta_ns: i64) {
        self.now.fetch_add(delta_ns, Ordering::SeqCst);
    }

    pub fn set(&self, ns: i64) {
        self.now.store(ns, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now_ns(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    #[allow(clippy::manual_async_fn)]
    fn sleep_until(&self, deadline_ns: i64) -> impl Future<Output = ()> + Send {
        let clock = self.clone();
        async move {
            if clock.now_ns() < deadline_ns {
                clock.set(deadline_ns);
            }
        }
    }
}
