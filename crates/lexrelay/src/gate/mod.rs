//! Rate Gate: per-key sliding-window admission in front of the chat relay
//!
//! Every request for a key increments that key's counter, rejected requests
//! included. A request is rejected once the counter exceeds the limit, until
//! the window anchored at the first request elapses. Stale windows are swept
//! on a wall-clock schedule.

mod client_key;
mod middleware;
mod store;

pub use client_key::{UNKNOWN_CLIENT, client_address, client_key};
pub use middleware::{LIMIT_HEADER, REMAINING_HEADER, rate_limit_middleware};
pub(crate) use middleware::insert_quota_headers;
pub use store::{MemoryRateStore, RateStore, RateWindowEntry};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::RateLimitConfig;

/// Millisecond wall clock
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Outcome of a gate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Continue downstream
    Admitted { limit: u32, remaining: u32 },
    /// Answer 429 and stop
    Limited { limit: u32, retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, RateDecision::Admitted { .. })
    }
}

/// Sliding-window rate gate
pub struct RateGate {
    limit: u32,
    window_ms: u64,
    sweep_interval_ms: u64,
    last_sweep_ms: AtomicU64,
    store: Arc<dyn RateStore>,
    clock: Arc<dyn Clock>,
}

impl RateGate {
    /// Gate over a fresh in-memory store and the system clock
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(MemoryRateStore::new()),
            Arc::new(SystemClock),
        )
    }

    /// Gate over an explicit store and clock
    pub fn with_parts(
        config: &RateLimitConfig,
        store: Arc<dyn RateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            limit: config.limit,
            window_ms: config.window_ms,
            sweep_interval_ms: config.sweep_interval_ms,
            last_sweep_ms: AtomicU64::new(now),
            store,
            clock,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn store(&self) -> &Arc<dyn RateStore> {
        &self.store
    }

    /// Count a request for `key` and decide whether it may proceed
    pub fn check(&self, key: &str) -> RateDecision {
        let now = self.clock.now_ms();
        self.sweep_if_due_at(now);

        let entry = self.store.record_hit(key, now, self.window_ms);

        if entry.count > self.limit {
            let window_end = entry.window_start_ms.saturating_add(entry.window_ms);
            let retry_after_secs = window_end.saturating_sub(now).div_ceil(1000);
            tracing::debug!(
                key = %key,
                count = entry.count,
                retry_after_secs,
                "Rate limit exceeded"
            );
            RateDecision::Limited {
                limit: self.limit,
                retry_after_secs,
            }
        } else {
            RateDecision::Admitted {
                limit: self.limit,
                remaining: self.limit.saturating_sub(entry.count),
            }
        }
    }

    /// Sweep stale windows if the sweep interval has elapsed.
    ///
    /// Returns the number of removed entries, or `None` when no sweep ran.
    pub fn sweep_if_due(&self) -> Option<usize> {
        self.sweep_if_due_at(self.clock.now_ms())
    }

    fn sweep_if_due_at(&self, now: u64) -> Option<usize> {
        let last = self.last_sweep_ms.load(Ordering::Acquire);
        if now.saturating_sub(last) < self.sweep_interval_ms {
            return None;
        }

        // Only the caller that wins the swap sweeps.
        if self
            .last_sweep_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let removed = self.store.sweep(now);
        if removed > 0 {
            tracing::debug!(removed, remaining = self.store.len(), "Swept stale rate windows");
        }
        Some(removed)
    }
}

/// Run `sweep_if_due` on a fixed tick until the runtime shuts down
pub fn spawn_sweeper(gate: Arc<RateGate>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            gate.sweep_if_due();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    fn gate(limit: u32, window_ms: u64, sweep_interval_ms: u64) -> (RateGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = RateLimitConfig {
            limit,
            window_ms,
            sweep_interval_ms,
        };
        let gate = RateGate::with_parts(&config, Arc::new(MemoryRateStore::new()), clock.clone());
        (gate, clock)
    }

    #[test]
    fn test_three_requests_limit_two() {
        let (gate, clock) = gate(2, 60_000, 60_000);

        let first = gate.check("k");
        clock.advance(300);
        let second = gate.check("k");
        clock.advance(300);
        let third = gate.check("k");

        assert_eq!(first, RateDecision::Admitted { limit: 2, remaining: 1 });
        assert_eq!(second, RateDecision::Admitted { limit: 2, remaining: 0 });
        assert_eq!(
            third,
            RateDecision::Limited {
                limit: 2,
                retry_after_secs: 60
            }
        );
    }

    #[test]
    fn test_count_equal_to_limit_is_admitted() {
        let (gate, _clock) = gate(3, 60_000, 60_000);
        gate.check("k");
        gate.check("k");
        assert_eq!(
            gate.check("k"),
            RateDecision::Admitted { limit: 3, remaining: 0 }
        );
        assert!(!gate.check("k").is_admitted());
    }

    #[test]
    fn test_rejections_still_increment() {
        let (gate, _clock) = gate(1, 60_000, 60_000);
        for _ in 0..5 {
            gate.check("k");
        }
        assert_eq!(gate.store().get("k").map(|e| e.count), Some(5));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let (gate, clock) = gate(1, 60_000, 600_000);
        gate.check("k");
        clock.advance(59_001);

        // 999 ms left in the window
        assert_eq!(
            gate.check("k"),
            RateDecision::Limited {
                limit: 1,
                retry_after_secs: 1
            }
        );
    }

    #[test]
    fn test_retry_after_zero_at_window_edge() {
        let (gate, clock) = gate(1, 60_000, 600_000);
        gate.check("k");
        clock.advance(60_000);

        assert_eq!(
            gate.check("k"),
            RateDecision::Limited {
                limit: 1,
                retry_after_secs: 0
            }
        );
    }

    #[test]
    fn test_window_reset_after_expiry() {
        let (gate, clock) = gate(1, 1_000, 600_000);
        gate.check("k");
        assert!(!gate.check("k").is_admitted());

        clock.advance(1_001);
        assert_eq!(
            gate.check("k"),
            RateDecision::Admitted { limit: 1, remaining: 0 }
        );
        let entry = gate.store().get("k").unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.window_start_ms, 1_001_001);
    }

    #[test]
    fn test_sweep_not_before_interval() {
        let (gate, clock) = gate(5, 100, 10_000);
        gate.check("a");
        clock.advance(5_000);

        assert_eq!(gate.sweep_if_due(), None);
        assert!(gate.store().get("a").is_some());
    }

    #[test]
    fn test_sweep_runs_once_per_interval() {
        let (gate, clock) = gate(5, 100, 10_000);
        gate.check("a");
        clock.advance(10_000);

        assert_eq!(gate.sweep_if_due(), Some(1));
        assert_eq!(gate.sweep_if_due(), None);
    }

    #[test]
    fn test_check_triggers_due_sweep() {
        let (gate, clock) = gate(5, 1_000, 2_000);
        gate.check("a");
        clock.advance(2_500);

        gate.check("b");

        assert!(gate.store().get("a").is_none());
        assert_eq!(gate.store().len(), 1);
    }

    #[test]
    fn test_concurrent_checks_count_every_request() {
        let (gate, _clock) = gate(10_000, 60_000, 60_000);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        gate.check("shared");
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..50 {
                    gate.store().sweep(0);
                }
            });
        });

        assert_eq!(gate.store().get("shared").map(|e| e.count), Some(2_000));
    }

    #[test]
    fn test_system_clock_is_positive() {
        assert!(SystemClock.now_ms() > 0);
    }
}
