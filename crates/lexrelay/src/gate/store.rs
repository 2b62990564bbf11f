//! Window storage for the rate gate
//!
//! The store is the only state shared across concurrent chat requests.
//! `MemoryRateStore` keeps it in a process-local `DashMap`; a deployment with
//! several instances can implement `RateStore` over a shared cache instead.

use dashmap::DashMap;

/// Per-key counter for the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindowEntry {
    /// Requests observed in the current window, rejected ones included
    pub count: u32,
    /// Start of the current window (milliseconds since the epoch)
    pub window_start_ms: u64,
    /// Window length this entry was created with
    pub window_ms: u64,
}

impl RateWindowEntry {
    fn fresh(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            window_start_ms: now_ms,
            window_ms,
        }
    }

    /// The window has elapsed and the next hit starts a new one
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) > self.window_ms
    }

    /// Old enough to be dropped by a sweep
    pub fn is_stale(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) > self.window_ms.saturating_mul(2)
    }
}

/// Keyed window counters with atomic increment-and-read
pub trait RateStore: Send + Sync {
    /// Count one request for `key`, starting a new window first if the
    /// current one has expired, and return the entry after the increment.
    fn record_hit(&self, key: &str, now_ms: u64, window_ms: u64) -> RateWindowEntry;

    /// Delete stale entries, returning how many were removed
    fn sweep(&self, now_ms: u64) -> usize;

    /// Snapshot of the entry for `key`
    fn get(&self, key: &str) -> Option<RateWindowEntry>;

    /// Number of tracked keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store backed by a sharded concurrent map
#[derive(Debug, Default)]
pub struct MemoryRateStore {
    windows: DashMap<String, RateWindowEntry>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateStore for MemoryRateStore {
    fn record_hit(&self, key: &str, now_ms: u64, window_ms: u64) -> RateWindowEntry {
        // The shard lock is held for the whole read-modify-write.
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindowEntry::fresh(now_ms, window_ms));

        if entry.is_expired(now_ms) {
            *entry = RateWindowEntry::fresh(now_ms, window_ms);
        }

        entry.count = entry.count.saturating_add(1);
        *entry
    }

    fn sweep(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        self.windows.retain(|_, entry| {
            let stale = entry.is_stale(now_ms);
            removed += usize::from(stale);
            !stale
        });
        removed
    }

    fn get(&self, key: &str) -> Option<RateWindowEntry> {
        self.windows.get(key).map(|entry| *entry)
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}
