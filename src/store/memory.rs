//! In-process window store.
//!
//! Each key owns its own mutex-guarded window, so evaluations on the same key
//! are serialized while different keys proceed in parallel. The critical
//! section never awaits, which means a cancelled call either ran to
//! completion or never started.
//!
//! Idle keys are reclaimed by the store itself: every `purge_interval`
//! evaluations one call also sweeps keys whose idle deadline has passed.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::ratelimit::entry::{batch_nonce, live_cutoff, UnitEntry};
use crate::ratelimit::{Evaluation, Snapshot, WindowStore};

/// Per-key state: live entries ordered by timestamp.
#[derive(Debug, Default)]
struct KeyWindow {
    entries: BTreeSet<UnitEntry>,
    /// Next per-key sequence number handed out as an entry index
    next_index: u64,
    /// The key may be reclaimed once the clock moves past this point
    idle_deadline_ms: u64,
}

impl KeyWindow {
    /// Drop every entry strictly older than `now_ms - window_ms`.
    fn prune(&mut self, now_ms: u64, window_ms: u64) {
        let floor = UnitEntry::floor(live_cutoff(now_ms, window_ms));
        self.entries = self.entries.split_off(&floor);
    }

    fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    fn admit(&mut self, now_ms: u64, window_ms: u64, n: u64) {
        let nonce = batch_nonce();
        for _ in 0..n {
            self.entries
                .insert(UnitEntry::new(now_ms, self.next_index, nonce));
            self.next_index += 1;
        }
        self.idle_deadline_ms = now_ms.saturating_add(window_ms);
    }
}

/// A [`WindowStore`] that keeps all state inside the current process.
///
/// Suitable for single-node deployments and tests. State is not shared
/// across processes.
#[derive(Debug)]
pub struct MemoryStore {
    windows: DashMap<String, Arc<Mutex<KeyWindow>>>,
    evaluations: AtomicU64,
    purge_interval: u64,
}

/// Evaluations between two automatic idle sweeps.
pub const DEFAULT_PURGE_INTERVAL: u64 = 1024;

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that sweeps idle keys every `interval`
    /// evaluations. An interval of 0 is treated as 1.
    pub fn with_purge_interval(interval: u64) -> Self {
        Self {
            windows: DashMap::new(),
            evaluations: AtomicU64::new(0),
            purge_interval: interval.max(1),
        }
    }

    /// Number of keys currently tracked, idle ones included.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Remove every key whose idle deadline is strictly before `now_ms`.
    ///
    /// A key whose newest entry sits exactly at `now_ms - window` still holds
    /// a live entry and is kept. Keys currently being evaluated are skipped.
    /// Returns how many keys were removed.
    pub fn purge_idle(&self, now_ms: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            // A second strong reference means a caller is mid-evaluation.
            Arc::strong_count(window) > 1 || window.lock().idle_deadline_ms >= now_ms
        });
        let removed = before.saturating_sub(self.windows.len());

        if removed > 0 {
            debug!(removed = removed, remaining = self.windows.len(), "Reclaimed idle keys");
        }
        removed
    }

    fn window_for(&self, key: &str) -> Arc<Mutex<KeyWindow>> {
        if let Some(window) = self.windows.get(key) {
            return window.clone();
        }
        self.windows
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Count one evaluation and sweep idle keys when the interval comes up.
    fn maybe_purge(&self, now_ms: u64) {
        let seen = self.evaluations.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % self.purge_interval == 0 {
            self.purge_idle(now_ms);
        }
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn evaluate(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
        n: u64,
    ) -> Result<Evaluation> {
        // An unknown key holds nothing, so a request it cannot fit is denied
        // without creating state for it.
        if n > limit && !self.windows.contains_key(key) {
            self.maybe_purge(now_ms);
            return Ok(Evaluation {
                allowed: false,
                remaining: limit,
            });
        }

        let evaluation = {
            let window = self.window_for(key);
            let mut window = window.lock();

            window.prune(now_ms, window_ms);
            let current = window.count();

            match current.checked_add(n) {
                Some(total) if total <= limit => {
                    window.admit(now_ms, window_ms, n);
                    Evaluation {
                        allowed: true,
                        remaining: limit - total,
                    }
                }
                _ => Evaluation {
                    allowed: false,
                    remaining: limit.saturating_sub(current),
                },
            }
        };

        self.maybe_purge(now_ms);
        Ok(evaluation)
    }

    async fn peek(&self, key: &str, now_ms: u64, window_ms: u64, limit: u64) -> Result<Snapshot> {
        let Some(window) = self.windows.get(key).map(|w| w.clone()) else {
            return Ok(Snapshot::new(0, limit));
        };
        let mut window = window.lock();

        window.prune(now_ms, window_ms);
        Ok(Snapshot::new(window.count(), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000_000;

    #[tokio::test]
    async fn test_evaluate_admits_within_limit() {
        let store = MemoryStore::new();

        let eval = store.evaluate("k", NOW, 1_000, 3, 2).await.unwrap();
        assert_eq!(
            eval,
            Evaluation {
                allowed: true,
                remaining: 1
            }
        );

        let eval = store.evaluate("k", NOW, 1_000, 3, 2).await.unwrap();
        assert_eq!(
            eval,
            Evaluation {
                allowed: false,
                remaining: 1
            }
        );
    }

    #[tokio::test]
    async fn test_same_tick_units_are_counted_separately() {
        let store = MemoryStore::new();

        for _ in 0..10 {
            store.evaluate("k", NOW, 1_000, 100, 5).await.unwrap();
        }

        let snapshot = store.peek("k", NOW, 1_000, 100).await.unwrap();
        assert_eq!(snapshot.current, 50);
        assert_eq!(snapshot.remaining, 50);
    }

    #[tokio::test]
    async fn test_entry_at_cutoff_is_live() {
        let store = MemoryStore::new();
        store.evaluate("k", NOW, 1_000, 5, 1).await.unwrap();

        let snapshot = store.peek("k", NOW + 1_000, 1_000, 5).await.unwrap();
        assert_eq!(snapshot.current, 1);

        let snapshot = store.peek("k", NOW + 1_001, 1_000, 5).await.unwrap();
        assert_eq!(snapshot.current, 0);
    }

    #[tokio::test]
    async fn test_oversized_request_never_admits() {
        let store = MemoryStore::new();

        let eval = store.evaluate("k", NOW, 1_000, 3, 4).await.unwrap();
        assert!(!eval.allowed);
        assert_eq!(eval.remaining, 3);

        let eval = store.evaluate("k", NOW, 1_000, 3, u64::MAX).await.unwrap();
        assert!(!eval.allowed);
        assert_eq!(eval.remaining, 3);

        let snapshot = store.peek("k", NOW, 1_000, 3).await.unwrap();
        assert_eq!(snapshot.current, 0);
    }

    #[tokio::test]
    async fn test_peek_does_not_track_unknown_keys() {
        let store = MemoryStore::new();

        let snapshot = store.peek("ghost", NOW, 1_000, 7).await.unwrap();
        assert_eq!(snapshot.remaining, 7);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_idle_removes_expired_keys() {
        let store = MemoryStore::new();
        store.evaluate("old", NOW, 1_000, 5, 1).await.unwrap();
        store.evaluate("new", NOW + 900, 1_000, 5, 1).await.unwrap();
        assert_eq!(store.len(), 2);

        assert_eq!(store.purge_idle(NOW + 1_000), 0);
        assert_eq!(store.purge_idle(NOW + 1_001), 1);
        assert_eq!(store.len(), 1);

        let snapshot = store.peek("new", NOW + 1_001, 1_000, 5).await.unwrap();
        assert_eq!(snapshot.current, 1);
    }

    #[tokio::test]
    async fn test_purge_at_cutoff_keeps_live_entry() {
        let store = MemoryStore::new();
        let first = store.evaluate("k", NOW, 1_000, 1, 1).await.unwrap();
        assert!(first.allowed);

        let snapshot = store.peek("k", NOW + 1_000, 1_000, 1).await.unwrap();
        assert_eq!(snapshot.current, 1);

        assert_eq!(store.purge_idle(NOW + 1_000), 0);

        let second = store.evaluate("k", NOW + 1_000, 1_000, 1, 1).await.unwrap();
        assert!(!second.allowed);
        assert_eq!(second.remaining, 0);
    }

    #[tokio::test]
    async fn test_peek_does_not_refresh_idle_deadline() {
        let store = MemoryStore::new();
        store.evaluate("k", NOW, 1_000, 5, 1).await.unwrap();

        store.peek("k", NOW + 800, 1_000, 5).await.unwrap();

        assert_eq!(store.purge_idle(NOW + 1_001), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_denied_fresh_key_creates_no_state() {
        let store = MemoryStore::new();

        let eval = store.evaluate("k", NOW, 1_000, 1, 2).await.unwrap();
        assert!(!eval.allowed);
        assert_eq!(eval.remaining, 1);
        assert!(store.is_empty());

        let eval = store.evaluate("k", NOW, 1_000, 1, 1).await.unwrap();
        assert!(eval.allowed);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_reclaims_idle_keys_on_its_own() {
        let store = MemoryStore::with_purge_interval(8);

        for i in 0..7 {
            let key = format!("burst-{}", i);
            assert!(store.evaluate(&key, NOW, 1_000, 5, 1).await.unwrap().allowed);
        }
        assert_eq!(store.len(), 7);

        // Eighth call lands well past every idle deadline and triggers a sweep.
        store.evaluate("late", NOW + 5_000, 1_000, 5, 1).await.unwrap();
        assert_eq!(store.len(), 1);

        let snapshot = store.peek("late", NOW + 5_000, 1_000, 5).await.unwrap();
        assert_eq!(snapshot.current, 1);
    }

    #[tokio::test]
    async fn test_automatic_sweep_keeps_live_keys() {
        let store = MemoryStore::with_purge_interval(2);

        store.evaluate("a", NOW, 1_000, 5, 1).await.unwrap();
        // Sweeps at exactly the cutoff: "a" still holds a live entry.
        store.evaluate("b", NOW + 1_000, 1_000, 5, 1).await.unwrap();
        assert_eq!(store.len(), 2);

        let snapshot = store.peek("a", NOW + 1_000, 1_000, 5).await.unwrap();
        assert_eq!(snapshot.current, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_evaluate_same_tick() {
        let store = Arc::new(MemoryStore::new());

        let tasks = (0..64).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.evaluate("hot", NOW, 60_000, 20, 1).await })
        });

        let allowed = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|outcome| outcome.as_ref().unwrap().as_ref().unwrap().allowed)
            .count();

        assert_eq!(allowed, 20);
        let snapshot = store.peek("hot", NOW, 60_000, 20).await.unwrap();
        assert_eq!(snapshot.current, 20);
    }
}
