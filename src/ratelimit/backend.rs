//! Store trait for abstracting in-process and shared implementations.

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of one atomic admit evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Whether all requested units were inserted
    pub allowed: bool,
    /// Units left after the decision
    pub remaining: u64,
}

/// Outcome of a read-only peek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Live entries after pruning
    pub current: u64,
    /// `limit - current`, floored at zero
    pub remaining: u64,
}

impl Snapshot {
    /// Build a snapshot from a live count.
    pub fn new(current: u64, limit: u64) -> Self {
        Self {
            current,
            remaining: limit.saturating_sub(current),
        }
    }

    /// Whether any quota is left. Not a consumption decision.
    pub fn allowed(&self) -> bool {
        self.remaining > 0
    }
}

/// Trait for the shared ordered store a limiter evaluates against.
///
/// Implementations hold, per key, a set of timestamped unit entries. Both
/// methods must behave as one indivisible step with respect to every other
/// call on the same key; calls on distinct keys must not block each other.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Prune entries older than `now_ms - window_ms`, count the survivors and,
    /// if `current + n <= limit`, insert `n` distinct entries stamped `now_ms`
    /// and refresh the key's idle expiry to `window_ms`.
    ///
    /// Admission is all-or-nothing. A denied call inserts nothing.
    async fn evaluate(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
        n: u64,
    ) -> Result<Evaluation>;

    /// Prune and count only. Never inserts and never refreshes idle expiry.
    async fn peek(&self, key: &str, now_ms: u64, window_ms: u64, limit: u64) -> Result<Snapshot>;
}

#[async_trait]
impl<S: WindowStore + ?Sized> WindowStore for Box<S> {
    async fn evaluate(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
        n: u64,
    ) -> Result<Evaluation> {
        (**self).evaluate(key, now_ms, window_ms, limit, n).await
    }

    async fn peek(&self, key: &str, now_ms: u64, window_ms: u64, limit: u64) -> Result<Snapshot> {
        (**self).peek(key, now_ms, window_ms, limit).await
    }
}

#[async_trait]
impl<S: WindowStore + ?Sized> WindowStore for std::sync::Arc<S> {
    async fn evaluate(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
        n: u64,
    ) -> Result<Evaluation> {
        (**self).evaluate(key, now_ms, window_ms, limit, n).await
    }

    async fn peek(&self, key: &str, now_ms: u64, window_ms: u64, limit: u64) -> Result<Snapshot> {
        (**self).peek(key, now_ms, window_ms, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_floors_remaining() {
        let snapshot = Snapshot::new(9, 7);
        assert_eq!(snapshot.remaining, 0);
        assert!(!snapshot.allowed());
    }

    #[test]
    fn test_snapshot_allowed_with_quota() {
        let snapshot = Snapshot::new(2, 7);
        assert_eq!(snapshot.remaining, 5);
        assert!(snapshot.allowed());
    }
}
