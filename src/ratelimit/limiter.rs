//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::error::{Result, SlidewinError};

use super::backend::WindowStore;
use super::clock::{Clock, SystemClock};
use super::window::{LimitConfig, RateLimitResult};

/// The sliding-window limiter callers talk to.
///
/// Holds no per-key state of its own: every call is exactly one evaluation
/// against the store, with no retries and no caching of outcomes. Cheap to
/// share across tasks behind an `Arc`.
pub struct SlidingWindowLimiter<S> {
    store: S,
    config: LimitConfig,
    clock: Arc<dyn Clock>,
}

impl<S: WindowStore> SlidingWindowLimiter<S> {
    /// Create a limiter reading time from the system clock.
    pub fn new(store: S, config: LimitConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit clock.
    pub fn with_clock(store: S, config: LimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            clock,
        })
    }

    /// The configuration this limiter enforces.
    pub fn config(&self) -> LimitConfig {
        self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Admit a single unit for `key`.
    pub async fn allow(&self, key: &str) -> Result<RateLimitResult> {
        self.allow_n(key, 1).await
    }

    /// Admit `n` units for `key`, all or nothing.
    ///
    /// Fails with [`SlidewinError::InvalidArgument`] for `n == 0` without
    /// touching the store.
    pub async fn allow_n(&self, key: &str, n: u64) -> Result<RateLimitResult> {
        if n == 0 {
            return Err(SlidewinError::InvalidArgument(format!(
                "n must be greater than 0, got {}",
                n
            )));
        }

        let now_ms = self.clock.now_millis();
        let evaluation = self
            .store
            .evaluate(key, now_ms, self.config.window_millis(), self.config.limit, n)
            .await
            .inspect_err(|e| warn!(key = %key, n = n, error = %e, "Admit evaluation failed"))?;

        trace!(
            key = %key,
            n = n,
            limit = self.config.limit,
            remaining = evaluation.remaining,
            allowed = evaluation.allowed,
            "Evaluated admit"
        );

        if !evaluation.allowed {
            debug!(key = %key, n = n, remaining = evaluation.remaining, "Rate limit exceeded");
        }

        Ok(self.result(evaluation.allowed, evaluation.remaining))
    }

    /// Peek at the quota left for `key` without consuming any.
    ///
    /// `allowed` reports whether any quota remains.
    pub async fn status(&self, key: &str) -> Result<RateLimitResult> {
        let now_ms = self.clock.now_millis();
        let snapshot = self
            .store
            .peek(key, now_ms, self.config.window_millis(), self.config.limit)
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "Status peek failed"))?;

        trace!(
            key = %key,
            current = snapshot.current,
            remaining = snapshot.remaining,
            "Peeked window"
        );

        Ok(self.result(snapshot.allowed(), snapshot.remaining))
    }

    fn result(&self, allowed: bool, remaining: u64) -> RateLimitResult {
        RateLimitResult {
            allowed,
            remaining,
            limit: self.config.limit,
            reset_after: self.config.window,
        }
    }
}
