//! Window configuration and the result handed back to callers.

use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::error::{Result, SlidewinError};

/// Default number of units admitted per window.
pub const DEFAULT_LIMIT: u64 = 100;
/// Default length of the sliding window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Configuration for a sliding-window limit.
///
/// Immutable once handed to a limiter. Defaults to 100 units per minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum units admitted within any trailing window
    pub limit: u64,
    /// Length of the trailing window
    pub window: Duration,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
        }
    }
}

impl LimitConfig {
    /// Create a validated configuration.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        let config = Self { limit, window };
        config.validate()?;
        Ok(config)
    }

    /// Check that both the limit and the window are positive.
    ///
    /// The window is carried to the store in whole milliseconds, so anything
    /// below one millisecond is rejected as well.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(SlidewinError::InvalidArgument(
                "limit must be greater than 0".to_string(),
            ));
        }
        if self.window_millis() == 0 {
            return Err(SlidewinError::InvalidArgument(
                "window must be at least 1ms".to_string(),
            ));
        }
        Ok(())
    }

    /// The window length in whole milliseconds.
    pub fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

/// The outcome of an admit or peek call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    /// Whether the units were admitted (for a peek: whether any quota remains)
    pub allowed: bool,
    /// Units still available in the current window
    pub remaining: u64,
    /// Echo of the configured limit
    pub limit: u64,
    /// Always the full configured window, not the time until the oldest entry expires
    #[serde(rename = "reset_after_ms", serialize_with = "serialize_millis")]
    pub reset_after: Duration,
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LimitConfig::default();
        assert_eq!(config.limit, 100);
        assert_eq!(config.window, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = LimitConfig::new(0, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SlidewinError::InvalidArgument(_)));
    }

    #[test]
    fn test_sub_millisecond_window_rejected() {
        let err = LimitConfig::new(10, Duration::ZERO).unwrap_err();
        assert!(matches!(err, SlidewinError::InvalidArgument(_)));
        assert!(LimitConfig::new(10, Duration::from_micros(500)).is_err());
        assert!(LimitConfig::new(10, Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_window_millis() {
        let config = LimitConfig::new(5, Duration::from_millis(1500)).unwrap();
        assert_eq!(config.window_millis(), 1500);
    }

    #[test]
    fn test_result_serializes_reset_after_as_millis() {
        let result = RateLimitResult {
            allowed: true,
            remaining: 4,
            limit: 5,
            reset_after: Duration::from_secs(2),
        };
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["allowed"], true);
        assert_eq!(json["remaining"], 4);
        assert_eq!(json["limit"], 5);
        assert_eq!(json["reset_after_ms"], 2000);
    }
}
