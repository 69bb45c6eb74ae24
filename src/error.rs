//! Error types for Slidewin operations.

use thiserror::Error;

/// Main error type for Slidewin operations.
///
/// An error never accompanies a partially filled result: when a call fails,
/// no admission decision was produced.
#[derive(Error, Debug)]
pub enum SlidewinError {
    /// A caller-supplied argument was rejected before touching the store
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The shared store could not be reached, dropped the connection or timed out
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] redis::RedisError),

    /// The store replied with something the evaluator cannot interpret
    #[error("Store protocol error: {0}")]
    StoreProtocol(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for SlidewinError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
        {
            SlidewinError::StoreUnavailable(err)
        } else {
            SlidewinError::StoreProtocol(err.to_string())
        }
    }
}

impl From<config::ConfigError> for SlidewinError {
    fn from(err: config::ConfigError) -> Self {
        SlidewinError::Config(err.to_string())
    }
}

/// Result type alias for Slidewin operations.
pub type Result<T> = std::result::Result<T, SlidewinError>;
