//! Slidewin - Distributed Sliding-Window Rate Limiting
//!
//! This crate enforces a per-key quota over a rolling time window. All
//! authoritative state lives in a shared ordered store, so any number of
//! independent processes can enforce one limit consistently. Two stores are
//! provided: an in-process [`store::MemoryStore`] and a Redis-backed
//! [`store::RedisStore`] that evaluates each call as a single Lua script.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use error::{Result, SlidewinError};
pub use ratelimit::{LimitConfig, RateLimitResult, SlidingWindowLimiter, WindowStore};
