//! Sliding-window admission logic.

mod backend;
mod clock;
pub(crate) mod entry;
mod limiter;
mod window;

pub use backend::{Evaluation, Snapshot, WindowStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::UnitEntry;
pub use limiter::SlidingWindowLimiter;
pub use window::{LimitConfig, RateLimitResult, DEFAULT_LIMIT, DEFAULT_WINDOW};
