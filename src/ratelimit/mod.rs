//! Rate limiting logic and state management.

mod admin;
mod limiter;
mod memory;
mod registry;
mod window;

pub use admin::clear_all_rate_limit_data;
pub use limiter::{CleanupReport, RateLimiter};
pub use memory::MemoryWindows;
pub use registry::LimiterRegistry;
pub use window::{RateLimitStore, RateWindowEntry};
