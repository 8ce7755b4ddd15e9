//! Hireall rate limiter
//!
//! A per-namespace sliding-window rate limiter whose state lives in a shared
//! durable key-value store. When the store is unreachable every call degrades
//! to a process-local in-memory window, so callers always get an answer.
//! Expired state is purged by a periodic cleanup trigger registered once per
//! [`ratelimit::LimiterRegistry`].

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod scheduler;
pub mod storage;
