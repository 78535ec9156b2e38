//! Talon Rate Limiter - request admission control.
//!
//! This crate provides:
//! - A token bucket per api key (capacity = burst, refill = rate/60 per second)
//! - Sliding 60-second windows per connection and globally
//! - The composed limiter with AND semantics across all three
//!
//! A request is admitted only when every limiter admits it, and tokens are
//! consumed atomically across all three so a rejection never charges any of
//! them. Decisions are deterministic given the same monotonic instants; all
//! internal methods take an explicit `now` so tests control time.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod bucket;
mod limiter;
mod window;

pub use bucket::TokenBucket;
pub use limiter::{Decision, KeyLimits, RateLimiter, RateLimiterSettings};
pub use window::SlidingWindow;
