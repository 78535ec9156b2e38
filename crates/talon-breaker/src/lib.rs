//! Talon Breaker - circuit breakers for backend calls.
//!
//! This crate provides:
//! - The three-state (closed / open / half-open) breaker state machine
//! - A `guard()` combinator wrapping a backend future
//! - A registry keyed by backend service name with status snapshots
//!
//! A breaker counts only *matched* failures, decided by a predicate over the
//! caller's error type: connection errors, timeouts, and 5xx responses trip
//! it; validation errors and not-found do not. While open, every call fails
//! fast without touching the backend. State reads and transitions are short
//! separate critical sections; the lock is never held across awaited I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod breaker;
mod registry;

pub use breaker::{BreakerSettings, CircuitBreaker, CircuitState, Rejected};
pub use registry::{BreakerRegistry, BreakerStatus};
