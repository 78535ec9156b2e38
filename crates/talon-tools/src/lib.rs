//! Talon Tools - the tool registry and dispatcher.
//!
//! This crate provides:
//! - [`ToolDefinition`]: one value per tool, built at startup (no dynamic
//!   registration, no hidden global state)
//! - [`ToolRegistry`]: lookup plus feature/permission-gated visibility
//! - [`Dispatcher`]: the `tools/call` orchestration — resolve, gate,
//!   validate, run under a cancellable timeout, classify failures
//!
//! The dispatcher holds no tool state; handlers receive the request
//! context and their validated arguments, nothing else.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod definition;
mod dispatcher;
mod registry;
mod schema;

pub use definition::{ToolDefinition, ToolHandler};
pub use dispatcher::Dispatcher;
pub use registry::ToolRegistry;
pub use schema::validate_args;
