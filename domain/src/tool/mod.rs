//! Tool domain
//!
//! Tools are opaque units of execution that accept one JSON input and produce
//! one JSON result from inside a sandbox.
//!
//! - [`entities`]: [`ToolDefinition`](entities::ToolDefinition),
//!   [`ToolExecutable`](entities::ToolExecutable), [`Tool`](entities::Tool)
//! - [`value_objects`]: [`ToolExecutionResult`](value_objects::ToolExecutionResult)
//!   and its error/metadata parts
//! - [`traits`]: registration-time validation

pub mod entities;
pub mod traits;
pub mod value_objects;
