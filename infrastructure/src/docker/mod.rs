//! Docker adapter for the container runtime port.
//!
//! Drives the `docker` client as a subprocess; no daemon API bindings.

mod args;
mod cli_runtime;
mod units;

pub use args::run_args;
pub use cli_runtime::{DockerCliRuntime, DockerSettings};
pub use units::{parse_bytes, parse_percent};
