//! Resource accounting: unit parsing, pools, and allocations.

pub mod entities;
pub mod units;

pub use entities::{
    ExecutionId, ResourceAllocation, ResourceAmounts, ResourceError, ResourceKind, ResourcePool,
    ResourcePools, ResourceRequirements,
};
pub use units::{ResourceUnitError, parse_cpu, parse_size_mb};
