//! Resource accounting entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::units::{ResourceUnitError, parse_cpu, parse_size_mb};

/// Unique identifier of one dispatch of a tool.
///
/// A fresh ID is generated for every `execute_tool` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random execution ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used in container names and log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T: Into<String>> From<T> for ExecutionId {
    fn from(s: T) -> Self {
        Self::new(s)
    }
}

/// Resource dimensions tracked by the resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Storage,
    Network,
}

impl ResourceKind {
    pub fn all() -> [ResourceKind; 4] {
        [
            ResourceKind::Cpu,
            ResourceKind::Memory,
            ResourceKind::Storage,
            ResourceKind::Network,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Storage => "storage",
            ResourceKind::Network => "network",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cores",
            ResourceKind::Memory | ResourceKind::Storage => "MB",
            ResourceKind::Network => "MB/s",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources a tool declares, as human-readable strings.
///
/// ```toml
/// cpu = "0.5"
/// memory = "512M"
/// storage = "1G"     # optional
/// network = "10M"    # optional, MB/s
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu: String,
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl ResourceRequirements {
    pub fn new(cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        Self {
            cpu: cpu.into(),
            memory: memory.into(),
            storage: None,
            network: None,
        }
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = Some(storage.into());
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Convert to base units. Missing storage/network reserve nothing.
    pub fn to_amounts(&self) -> Result<ResourceAmounts, ResourceUnitError> {
        Ok(ResourceAmounts {
            cpu: parse_cpu(&self.cpu)?,
            memory_mb: parse_size_mb(&self.memory)?,
            storage_mb: self.storage.as_deref().map(parse_size_mb).transpose()?.unwrap_or(0.0),
            network_mbps: self.network.as_deref().map(parse_size_mb).transpose()?.unwrap_or(0.0),
        })
    }
}

/// Numeric resource quantities in base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceAmounts {
    /// CPU cores
    pub cpu: f64,
    /// Memory in MB
    pub memory_mb: f64,
    /// Storage in MB
    pub storage_mb: f64,
    /// Network rate in MB/s
    pub network_mbps: f64,
}

impl ResourceAmounts {
    pub fn new(cpu: f64, memory_mb: f64, storage_mb: f64, network_mbps: f64) -> Self {
        Self {
            cpu,
            memory_mb,
            storage_mb,
            network_mbps,
        }
    }

    pub fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory_mb,
            ResourceKind::Storage => self.storage_mb,
            ResourceKind::Network => self.network_mbps,
        }
    }
}

/// One resource dimension: total capacity and the amount currently reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub total: f64,
    pub used: f64,
}

impl ResourcePool {
    pub fn new(total: f64) -> Self {
        Self { total, used: 0.0 }
    }

    pub fn available(&self) -> f64 {
        (self.total - self.used).max(0.0)
    }

    /// Upper bound on `used` once the reservation margin is kept free.
    pub fn allocatable_limit(&self, margin: f64) -> f64 {
        self.total * (1.0 - margin)
    }

    pub fn reserve(&mut self, amount: f64) {
        self.used += amount;
    }

    /// Return `amount` to the pool, floored at zero.
    pub fn release(&mut self, amount: f64) {
        self.used = (self.used - amount).max(0.0);
    }
}

/// An allocation request cannot be granted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error(
        "insufficient {kind}: requested {requested:.2} {unit}, {available:.2} {unit} allocatable \
         (reservation margin {margin_percent:.0}%)",
        unit = kind.unit()
    )]
    Insufficient {
        kind: ResourceKind,
        requested: f64,
        available: f64,
        margin_percent: f64,
    },

    #[error("invalid resource requirements: {0}")]
    InvalidRequirements(#[from] ResourceUnitError),

    #[error("execution {0} already holds an allocation")]
    AlreadyAllocated(String),
}

/// The four resource pools of the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePools {
    pub cpu: ResourcePool,
    pub memory: ResourcePool,
    pub storage: ResourcePool,
    pub network: ResourcePool,
}

impl ResourcePools {
    pub fn with_capacity(capacity: ResourceAmounts) -> Self {
        Self {
            cpu: ResourcePool::new(capacity.cpu),
            memory: ResourcePool::new(capacity.memory_mb),
            storage: ResourcePool::new(capacity.storage_mb),
            network: ResourcePool::new(capacity.network_mbps),
        }
    }

    pub fn get(&self, kind: ResourceKind) -> &ResourcePool {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
            ResourceKind::Storage => &self.storage,
            ResourceKind::Network => &self.network,
        }
    }

    pub fn get_mut(&mut self, kind: ResourceKind) -> &mut ResourcePool {
        match kind {
            ResourceKind::Cpu => &mut self.cpu,
            ResourceKind::Memory => &mut self.memory,
            ResourceKind::Storage => &mut self.storage,
            ResourceKind::Network => &mut self.network,
        }
    }

    /// Check that granting `request` keeps `used <= total * (1 - margin)` in
    /// every dimension. Dimensions with a zero request always pass.
    pub fn check_admission(&self, request: &ResourceAmounts, margin: f64) -> Result<(), ResourceError> {
        for kind in ResourceKind::all() {
            let requested = request.get(kind);
            if requested <= 0.0 {
                continue;
            }
            let pool = self.get(kind);
            let limit = pool.allocatable_limit(margin);
            if pool.used + requested > limit + f64::EPSILON {
                return Err(ResourceError::Insufficient {
                    kind,
                    requested,
                    available: (limit - pool.used).max(0.0),
                    margin_percent: margin * 100.0,
                });
            }
        }
        Ok(())
    }

    pub fn reserve(&mut self, amounts: &ResourceAmounts) {
        for kind in ResourceKind::all() {
            self.get_mut(kind).reserve(amounts.get(kind));
        }
    }

    pub fn release(&mut self, amounts: &ResourceAmounts) {
        for kind in ResourceKind::all() {
            self.get_mut(kind).release(amounts.get(kind));
        }
    }

    /// Replace totals, keeping current usage intact.
    pub fn set_capacity(&mut self, capacity: ResourceAmounts) {
        for kind in ResourceKind::all() {
            self.get_mut(kind).total = capacity.get(kind);
        }
    }

    pub fn used(&self) -> ResourceAmounts {
        ResourceAmounts::new(
            self.cpu.used,
            self.memory.used,
            self.storage.used,
            self.network.used,
        )
    }
}

/// Per-execution reservation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub tool_id: String,
    pub execution_id: ExecutionId,
    pub resources: ResourceAmounts,
    pub created_at: DateTime<Utc>,
    /// Set once the sandbox instance has started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl ResourceAllocation {
    pub fn new(tool_id: impl Into<String>, execution_id: ExecutionId, resources: ResourceAmounts) -> Self {
        Self {
            tool_id: tool_id.into(),
            execution_id,
            resources,
            created_at: Utc::now(),
            instance_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_id_short_respects_char_boundaries() {
        assert_eq!(ExecutionId::new("0123456789abcdef").short(), "01234567");
        assert_eq!(ExecutionId::new("abc").short(), "abc");
        assert_eq!(ExecutionId::new("ééééééééé").short(), "éééééééé");
        assert_eq!(ExecutionId::new("abcdefgé-tail").short(), "abcdefgé");
    }

    fn pools(cpu: f64, memory_mb: f64) -> ResourcePools {
        ResourcePools::with_capacity(ResourceAmounts::new(cpu, memory_mb, 1024.0, 100.0))
    }

    #[test]
    fn test_requirements_to_amounts() {
        let req = ResourceRequirements::new("0.1", "128M").with_storage("1G");
        let amounts = req.to_amounts().unwrap();
        assert_eq!(amounts.cpu, 0.1);
        assert_eq!(amounts.memory_mb, 128.0);
        assert_eq!(amounts.storage_mb, 1024.0);
        assert_eq!(amounts.network_mbps, 0.0);
    }

    #[test]
    fn test_admission_respects_margin() {
        let p = pools(4.0, 1000.0);
        // 80% of 4 cores = 3.2
        assert!(p.check_admission(&ResourceAmounts::new(3.2, 0.0, 0.0, 0.0), 0.2).is_ok());
        let err = p
            .check_admission(&ResourceAmounts::new(3.3, 0.0, 0.0, 0.0), 0.2)
            .unwrap_err();
        match err {
            ResourceError::Insufficient { kind, .. } => assert_eq!(kind, ResourceKind::Cpu),
            other => panic!("expected Insufficient, got {:?}", other),
        }
    }

    #[test]
    fn test_admission_reports_first_failing_dimension() {
        let p = pools(4.0, 1000.0);
        let err = p
            .check_admission(&ResourceAmounts::new(0.5, 900.0, 0.0, 0.0), 0.2)
            .unwrap_err();
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn test_release_floors_at_zero() {
        let mut pool = ResourcePool::new(4.0);
        pool.reserve(1.0);
        pool.release(3.0);
        assert_eq!(pool.used, 0.0);
        assert_eq!(pool.available(), 4.0);
    }

    #[test]
    fn test_set_capacity_keeps_usage() {
        let mut p = pools(4.0, 1000.0);
        p.reserve(&ResourceAmounts::new(1.0, 100.0, 0.0, 0.0));
        p.set_capacity(ResourceAmounts::new(8.0, 2000.0, 1024.0, 100.0));
        assert_eq!(p.cpu.total, 8.0);
        assert_eq!(p.cpu.used, 1.0);
        assert_eq!(p.memory.used, 100.0);
    }

    #[test]
    fn test_execution_id_short() {
        let id = ExecutionId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_ne!(ExecutionId::generate(), ExecutionId::generate());
    }
}
