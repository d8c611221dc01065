//! Host capacity accounting.
//!
//! [`ResourceManager`] is owned by the scheduler task and mutated only
//! through `&mut self`, so allocate and release are serialized without a
//! lock. Admission keeps `reservation_margin` of every pool free.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use toolcell_domain::{
    ExecutionId, ResourceAllocation, ResourceAmounts, ResourceError, ResourceKind, ResourcePools,
    ResourceRequirements,
};

use crate::config::ResourceConfig;
use crate::events::{EventBus, SystemEvent};

/// Total/used/available of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolUsage {
    pub total: f64,
    pub used: f64,
    pub available: f64,
}

/// Point-in-time view of every pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub cpu: PoolUsage,
    pub memory_mb: PoolUsage,
    pub storage_mb: PoolUsage,
    pub network_mbps: PoolUsage,
    pub reservation_margin: f64,
    pub active_allocations: usize,
}

impl ResourceUsage {
    pub fn get(&self, kind: ResourceKind) -> &PoolUsage {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory_mb,
            ResourceKind::Storage => &self.storage_mb,
            ResourceKind::Network => &self.network_mbps,
        }
    }
}

pub struct ResourceManager {
    pools: ResourcePools,
    reservation_margin: f64,
    allocations: HashMap<ExecutionId, ResourceAllocation>,
    events: EventBus,
}

impl ResourceManager {
    pub fn new(config: &ResourceConfig, events: EventBus) -> Self {
        Self {
            pools: ResourcePools::with_capacity(config.capacity),
            reservation_margin: config.reservation_margin.clamp(0.0, 0.99),
            allocations: HashMap::new(),
            events,
        }
    }

    /// Reserve resources for one execution.
    ///
    /// Fails without side effects when the request cannot be parsed or would
    /// push any pool past `total * (1 - margin)`.
    pub fn allocate_resources(
        &mut self,
        tool_id: &str,
        requirements: &ResourceRequirements,
        execution_id: ExecutionId,
    ) -> Result<ResourceAllocation, ResourceError> {
        if self.allocations.contains_key(&execution_id) {
            return Err(ResourceError::AlreadyAllocated(execution_id.to_string()));
        }
        let amounts = requirements.to_amounts()?;
        self.pools.check_admission(&amounts, self.reservation_margin)?;

        self.pools.reserve(&amounts);
        let allocation = ResourceAllocation::new(tool_id, execution_id.clone(), amounts);
        self.allocations.insert(execution_id.clone(), allocation.clone());

        debug!(
            tool_id,
            execution_id = %execution_id,
            cpu = amounts.cpu,
            memory_mb = amounts.memory_mb,
            "Resources allocated"
        );
        self.events.publish(SystemEvent::ResourceAllocated {
            tool_id: tool_id.to_string(),
            execution_id,
            resources: amounts,
        });
        Ok(allocation)
    }

    /// Release an execution's reservation.
    ///
    /// Unknown or already-released IDs are a no-op and return `None`.
    pub fn release_resources(&mut self, execution_id: &ExecutionId) -> Option<ResourceAllocation> {
        let allocation = self.allocations.remove(execution_id)?;
        self.pools.release(&allocation.resources);

        debug!(tool_id = %allocation.tool_id, execution_id = %execution_id, "Resources released");
        self.events.publish(SystemEvent::ResourceReleased {
            tool_id: allocation.tool_id.clone(),
            execution_id: execution_id.clone(),
            resources: allocation.resources,
        });
        Some(allocation)
    }

    /// Change total capacity. Existing allocations are kept even if they
    /// now exceed the new admission ceiling; new requests wait until usage
    /// drops back.
    pub fn update_system_resources(&mut self, capacity: ResourceAmounts) {
        self.pools.set_capacity(capacity);
        info!(
            cpu = capacity.cpu,
            memory_mb = capacity.memory_mb,
            storage_mb = capacity.storage_mb,
            network_mbps = capacity.network_mbps,
            "System resource limits updated"
        );
        self.events.publish(SystemEvent::ResourceLimitsUpdated { capacity });
    }

    /// Record the sandbox instance serving an allocation.
    pub fn attach_instance(&mut self, execution_id: &ExecutionId, instance_id: impl Into<String>) -> bool {
        match self.allocations.get_mut(execution_id) {
            Some(allocation) => {
                allocation.instance_id = Some(instance_id.into());
                true
            }
            None => false,
        }
    }

    pub fn allocation(&self, execution_id: &ExecutionId) -> Option<&ResourceAllocation> {
        self.allocations.get(execution_id)
    }

    /// Active allocations, oldest first.
    pub fn allocations(&self) -> Vec<ResourceAllocation> {
        let mut list: Vec<_> = self.allocations.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    pub fn usage(&self) -> ResourceUsage {
        let pool = |kind: ResourceKind| {
            let p = self.pools.get(kind);
            PoolUsage {
                total: p.total,
                used: p.used,
                available: p.available(),
            }
        };
        ResourceUsage {
            cpu: pool(ResourceKind::Cpu),
            memory_mb: pool(ResourceKind::Memory),
            storage_mb: pool(ResourceKind::Storage),
            network_mbps: pool(ResourceKind::Network),
            reservation_margin: self.reservation_margin,
            active_allocations: self.allocations.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(cpu: f64, memory_mb: f64) -> ResourceManager {
        ResourceManager::new(
            &ResourceConfig {
                capacity: ResourceAmounts::new(cpu, memory_mb, 10240.0, 100.0),
                reservation_margin: 0.2,
            },
            EventBus::new(),
        )
    }

    fn req(cpu: &str, memory: &str) -> ResourceRequirements {
        ResourceRequirements::new(cpu, memory)
    }

    #[test]
    fn test_allocate_and_release() {
        let mut rm = manager(4.0, 1024.0);
        let id = ExecutionId::new("e1");
        let alloc = rm.allocate_resources("calc", &req("0.5", "128M"), id.clone()).unwrap();
        assert_eq!(alloc.resources.cpu, 0.5);
        assert_eq!(rm.usage().cpu.used, 0.5);
        assert_eq!(rm.usage().memory_mb.used, 128.0);
        assert_eq!(rm.usage().active_allocations, 1);

        assert!(rm.release_resources(&id).is_some());
        assert_eq!(rm.usage().cpu.used, 0.0);
        assert_eq!(rm.usage().memory_mb.used, 0.0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut rm = manager(4.0, 1024.0);
        let a = ExecutionId::new("a");
        let b = ExecutionId::new("b");
        rm.allocate_resources("t", &req("1", "100M"), a.clone()).unwrap();
        rm.allocate_resources("t", &req("1", "100M"), b.clone()).unwrap();

        assert!(rm.release_resources(&a).is_some());
        assert!(rm.release_resources(&a).is_none());
        assert_eq!(rm.usage().cpu.used, 1.0);
        assert_eq!(rm.usage().memory_mb.used, 100.0);

        assert!(rm.release_resources(&ExecutionId::new("unknown")).is_none());
    }

    #[test]
    fn test_never_overcommits() {
        let mut rm = manager(4.0, 1024.0);
        let ceiling_cpu = 4.0 * 0.8;
        let ceiling_mem = 1024.0 * 0.8;
        let mut granted = Vec::new();

        // Interleave allocations and releases; invariant must hold throughout.
        for i in 0..40 {
            let id = ExecutionId::new(format!("e{}", i));
            if rm.allocate_resources("t", &req("0.7", "150M"), id.clone()).is_ok() {
                granted.push(id);
            }
            if i % 3 == 0
                && let Some(id) = granted.first().cloned()
            {
                rm.release_resources(&id);
                granted.remove(0);
            }
            let usage = rm.usage();
            assert!(usage.cpu.used <= ceiling_cpu + 1e-9, "cpu {} > {}", usage.cpu.used, ceiling_cpu);
            assert!(usage.memory_mb.used <= ceiling_mem + 1e-9);
        }
    }

    #[test]
    fn test_rejects_over_allocation_without_recording() {
        let mut rm = manager(4.0, 1024.0);
        let err = rm
            .allocate_resources("big", &req("1000", "128M"), ExecutionId::new("x"))
            .unwrap_err();
        assert!(matches!(err, ResourceError::Insufficient { kind: ResourceKind::Cpu, .. }));
        assert!(rm.allocations().is_empty());
        assert_eq!(rm.usage().cpu.used, 0.0);
    }

    #[test]
    fn test_rejects_unparseable_requirements() {
        let mut rm = manager(4.0, 1024.0);
        let err = rm
            .allocate_resources("t", &req("lots", "128M"), ExecutionId::new("x"))
            .unwrap_err();
        assert!(matches!(err, ResourceError::InvalidRequirements(_)));
    }

    #[test]
    fn test_duplicate_execution_id_rejected() {
        let mut rm = manager(4.0, 1024.0);
        let id = ExecutionId::new("dup");
        rm.allocate_resources("t", &req("0.1", "1M"), id.clone()).unwrap();
        assert!(matches!(
            rm.allocate_resources("t", &req("0.1", "1M"), id),
            Err(ResourceError::AlreadyAllocated(_))
        ));
        assert_eq!(rm.usage().cpu.used, 0.1);
    }

    #[test]
    fn test_update_capacity_keeps_allocations() {
        let mut rm = manager(4.0, 1024.0);
        let id = ExecutionId::new("e");
        rm.allocate_resources("t", &req("3", "100M"), id.clone()).unwrap();

        rm.update_system_resources(ResourceAmounts::new(2.0, 1024.0, 10240.0, 100.0));
        assert!(rm.allocation(&id).is_some());
        assert_eq!(rm.usage().cpu.total, 2.0);
        assert_eq!(rm.usage().cpu.available, 0.0);
        assert!(rm.allocate_resources("t", &req("0.1", "1M"), ExecutionId::new("f")).is_err());

        rm.release_resources(&id);
        assert!(rm.allocate_resources("t", &req("0.1", "1M"), ExecutionId::new("f")).is_ok());
    }

    #[test]
    fn test_attach_instance() {
        let mut rm = manager(4.0, 1024.0);
        let id = ExecutionId::new("e");
        rm.allocate_resources("t", &req("0.1", "1M"), id.clone()).unwrap();
        assert!(rm.attach_instance(&id, "c-123"));
        assert_eq!(rm.allocation(&id).unwrap().instance_id.as_deref(), Some("c-123"));
        assert!(!rm.attach_instance(&ExecutionId::new("nope"), "c"));
    }

    #[tokio::test]
    async fn test_publishes_allocation_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let mut rm = ResourceManager::new(&ResourceConfig::default(), bus);
        let id = ExecutionId::new("e");
        rm.allocate_resources("t", &req("0.1", "1M"), id.clone()).unwrap();
        rm.release_resources(&id);
        assert_eq!(rx.recv().await.unwrap().name(), "resourceAllocated");
        assert_eq!(rx.recv().await.unwrap().name(), "resourceReleased");
    }
}
