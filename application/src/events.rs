//! System event fan-out.
//!
//! Every observable side effect of the core publishes one [`SystemEvent`] on
//! the [`EventBus`]. Subscribers (discovery indexes, the JSONL transcript,
//! the CLI) receive them through a `tokio::sync::broadcast` channel; the core
//! never depends on anyone listening.

use serde::Serialize;
use tokio::sync::broadcast;

use toolcell_domain::{
    ContainerWarning, ErrorCode, ErrorRecord, ExecutionId, ResourceAmounts, ToolDefinition,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SystemEvent {
    #[serde(rename = "tool:registered")]
    ToolRegistered { definition: Box<ToolDefinition> },

    #[serde(rename = "tool:unregistered")]
    ToolUnregistered { tool_id: String },

    #[serde(rename = "execution:completed")]
    ExecutionCompleted {
        tool_id: String,
        execution_id: ExecutionId,
        success: bool,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },

    #[serde(rename = "resourceAllocated")]
    ResourceAllocated {
        tool_id: String,
        execution_id: ExecutionId,
        resources: ResourceAmounts,
    },

    #[serde(rename = "resourceReleased")]
    ResourceReleased {
        tool_id: String,
        execution_id: ExecutionId,
        resources: ResourceAmounts,
    },

    #[serde(rename = "resourceLimitsUpdated")]
    ResourceLimitsUpdated { capacity: ResourceAmounts },

    #[serde(rename = "warning")]
    Warning(ContainerWarning),

    #[serde(rename = "error")]
    Error(ErrorRecord),
}

impl SystemEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            SystemEvent::ToolRegistered { .. } => "tool:registered",
            SystemEvent::ToolUnregistered { .. } => "tool:unregistered",
            SystemEvent::ExecutionCompleted { .. } => "execution:completed",
            SystemEvent::ResourceAllocated { .. } => "resourceAllocated",
            SystemEvent::ResourceReleased { .. } => "resourceReleased",
            SystemEvent::ResourceLimitsUpdated { .. } => "resourceLimitsUpdated",
            SystemEvent::Warning(_) => "warning",
            SystemEvent::Error(_) => "error",
        }
    }
}

/// Cloneable publish/subscribe handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SystemEvent::ToolUnregistered {
            tool_id: "calc".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool:unregistered");
        assert_eq!(value["tool_id"], "calc");
        assert_eq!(event.name(), "tool:unregistered");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(SystemEvent::ResourceLimitsUpdated {
            capacity: ResourceAmounts::default(),
        });

        let mut rx = bus.subscribe();
        bus.publish(SystemEvent::ToolUnregistered {
            tool_id: "x".to_string(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), "tool:unregistered");
    }
}
