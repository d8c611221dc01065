//! Port for the structured event transcript.
//!
//! This is separate from `tracing`-based operation logs: tracing handles
//! human-readable diagnostics, while this port records every
//! [`SystemEvent`] in a machine-readable form (JSONL).

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::{EventBus, SystemEvent};

/// Port for recording system events.
///
/// `log` is synchronous and non-fallible; a logging failure must never
/// disturb the execution path.
pub trait EventLogger: Send + Sync {
    fn log(&self, event: &SystemEvent);
}

/// No-op implementation for tests and when the transcript is disabled.
pub struct NoEventLogger;

impl EventLogger for NoEventLogger {
    fn log(&self, _event: &SystemEvent) {}
}

/// Forward every event published on `bus` to `logger` until the bus closes.
pub fn spawn_event_logger<L>(bus: &EventBus, logger: L) -> JoinHandle<()>
where
    L: EventLogger + 'static,
{
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => logger.log(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
