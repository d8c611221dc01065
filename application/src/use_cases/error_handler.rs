//! Severity-tiered error ledger with a time-windowed circuit breaker.
//!
//! Every component reports failures here. Records are kept oldest-first in a
//! bounded deque; when the ledger is full the oldest record is dropped.
//! [`ErrorHandler::has_recent_critical_errors`] is the single predicate the
//! orchestrator consults before admitting new work.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use toolcell_domain::{ErrorFilter, ErrorRecord, ErrorReport, ErrorSeverity, ErrorStats};

use crate::config::ErrorLedgerConfig;
use crate::events::{EventBus, SystemEvent};

pub struct ErrorHandler {
    records: Mutex<VecDeque<ErrorRecord>>,
    capacity: usize,
    critical_ttl: chrono::Duration,
    events: EventBus,
}

impl ErrorHandler {
    pub fn new(config: &ErrorLedgerConfig, events: EventBus) -> Self {
        let critical_ttl =
            chrono::Duration::from_std(config.critical_ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        Self {
            records: Mutex::new(VecDeque::with_capacity(config.capacity.min(4096))),
            capacity: config.capacity.max(1),
            critical_ttl,
            events,
        }
    }

    /// Record an error timestamped now.
    pub fn handle_error(&self, report: ErrorReport) -> ErrorRecord {
        self.handle_error_at(report, Utc::now())
    }

    /// Record an error with an explicit timestamp.
    ///
    /// The record is logged, marked handled, appended (trimming the oldest
    /// entries past capacity), and then published on the event bus.
    pub fn handle_error_at(&self, report: ErrorReport, timestamp: DateTime<Utc>) -> ErrorRecord {
        let mut record = ErrorRecord::from_report(report, timestamp);
        log_record(&record);
        record.handled = true;

        {
            let mut records = self.lock();
            records.push_back(record.clone());
            while records.len() > self.capacity {
                records.pop_front();
            }
        }

        self.events.publish(SystemEvent::Error(record.clone()));
        record
    }

    /// True if a critical record is newer than `now - critical_ttl`.
    pub fn has_recent_critical_errors(&self) -> bool {
        self.has_recent_critical_errors_at(Utc::now())
    }

    pub fn has_recent_critical_errors_at(&self, now: DateTime<Utc>) -> bool {
        let cutoff = now - self.critical_ttl;
        self.lock().iter().rev().any(|r| r.is_critical_since(cutoff))
    }

    /// Matching records, newest first.
    pub fn get_errors(&self, filter: &ErrorFilter) -> Vec<ErrorRecord> {
        filter.apply(self.lock().iter())
    }

    pub fn get_error_stats(&self) -> ErrorStats {
        ErrorStats::compute(self.lock().iter(), Utc::now(), self.critical_ttl)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ErrorRecord>> {
        // A poisoned ledger is still a valid ledger.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn log_record(record: &ErrorRecord) {
    let tool_id = record.tool_id.as_deref().unwrap_or("-");
    let instance_id = record.instance_id.as_deref().unwrap_or("-");
    let code = record.code.as_str();
    match record.severity {
        ErrorSeverity::Low => info!(code, tool_id, instance_id, "{}", record.message),
        ErrorSeverity::Medium => warn!(code, tool_id, instance_id, "{}", record.message),
        ErrorSeverity::High => error!(code, tool_id, instance_id, "{}", record.message),
        ErrorSeverity::Critical => error!(code, tool_id, instance_id, critical = true, "{}", record.message),
    }
}
