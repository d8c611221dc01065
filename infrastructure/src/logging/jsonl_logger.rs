//! JSONL transcript of system events.
//!
//! Each [`SystemEvent`] becomes one JSON line carrying its `type` tag plus a
//! `timestamp` (RFC 3339, milliseconds), appended through a buffered writer.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use toolcell_application::{EventLogger, SystemEvent};
use tracing::warn;

pub struct JsonlEventLogger {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlEventLogger {
    /// Open `path` for appending, creating parent directories as needed.
    ///
    /// Returns `None` (after a warning) when the file cannot be opened; the
    /// transcript is optional and never blocks startup.
    pub fn open(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!("Could not create event log directory {}: {}", parent.display(), e);
            return None;
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Could not open event log {}: {}", path.display(), e);
                return None;
            }
        };

        Some(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn record(event: &SystemEvent) -> Option<Value> {
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let mut value = serde_json::to_value(event).ok()?;
    if let Value::Object(map) = &mut value {
        map.entry("type").or_insert_with(|| Value::String(event.name().to_string()));
        // Warnings and error records carry their own time
        map.entry("timestamp").or_insert(Value::String(timestamp));
    }
    Some(value)
}

impl EventLogger for JsonlEventLogger {
    fn log(&self, event: &SystemEvent) {
        let Some(line) = record(event).and_then(|v| serde_json::to_string(&v).ok()) else {
            return;
        };

        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
            // Append-only; flush per line so a crash loses at most one event
            let _ = writer.flush();
        }
    }
}

impl Drop for JsonlEventLogger {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolcell_domain::{ExecutionId, ResourceAmounts};

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let logger = JsonlEventLogger::open(&path).unwrap();

        logger.log(&SystemEvent::ToolUnregistered {
            tool_id: "calc".to_string(),
        });
        logger.log(&SystemEvent::ResourceLimitsUpdated {
            capacity: ResourceAmounts::new(4.0, 2048.0, 0.0, 0.0),
        });
        drop(logger);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "tool:unregistered");
        assert_eq!(lines[0]["tool_id"], "calc");
        assert_eq!(lines[1]["type"], "resourceLimitsUpdated");
        assert_eq!(lines[1]["capacity"]["cpu"], 4.0);
        for line in &lines {
            assert!(line["timestamp"].as_str().unwrap().ends_with('Z'));
        }
    }

    #[test]
    fn test_appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/events.jsonl");

        for _ in 0..2 {
            let logger = JsonlEventLogger::open(&path).unwrap();
            logger.log(&SystemEvent::ExecutionCompleted {
                tool_id: "calc".to_string(),
                execution_id: ExecutionId::generate(),
                success: true,
                duration_ms: 12,
                error_code: None,
            });
        }

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["type"], "execution:completed");
        assert!(lines[1].get("error_code").is_none());
    }

    #[test]
    fn test_open_fails_on_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(JsonlEventLogger::open(dir.path()).is_none());
    }
}
