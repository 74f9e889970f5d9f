use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::bus::Handler;
use crate::model::AnomalyEvent;

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "type")]
    event_type: &'a str,
    severity: &'a str,
    message: &'a str,
    details: &'a std::collections::HashMap<String, serde_json::Value>,
}

/// Appends one JSON object per event to `path` (default `~/.uatu/events.jsonl`),
/// creating parent directories as needed. Writes are line-atomic: each record
/// is serialized, written with a trailing newline, and flushed before the
/// lock is released, so concurrent publishers never interleave partial lines.
pub struct EventLogger {
    writer: Mutex<Option<BufWriter<File>>>,
    path: PathBuf,
}

impl EventLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::error!("failed to create event log directory {:?}: {}", parent, e);
            }
        }
        EventLogger {
            writer: Mutex::new(None),
            path,
        }
    }

    fn open(&self) -> std::io::Result<()> {
        let mut guard = self.writer.lock();
        if guard.is_none() {
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            *guard = Some(BufWriter::new(file));
        }
        Ok(())
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        self.open()?;
        let mut guard = self.writer.lock();
        if let Some(writer) = guard.as_mut() {
            writeln!(writer, "{}", line)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Handler for EventLogger {
    fn name(&self) -> &str {
        "event_logger"
    }

    async fn on_event(&self, _topic: &str, event: &AnomalyEvent) {
        let line = LogLine {
            timestamp: event.timestamp,
            event_type: event.event_type.as_str(),
            severity: event.severity.as_str(),
            message: &event.message,
            details: &event.details,
        };
        match serde_json::to_string(&line) {
            Ok(json) => {
                if let Err(e) = self.append_line(&json) {
                    log::error!("failed to write event log line: {}", e);
                }
            }
            Err(e) => log::error!("failed to serialize event: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnomalyType, Severity};
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn appends_one_json_line_per_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let logger = EventLogger::new(&path);
        let event = AnomalyEvent::new(AnomalyType::CpuSpike, Severity::Warning, "hot", HashMap::new());
        logger.on_event("t", &event).await;
        logger.on_event("t", &event).await;

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["type"], "cpu_spike");
        assert_eq!(parsed["severity"], "warning");
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("events.jsonl");
        let logger = EventLogger::new(&path);
        let event = AnomalyEvent::new(AnomalyType::MemorySpike, Severity::Critical, "oom", HashMap::new());
        logger.on_event("t", &event).await;
        assert!(path.exists());
    }
}
