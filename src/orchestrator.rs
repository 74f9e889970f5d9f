//! Investigation Orchestrator (§4.9): severity filter -> queue -> bounded
//! concurrency -> provider call -> JSONL audit. Grounded on
//! `logic/action_guard.rs`'s pending-action bookkeeping and bounded
//! execution, and `logic/telemetry/recorder.rs`'s audit append.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};

use crate::bus::Handler;
use crate::cache::InvestigationCache;
use crate::model::{AnomalyEvent, Severity};
use crate::probe::SystemProbe;
use crate::provider::InvestigationProvider;

#[derive(Debug)]
pub struct OrchestratorError(pub String);

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "orchestrator error: {}", self.0)
    }
}
impl std::error::Error for OrchestratorError {}

struct AuditWriter {
    path: PathBuf,
}

impl AuditWriter {
    fn new(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::error!("failed to create investigation log directory {:?}: {}", parent, e);
            }
        }
        AuditWriter { path }
    }

    fn append(&self, record: &serde_json::Value) {
        match serde_json::to_string(record) {
            Ok(line) => {
                let result = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .and_then(|mut f| writeln!(f, "{}", line).and_then(|_| f.flush()));
                if let Err(e) = result {
                    log::error!("failed to append investigation audit record: {}", e);
                }
            }
            Err(e) => log::error!("failed to serialize audit record: {}", e),
        }
    }
}

#[derive(Serialize)]
struct SystemSummary {
    cpu_percent: f64,
    memory_percent: f64,
    memory_used_mb: f64,
    load_1min: f64,
    process_count: usize,
}

/// Consumes AnomalyEvents published on anomaly topics (subscribed as a
/// `Handler`), filters by `min_severity`, and runs bounded-concurrency
/// investigations: a fresh system sample, a cache lookup, an optional
/// provider call, and an audit record.
pub struct Orchestrator<P: InvestigationProvider> {
    min_severity: Severity,
    probe: Arc<dyn SystemProbe>,
    cache: Arc<InvestigationCache>,
    provider: Arc<P>,
    semaphore: Arc<Semaphore>,
    sender: mpsc::UnboundedSender<AnomalyEvent>,
    audit: Arc<AuditWriter>,
}

impl<P: InvestigationProvider + 'static> Orchestrator<P> {
    pub fn new(
        min_severity: Severity,
        probe: Arc<dyn SystemProbe>,
        cache: Arc<InvestigationCache>,
        provider: Arc<P>,
        max_concurrent: usize,
        investigations_log_path: PathBuf,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let audit = Arc::new(AuditWriter::new(investigations_log_path));
        let orchestrator = Arc::new(Orchestrator {
            min_severity,
            probe,
            cache,
            provider,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            sender,
            audit,
        });
        orchestrator.clone().spawn_worker(receiver);
        orchestrator
    }

    fn spawn_worker(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<AnomalyEvent>) {
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let this = self.clone();
                let permit = this.semaphore.clone().acquire_owned().await;
                tokio::spawn(async move {
                    let _permit = permit;
                    this.investigate(event).await;
                });
            }
        });
    }

    async fn investigate(&self, event: AnomalyEvent) {
        let snapshot = match self.probe.sample().await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("investigation sample failed: {}", e);
                return;
            }
        };

        let (analysis, cached, cache_count) = if let Some(entry) = self.cache.get(&event) {
            (entry.analysis, true, entry.count)
        } else {
            let prompt = format!(
                "Anomaly detected: type={} severity={} message=\"{}\"\nSystem snapshot: cpu={:.1}% mem={:.1}% load1={:.2} processes={}",
                event.event_type, event.severity, event.message,
                snapshot.cpu_percent, snapshot.memory_percent, snapshot.load_1min, snapshot.process_count
            );
            match self.provider.investigate(&prompt).await {
                Ok(analysis) => {
                    self.cache.set(&event, analysis.clone());
                    (analysis, false, 1)
                }
                Err(e) => {
                    log::warn!("investigation provider failed for event '{}': {}", event.message, e);
                    return;
                }
            }
        };

        let record = json!({
            "timestamp": Utc::now(),
            "event": {
                "type": event.event_type.as_str(),
                "severity": event.severity.as_str(),
                "message": event.message,
                "event_timestamp": event.timestamp,
                "details": event.details,
            },
            "system": SystemSummary {
                cpu_percent: snapshot.cpu_percent,
                memory_percent: snapshot.memory_percent,
                memory_used_mb: snapshot.memory_used_mb,
                load_1min: snapshot.load_1min,
                process_count: snapshot.process_count,
            },
            "investigation": {
                "analysis": analysis,
                "cached": cached,
                "cache_count": cache_count,
            },
        });
        self.audit.append(&record);
        println!("[investigation] {} -> {}", event.message, if cached { "cached" } else { "fresh" });
    }
}

#[async_trait]
impl<P: InvestigationProvider + 'static> Handler for Orchestrator<P> {
    fn name(&self) -> &str {
        "investigation_orchestrator"
    }

    async fn on_event(&self, _topic: &str, event: &AnomalyEvent) {
        if event.severity < self.min_severity {
            return;
        }
        if self.sender.send(event.clone()).is_err() {
            log::error!("investigation queue closed; dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FakeProbe;
    use crate::provider::NoopProvider;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn snapshot() -> crate::model::Snapshot {
        crate::model::Snapshot::empty(Utc::now())
    }

    fn make_orchestrator(dir: &TempDir) -> (Arc<Orchestrator<NoopProvider>>, Arc<InvestigationCache>) {
        let probe: Arc<dyn SystemProbe> = Arc::new(FakeProbe::new(vec![snapshot(); 10]));
        let cache = Arc::new(InvestigationCache::load(
            dir.path().join("cache.json"),
            std::time::Duration::from_secs(3600),
        ));
        let provider = Arc::new(NoopProvider::new("all clear"));
        let orchestrator = Orchestrator::new(
            Severity::Warning,
            probe,
            cache.clone(),
            provider,
            3,
            dir.path().join("investigations.jsonl"),
        );
        (orchestrator, cache)
    }

    #[tokio::test]
    async fn below_threshold_events_never_reach_the_provider() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, cache) = make_orchestrator(&dir);
        let event = AnomalyEvent::new(
            crate::model::AnomalyType::NewProcess,
            Severity::Info,
            "fyi",
            HashMap::new(),
        );
        orchestrator.on_event("t", &event).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(cache.get(&event).is_none());
    }

    #[tokio::test]
    async fn a_qualifying_event_is_investigated_and_audited() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, cache) = make_orchestrator(&dir);
        let event = AnomalyEvent::new(
            crate::model::AnomalyType::CpuSpike,
            Severity::Warning,
            "hot",
            HashMap::new(),
        );
        orchestrator.on_event("t", &event).await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(cache.get(&event).is_some());
        let log = fs::read_to_string(dir.path().join("investigations.jsonl")).unwrap();
        assert!(log.contains("\"analysis\":\"all clear\""));
    }
}
