use std::sync::Arc;

use async_trait::async_trait;

use super::{SharedState, StopFlag, Watcher};
use crate::detector;
use crate::history::History;
use crate::model::AnomalyType;

pub const TOPIC: &str = "anomaly.cpu";

/// Rules 1-2 (CPU spike) consume only the current snapshot and the
/// baseline, never `History`/`prior_top_pids` — so this watcher keeps an
/// empty, never-written `History` purely to satisfy `detect`'s signature,
/// rather than sharing one with the watcher that actually needs it.
pub struct CpuWatcher {
    shared: Arc<SharedState>,
    stop: StopFlag,
    empty_history: History,
}

impl CpuWatcher {
    pub fn new(shared: Arc<SharedState>) -> Self {
        CpuWatcher {
            shared,
            stop: StopFlag::new(),
            empty_history: History::new(),
        }
    }
}

#[async_trait]
impl Watcher for CpuWatcher {
    fn name(&self) -> &str {
        "cpu_watcher"
    }

    fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    async fn run(&self) {
        let interval = self.shared.config.cpu_watcher_interval;
        while !self.stop.is_stopped() {
            match self.shared.probe.sample().await {
                Ok(snapshot) => {
                    let baseline = self.shared.baseline.read().clone();
                    let events = detector::detect(
                        &self.shared.config,
                        baseline.as_ref(),
                        &self.empty_history,
                        &snapshot,
                        &[],
                    );
                    for event in events.into_iter().filter(|e| e.event_type == AnomalyType::CpuSpike) {
                        self.shared.bus.publish(TOPIC, event).await;
                    }
                }
                Err(e) => {
                    log::warn!("{} sample failed: {}", self.name(), e);
                    tokio::time::sleep(self.shared.config.watcher_backoff).await;
                    continue;
                }
            }
            tokio::time::sleep(interval).await;
        }
    }
}
