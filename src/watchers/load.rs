use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{SharedState, StopFlag, Watcher};
use crate::model::{AnomalyEvent, AnomalyType, Severity};

pub const TOPIC: &str = "anomaly.load";

pub struct LoadWatcher {
    shared: Arc<SharedState>,
    stop: StopFlag,
}

impl LoadWatcher {
    pub fn new(shared: Arc<SharedState>) -> Self {
        LoadWatcher {
            shared,
            stop: StopFlag::new(),
        }
    }
}

#[async_trait]
impl Watcher for LoadWatcher {
    fn name(&self) -> &str {
        "load_watcher"
    }

    fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    // The Detector's seven numbered rules (§4.4) don't cover load average;
    // §4.6's watcher table asks for an analogous ratio check against the
    // 1-minute load average, so it lives here rather than in detector.rs.
    async fn run(&self) {
        let interval = self.shared.config.load_watcher_interval;
        while !self.stop.is_stopped() {
            match self.shared.probe.sample().await {
                Ok(snapshot) => {
                    let baseline = self.shared.baseline.read().clone();
                    if let Some(baseline) = baseline {
                        if baseline.load_1min > 0.0
                            && snapshot.load_1min > baseline.load_1min * self.shared.config.cpu_spike_ratio
                        {
                            let mut details = HashMap::new();
                            details.insert("baseline_load_1min".to_string(), baseline.load_1min.into());
                            details.insert("current_load_1min".to_string(), snapshot.load_1min.into());
                            let event = AnomalyEvent::new(
                                AnomalyType::HighLoad,
                                Severity::Warning,
                                format!(
                                    "High load average: {:.2} (baseline {:.2})",
                                    snapshot.load_1min, baseline.load_1min
                                ),
                                details,
                            );
                            self.shared.bus.publish(TOPIC, event).await;
                        }
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
