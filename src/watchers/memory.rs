use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{SharedState, StopFlag, Watcher};
use crate::detector;
use crate::history::History;
use crate::model::AnomalyType;

pub const TOPIC: &str = "anomaly.memory";
pub const NEW_PROCESS_TOPIC: &str = "anomaly.new_process";
pub const ZOMBIE_TOPIC: &str = "anomaly.zombie";

/// Owns the only `History` and "prior top pids" set the Detector consumes.
/// Rule 5 (memory leak) needs a uniform-cadence, single-producer sample
/// series, and rule 6 (new process) needs yesterday's top-list pids to
/// diff against today's — both live here, privately, rather than behind a
/// lock shared with the other watchers.
pub struct MemoryWatcher {
    shared: Arc<SharedState>,
    stop: StopFlag,
    history: RwLock<History>,
    prior_top_pids: RwLock<Vec<i32>>,
}

impl MemoryWatcher {
    pub fn new(shared: Arc<SharedState>) -> Self {
        MemoryWatcher {
            shared,
            stop: StopFlag::new(),
            history: RwLock::new(History::new()),
            prior_top_pids: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Watcher for MemoryWatcher {
    fn name(&self) -> &str {
        "memory_watcher"
    }

    fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    async fn run(&self) {
        let interval = self.shared.config.memory_watcher_interval;
        while !self.stop.is_stopped() {
            match self.shared.probe.sample().await {
                Ok(snapshot) => {
                    let baseline = self.shared.baseline.read().clone();
                    let prior_pids = self.prior_top_pids.read().clone();
                    let events = {
                        let history = self.history.read();
                        detector::detect(&self.shared.config, baseline.as_ref(), &history, &snapshot, &prior_pids)
                    };

                    let mut next_pids: Vec<i32> = snapshot
                        .top_cpu_processes
                        .iter()
                        .chain(snapshot.top_memory_processes.iter())
                        .map(|p| p.pid)
                        .collect();
                    next_pids.sort_unstable();
                    next_pids.dedup();
                    *self.prior_top_pids.write() = next_pids;

                    self.history.write().push(snapshot);

                    for event in events {
                        let topic = match event.event_type {
                            AnomalyType::MemorySpike | AnomalyType::MemoryLeak => TOPIC,
                            AnomalyType::NewProcess => NEW_PROCESS_TOPIC,
                            AnomalyType::ZombieProcess => ZOMBIE_TOPIC,
                            _ => continue,
                        };
                        self.shared.bus.publish(topic, event).await;
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
