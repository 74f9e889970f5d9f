use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::json;

use async_trait::async_trait;

use super::{SharedState, StopFlag, Watcher};
use crate::model::{AnomalyEvent, AnomalyType, ProcessInfo, Severity};

pub const CRASH_TOPIC: &str = "anomaly.process_crash";
pub const RESTART_TOPIC: &str = "anomaly.process_restart";

const RESTART_MATCH_WINDOW_SECS: i64 = 10;

struct PendingDeath {
    process: ProcessInfo,
    died_at: DateTime<Utc>,
}

#[derive(Default)]
struct ProcessDiffState {
    last_seen: HashMap<i32, ProcessInfo>,
    pending_deaths: Vec<PendingDeath>,
    restart_counts: HashMap<String, Vec<DateTime<Utc>>>,
}

/// Diffs the current snapshot's tracked processes (the union of its top-cpu
/// and top-memory lists, since that's the only process-level data a
/// Snapshot carries) against the prior sample. Births within 10s of a death
/// of the same name are reclassified as restarts; everything else that dies
/// and stays dead becomes a crash. Three restarts of the same name inside
/// the configured restart window escalate to a crash loop.
pub struct ProcessWatcher {
    shared: Arc<SharedState>,
    stop: StopFlag,
    state: Mutex<ProcessDiffState>,
}

impl ProcessWatcher {
    pub fn new(shared: Arc<SharedState>) -> Self {
        ProcessWatcher {
            shared,
            stop: StopFlag::new(),
            state: Mutex::new(ProcessDiffState::default()),
        }
    }
}

fn tracked_processes(snapshot: &crate::model::Snapshot) -> HashMap<i32, ProcessInfo> {
    let mut map = HashMap::new();
    for p in snapshot
        .top_cpu_processes
        .iter()
        .chain(snapshot.top_memory_processes.iter())
    {
        map.entry(p.pid).or_insert_with(|| p.clone());
    }
    map
}

fn process_detail(p: &ProcessInfo) -> serde_json::Value {
    json!({"pid": p.pid, "name": p.name, "cpu_percent": p.cpu_percent, "memory_mb": p.memory_mb})
}

#[async_trait]
impl Watcher for ProcessWatcher {
    fn name(&self) -> &str {
        "process_watcher"
    }

    fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    async fn run(&self) {
        let interval = self.shared.config.process_watcher_interval;
        let restart_window = ChronoDuration::from_std(self.shared.config.restart_window)
            .unwrap_or_else(|_| ChronoDuration::minutes(5));
        let crash_loop_count = self.shared.config.crash_loop_count as usize;

        while !self.stop.is_stopped() {
            match self.shared.probe.sample().await {
                Ok(snapshot) => {
                    let current = tracked_processes(&snapshot);
                    let now = Utc::now();
                    let mut restarts = Vec::new();
                    let mut crash_loops = Vec::new();

                    {
                        let mut state = self.state.lock();
                        let current_pids: HashSet<i32> = current.keys().copied().collect();
                        let prior_pids: HashSet<i32> = state.last_seen.keys().copied().collect();

                        for died_pid in prior_pids.difference(&current_pids) {
                            if let Some(proc) = state.last_seen.get(died_pid) {
                                state.pending_deaths.push(PendingDeath {
                                    process: proc.clone(),
                                    died_at: now,
                                });
                            }
                        }

                        for born_pid in current_pids.difference(&prior_pids) {
                            let proc = &current[born_pid];
                            if let Some(idx) = state.pending_deaths.iter().position(|d| {
                                d.process.name == proc.name
                                    && (now - d.died_at).num_seconds() <= RESTART_MATCH_WINDOW_SECS
                            }) {
                                state.pending_deaths.remove(idx);
                                restarts.push(proc.clone());
                                let history = state.restart_counts.entry(proc.name.clone()).or_default();
                                history.push(now);
                                history.retain(|t| now - *t <= restart_window);
                                if history.len() >= crash_loop_count {
                                    crash_loops.push(proc.clone());
                                    history.clear();
                                }
                            }
                        }

                        let expired: Vec<ProcessInfo> = {
                            let (expired, remaining): (Vec<_>, Vec<_>) =
                                state.pending_deaths.drain(..).partition(|d| {
                                    (now - d.died_at).num_seconds() > RESTART_MATCH_WINDOW_SECS
                                });
                            state.pending_deaths = remaining;
                            expired.into_iter().map(|d| d.process).collect()
                        };

                        for dead in &expired {
                            let mut details = HashMap::new();
                            details.insert("process".to_string(), process_detail(dead));
                            self.shared.bus
                                .publish(
                                    CRASH_TOPIC,
                                    AnomalyEvent::new(
                                        AnomalyType::ProcessCrash,
                                        Severity::Error,
                                        format!("Process crashed: {} (pid {})", dead.name, dead.pid),
                                        details,
                                    ),
                                )
                                .await;
                        }

                        state.last_seen = current;
                    }

                    for proc in &restarts {
                        let mut details = HashMap::new();
                        details.insert("process".to_string(), process_detail(proc));
                        self.shared.bus
                            .publish(
                                RESTART_TOPIC,
                                AnomalyEvent::new(
                                    AnomalyType::ProcessRestart,
                                    Severity::Warning,
                                    format!("Process restarted: {} (pid {})", proc.name, proc.pid),
                                    details,
                                ),
                            )
                            .await;
                    }

                    for proc in &crash_loops {
                        let mut details = HashMap::new();
                        details.insert("process".to_string(), process_detail(proc));
                        self.shared.bus
                            .publish(
                                RESTART_TOPIC,
                                AnomalyEvent::new(
                                    AnomalyType::CrashLoop,
                                    Severity::Critical,
                                    format!(
                                        "Crash loop detected: {} restarted {} times",
                                        proc.name, crash_loop_count
                                    ),
                                    details,
                                ),
                            )
                            .await;
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
