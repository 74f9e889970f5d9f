//! Watchers (§4.6): long-lived, independent loops each sampling one signal
//! at its own cadence and publishing anomaly events. Each runs as a tokio
//! task with a cooperative `AtomicBool` stop flag.

mod cpu;
mod load;
mod memory;
mod process;

pub use cpu::CpuWatcher;
pub use load::LoadWatcher;
pub use memory::MemoryWatcher;
pub use process::ProcessWatcher;

pub fn cpu_topic() -> &'static str {
    cpu::TOPIC
}

pub fn memory_topic() -> &'static str {
    memory::TOPIC
}

pub fn load_topic() -> &'static str {
    load::TOPIC
}

pub fn process_crash_topic() -> &'static str {
    process::CRASH_TOPIC
}

pub fn process_restart_topic() -> &'static str {
    process::RESTART_TOPIC
}

pub fn new_process_topic() -> &'static str {
    memory::NEW_PROCESS_TOPIC
}

pub fn zombie_topic() -> &'static str {
    memory::ZOMBIE_TOPIC
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::bus::EventBus;
use crate::config::Config;
use crate::model::Snapshot;
use crate::probe::SystemProbe;

/// State shared by every Watcher: the probe they all sample from, the
/// baseline the Detector reasons over, and the bus they publish through.
/// Per §9 Design Notes, the baseline is set *after* construction, once the
/// Baseline Learner completes — watchers started with no baseline yet must
/// (and, by virtue of `detect`'s contract, do) produce no events.
///
/// History and the "prior top pids" set are *not* here: §5 requires a
/// single producer per History instance, so each watcher that needs either
/// owns its own copy privately rather than sharing one through this struct.
pub struct SharedState {
    pub config: Arc<Config>,
    pub probe: Arc<dyn SystemProbe>,
    pub bus: EventBus,
    pub baseline: RwLock<Option<Snapshot>>,
}

impl SharedState {
    pub fn new(config: Arc<Config>, probe: Arc<dyn SystemProbe>, bus: EventBus) -> Arc<Self> {
        Arc::new(SharedState {
            config,
            probe,
            bus,
            baseline: RwLock::new(None),
        })
    }

    pub fn set_baseline(&self, baseline: Snapshot) {
        *self.baseline.write() = Some(baseline);
    }
}

/// Cooperative stop flag shared between a Watcher and whoever holds its
/// handle. `stop()` is idempotent.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        StopFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait Watcher: Send + Sync {
    /// A stable name for logging.
    fn name(&self) -> &str;

    /// Runs until `stop()` is called on the handle returned alongside this
    /// watcher at construction. Each watcher fails independently: a
    /// transient sampling error is logged and the watcher backs off, it
    /// never stops its siblings.
    async fn run(&self);

    fn stop_flag(&self) -> &StopFlag;

    fn stop(&self) {
        self.stop_flag().stop();
    }
}
