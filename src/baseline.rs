//! Baseline Learner (§4.2): collects a warm-up window of samples and
//! synthesizes a reference Snapshot from their mean. Grounded on
//! `logic/baseline/mod.rs`'s EMA/warm-up flow, reworked into an owned value
//! rather than a `static GLOBAL_BASELINE`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::model::Snapshot;
use crate::probe::SystemProbe;

#[derive(Debug)]
pub struct BaselineError(pub String);

impl std::fmt::Display for BaselineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "baseline error: {}", self.0)
    }
}
impl std::error::Error for BaselineError {}

/// Cooperative cancellation handle shared between the caller and `learn`.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Observable progress: samples collected so far, shared with the caller.
#[derive(Clone, Default)]
pub struct Progress(Arc<AtomicUsize>);

impl Progress {
    pub fn new() -> Self {
        Progress(Arc::new(AtomicUsize::new(0)))
    }

    pub fn samples_collected(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Collects `floor(duration/sample_interval)` samples, then emits a synthetic
/// Snapshot whose numeric fields are the arithmetic mean of the samples and
/// whose top-process lists are empty (the baseline is an aggregate reference,
/// not an identity). Cancellable: on cancellation, returns the best baseline
/// computable from samples collected so far, or fails if none were collected.
pub async fn learn(
    probe: &dyn SystemProbe,
    duration: Duration,
    sample_interval: Duration,
    cancel: &CancelToken,
    progress: &Progress,
) -> Result<Snapshot, BaselineError> {
    let target = (duration.as_secs_f64() / sample_interval.as_secs_f64()).floor() as usize;
    let target = target.max(1);

    let mut samples: Vec<Snapshot> = Vec::with_capacity(target);
    for _ in 0..target {
        if cancel.is_cancelled() {
            break;
        }
        match probe.sample().await {
            Ok(snap) => {
                samples.push(snap);
                progress.0.store(samples.len(), Ordering::SeqCst);
            }
            Err(e) => {
                log::warn!("baseline sample failed, skipping: {}", e);
            }
        }
        if samples.len() >= target || cancel.is_cancelled() {
            break;
        }
        tokio::time::sleep(sample_interval).await;
    }

    if samples.is_empty() {
        return Err(BaselineError("no samples collected".to_string()));
    }

    let cpu: Vec<f64> = samples.iter().map(|s| s.cpu_percent).collect();
    let memp: Vec<f64> = samples.iter().map(|s| s.memory_percent).collect();
    let memu: Vec<f64> = samples.iter().map(|s| s.memory_used_mb).collect();
    let memt: Vec<f64> = samples.iter().map(|s| s.memory_total_mb).collect();
    let l1: Vec<f64> = samples.iter().map(|s| s.load_1min).collect();
    let l5: Vec<f64> = samples.iter().map(|s| s.load_5min).collect();
    let l15: Vec<f64> = samples.iter().map(|s| s.load_15min).collect();
    let procs: Vec<f64> = samples.iter().map(|s| s.process_count as f64).collect();

    let timestamp = samples.last().map(|s| s.timestamp).unwrap_or_else(Utc::now);

    Ok(Snapshot {
        timestamp,
        cpu_percent: mean(&cpu),
        memory_percent: mean(&memp),
        memory_used_mb: mean(&memu),
        memory_total_mb: mean(&memt),
        load_1min: mean(&l1),
        load_5min: mean(&l5),
        load_15min: mean(&l15),
        process_count: mean(&procs).round() as usize,
        top_cpu_processes: Vec::new(),
        top_memory_processes: Vec::new(),
        listening_ports: Default::default(),
    })
}
