//! Anomaly Detector (§4.4): heuristic rules over (baseline, history, current)
//! producing zero or more AnomalyEvents. Grounded on the top-to-bottom,
//! first-decisive-rule-wins shape of `logic/policy/engine.rs::decide_with_config`
//! and the heuristic thresholds of `logic/baseline/mod.rs::compare_with_baseline`.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;

use crate::config::Config;
use crate::history::History;
use crate::model::{AnomalyEvent, AnomalyType, ProcessInfo, Severity, Snapshot};

fn is_sane(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

fn top1<'a>(processes: &'a [ProcessInfo]) -> Option<&'a ProcessInfo> {
    processes.first()
}

fn top_n_details(processes: &[ProcessInfo], n: usize) -> serde_json::Value {
    json!(processes
        .iter()
        .take(n)
        .map(|p| json!({"pid": p.pid, "name": p.name, "cpu_percent": p.cpu_percent, "memory_mb": p.memory_mb}))
        .collect::<Vec<_>>())
}

fn process_detail(p: &ProcessInfo) -> serde_json::Value {
    json!({"pid": p.pid, "name": p.name, "cpu_percent": p.cpu_percent, "memory_mb": p.memory_mb})
}

/// Evaluates every rule, in the order given by §4.4, against a single
/// current Snapshot. If `baseline` is absent, returns no events (silent
/// warmup). Never fails: ill-formed (negative/NaN) values are treated as if
/// the offending rule's precondition did not hold.
pub fn detect(
    config: &Config,
    baseline: Option<&Snapshot>,
    history: &History,
    current: &Snapshot,
    prior_top_pids: &[i32],
) -> Vec<AnomalyEvent> {
    let baseline = match baseline {
        Some(b) => b,
        None => return Vec::new(),
    };

    let mut events = Vec::new();

    // Rules 1-2: CPU critical supersedes CPU spike; at most one CPU_SPIKE event.
    if is_sane(current.cpu_percent) {
        if current.cpu_percent >= config.cpu_critical_abs {
            let mut details = HashMap::new();
            details.insert(
                "top_processes".to_string(),
                top_n_details(&current.top_cpu_processes, 3),
            );
            events.push(AnomalyEvent::new(
                AnomalyType::CpuSpike,
                Severity::Critical,
                format!(
                    "CRITICAL: CPU usage at {:.1}% (threshold {:.0}%)",
                    current.cpu_percent, config.cpu_critical_abs
                ),
                details,
            ));
        } else if is_sane(baseline.cpu_percent)
            && baseline.cpu_percent > 0.0
            && current.cpu_percent > baseline.cpu_percent * config.cpu_spike_ratio
        {
            if let Some(proc) = top1(&current.top_cpu_processes) {
                let mut details = HashMap::new();
                details.insert("top_process".to_string(), process_detail(proc));
                events.push(AnomalyEvent::new(
                    AnomalyType::CpuSpike,
                    Severity::Warning,
                    format!(
                        "CPU spike: {} (pid {}) pushed usage to {:.1}%",
                        proc.name, proc.pid, current.cpu_percent
                    ),
                    details,
                ));
            }
        }
    }

    // Rules 3-4: memory critical supersedes memory spike.
    if is_sane(current.memory_percent) {
        if current.memory_percent >= config.memory_critical_abs {
            let mut details = HashMap::new();
            details.insert(
                "top_processes".to_string(),
                top_n_details(&current.top_memory_processes, 3),
            );
            events.push(AnomalyEvent::new(
                AnomalyType::MemorySpike,
                Severity::Critical,
                format!(
                    "CRITICAL: memory usage at {:.1}% (threshold {:.0}%)",
                    current.memory_percent, config.memory_critical_abs
                ),
                details,
            ));
        } else if is_sane(baseline.memory_percent)
            && baseline.memory_percent > 0.0
            && current.memory_percent > baseline.memory_percent * config.memory_spike_ratio
        {
            if let Some(proc) = top1(&current.top_memory_processes) {
                let mut details = HashMap::new();
                details.insert("top_process".to_string(), process_detail(proc));
                events.push(AnomalyEvent::new(
                    AnomalyType::MemorySpike,
                    Severity::Warning,
                    format!(
                        "Memory spike: {} (pid {}) pushed usage to {:.1}%",
                        proc.name, proc.pid, current.memory_percent
                    ),
                    details,
                ));
            }
        }
    }

    // Rule 5: memory leak, requires >= window_samples most-recent samples.
    if let Some(event) = detect_memory_leak(config, history) {
        events.push(event);
    }

    // Rule 6: new high-resource process.
    let mut new_procs: Vec<&ProcessInfo> = current
        .top_cpu_processes
        .iter()
        .chain(current.top_memory_processes.iter())
        .collect();
    new_procs.sort_by_key(|p| p.pid);
    new_procs.dedup_by_key(|p| p.pid);
    for proc in new_procs {
        if prior_top_pids.contains(&proc.pid) {
            continue;
        }
        if proc.cpu_percent > config.new_process_cpu_threshold
            || proc.memory_mb > config.new_process_mem_threshold_mb
        {
            let mut details = HashMap::new();
            details.insert("process".to_string(), process_detail(proc));
            events.push(AnomalyEvent::new(
                AnomalyType::NewProcess,
                Severity::Info,
                format!("New high-resource process: {} (pid {})", proc.name, proc.pid),
                details,
            ));
        }
    }

    // Rule 7: zombie processes.
    let mut zombies: Vec<&ProcessInfo> = current
        .top_cpu_processes
        .iter()
        .chain(current.top_memory_processes.iter())
        .filter(|p| p.is_zombie())
        .collect();
    zombies.sort_by_key(|p| p.pid);
    zombies.dedup_by_key(|p| p.pid);
    for proc in zombies {
        let mut details = HashMap::new();
        details.insert("process".to_string(), process_detail(proc));
        events.push(AnomalyEvent::new(
            AnomalyType::ZombieProcess,
            Severity::Warning,
            format!("Zombie process detected: {} (pid {})", proc.name, proc.pid),
            details,
        ));
    }

    events
}

fn detect_memory_leak(config: &Config, history: &History) -> Option<AnomalyEvent> {
    let window = config.memory_leak_window_samples;
    let samples = history.last_n(window);
    if samples.len() < window {
        return None;
    }

    let mut positive_deltas = 0usize;
    let mut total_deltas = 0usize;
    for pair in samples.windows(2) {
        total_deltas += 1;
        if pair[1].memory_used_mb > pair[0].memory_used_mb {
            positive_deltas += 1;
        }
    }
    if total_deltas == 0 {
        return None;
    }
    let fraction = positive_deltas as f64 / total_deltas as f64;
    if fraction < config.memory_leak_monotonic_fraction {
        return None;
    }

    let first = samples.first()?;
    let last = samples.last()?;
    let minutes = (last.timestamp - first.timestamp).num_seconds() as f64 / 60.0;
    if minutes <= 0.0 {
        return None;
    }
    let growth_rate = (last.memory_used_mb - first.memory_used_mb) / minutes;

    let top_name = top1(&last.top_memory_processes).map(|p| p.name.as_str()).unwrap_or("unknown");

    let mut details = HashMap::new();
    details.insert("growth_rate_mb_per_min".to_string(), json!((growth_rate * 10.0).round() / 10.0));
    details.insert("window_samples".to_string(), json!(samples.len()));

    Some(AnomalyEvent::new(
        AnomalyType::MemoryLeak,
        Severity::Warning,
        format!(
            "Possible memory leak: growing at {:.1} MB/min (top consumer: {})",
            growth_rate, top_name
        ),
        details,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn base_snapshot(cpu: f64, mem_percent: f64) -> Snapshot {
        let mut s = Snapshot::empty(Utc::now());
        s.cpu_percent = cpu;
        s.memory_percent = mem_percent;
        s
    }

    #[test]
    fn no_baseline_means_silent_warmup() {
        let cfg = Config::default();
        let history = History::new();
        let current = base_snapshot(99.0, 99.0);
        assert!(detect(&cfg, None, &history, &current, &[]).is_empty());
    }

    #[test]
    fn cpu_spike_scenario() {
        let cfg = Config::default();
        let baseline = base_snapshot(40.0, 10.0);
        let history = History::new();
        let mut current = base_snapshot(70.0, 10.0);
        current
            .top_cpu_processes
            .push(ProcessInfo::new(999, "cpu_hog", "root", 50.0, 100.0, "S"));

        let events = detect(&cfg, Some(&baseline), &history, &current, &[]);
        let cpu_events: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == AnomalyType::CpuSpike)
            .collect();
        assert_eq!(cpu_events.len(), 1);
        assert_eq!(cpu_events[0].severity, Severity::Warning);
        assert!(cpu_events[0].message.contains("cpu_hog"));
        assert!(cpu_events[0].message.contains("999"));
        assert!(cpu_events[0].message.contains("70.0%"));
    }

    #[test]
    fn cpu_critical_supersedes_spike() {
        let cfg = Config::default();
        let baseline = base_snapshot(40.0, 10.0);
        let history = History::new();
        let current = base_snapshot(92.0, 10.0);

        let events = detect(&cfg, Some(&baseline), &history, &current, &[]);
        let cpu_events: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == AnomalyType::CpuSpike)
            .collect();
        assert_eq!(cpu_events.len(), 1);
        assert_eq!(cpu_events[0].severity, Severity::Critical);
        assert!(cpu_events[0].message.to_lowercase().contains("critical"));
    }

    #[test]
    fn memory_leak_scenario() {
        let cfg = Config::default();
        let baseline = base_snapshot(10.0, 10.0);
        let mut history = History::new();
        let mb = [8000.0, 8500.0, 9000.0, 9500.0, 10000.0, 10500.0];
        let start = Utc::now() - ChronoDuration::minutes(5);
        for (i, m) in mb.iter().enumerate() {
            let mut s = Snapshot::empty(start + ChronoDuration::minutes(i as i64));
            s.memory_used_mb = *m;
            s.top_memory_processes
                .push(ProcessInfo::new(42, "leaky", "root", 1.0, *m, "S"));
            history.push(s.clone());
        }
        let current = history.last().unwrap().clone();

        let events = detect(&cfg, Some(&baseline), &history, &current, &[]);
        let leak_events: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == AnomalyType::MemoryLeak)
            .collect();
        assert_eq!(leak_events.len(), 1);
        assert!(leak_events[0].message.contains("MB/min"));
        assert!(leak_events[0].message.contains("leaky"));
    }

    #[test]
    fn zombie_scenario() {
        let cfg = Config::default();
        let baseline = base_snapshot(10.0, 10.0);
        let history = History::new();
        let mut current = base_snapshot(10.0, 10.0);
        current
            .top_cpu_processes
            .push(ProcessInfo::new(7, "defunct_child", "root", 0.0, 0.0, "Z"));

        let events = detect(&cfg, Some(&baseline), &history, &current, &[]);
        let zombie_events: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == AnomalyType::ZombieProcess)
            .collect();
        assert_eq!(zombie_events.len(), 1);
        assert!(zombie_events[0].message.contains("defunct_child"));
        assert!(zombie_events[0].message.contains('7'));
    }

    #[test]
    fn within_thresholds_yields_no_events() {
        let cfg = Config::default();
        let baseline = base_snapshot(40.0, 40.0);
        let history = History::new();
        // cpu <= 1.5x baseline, mem <= 1.3x baseline, no zombie/new process.
        let current = base_snapshot(60.0, 52.0);
        assert!(detect(&cfg, Some(&baseline), &history, &current, &[]).is_empty());
    }
}
