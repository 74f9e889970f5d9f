//! SystemProbe: the sole boundary onto real OS process/metric introspection.
//! Grounded on `logic/collector.rs`'s use of `sysinfo::System`/`Networks`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;

use crate::model::{ProcessInfo, Snapshot};

#[derive(Debug)]
pub struct ProbeError(pub String);

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "probe error: {}", self.0)
    }
}
impl std::error::Error for ProbeError {}

/// Optional thresholds for `list_processes`; callers MUST pass at least one
/// non-trivial threshold to avoid pathologically large listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessFilter {
    pub min_cpu_percent: Option<f64>,
    pub min_memory_mb: Option<f64>,
}

#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// Gathers every Snapshot field in one call. A failure to read any
    /// single process must not fail the whole sample — that process is
    /// simply omitted.
    async fn sample(&self) -> Result<Snapshot, ProbeError>;

    /// Lists processes matching `filter`.
    async fn list_processes(&self, filter: ProcessFilter) -> Result<Vec<ProcessInfo>, ProbeError>;

    /// Reads raw bytes from a kernel pseudo-filesystem path (e.g. `/proc/...`).
    /// Fails on any path outside the designated kernel roots.
    async fn read_kernel_path(&self, path: &str) -> Result<Vec<u8>, ProbeError>;
}

const KERNEL_ROOTS: &[&str] = &["/proc", "/sys"];

fn is_kernel_path(path: &str) -> bool {
    KERNEL_ROOTS.iter().any(|root| path.starts_with(root))
}

/// Real implementation backed by `sysinfo`.
pub struct SysinfoProbe {
    inner: parking_lot::Mutex<sysinfo::System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_all();
        SysinfoProbe {
            inner: parking_lot::Mutex::new(sys),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn process_infos(sys: &sysinfo::System) -> Vec<ProcessInfo> {
    sys.processes()
        .values()
        .map(|p| {
            let state = format!("{:?}", p.status());
            ProcessInfo::new(
                p.pid().as_u32() as i32,
                p.name().to_string(),
                p.user_id()
                    .map(|u| format!("{:?}", u))
                    .unwrap_or_else(|| "?".to_string()),
                p.cpu_usage() as f64,
                p.memory() as f64 / (1024.0 * 1024.0),
                state,
            )
        })
        .collect()
}

fn top_n(mut processes: Vec<ProcessInfo>, n: usize, by_cpu: bool) -> Vec<ProcessInfo> {
    processes.sort_by(|a, b| {
        let ord = if by_cpu {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        } else {
            b.memory_mb
                .partial_cmp(&a.memory_mb)
                .unwrap_or(std::cmp::Ordering::Equal)
        };
        ord.then_with(|| a.pid.cmp(&b.pid))
    });
    processes.dedup_by_key(|p| p.pid);
    processes.truncate(n);
    processes
}

#[async_trait]
impl SystemProbe for SysinfoProbe {
    async fn sample(&self) -> Result<Snapshot, ProbeError> {
        let mut sys = self.inner.lock();
        sys.refresh_all();

        let cpu_percent = sys.global_cpu_info().cpu_usage() as f64;
        let memory_total_mb = sys.total_memory() as f64 / (1024.0 * 1024.0);
        let memory_used_mb = sys.used_memory() as f64 / (1024.0 * 1024.0);
        let memory_percent = if memory_total_mb > 0.0 {
            (memory_used_mb / memory_total_mb) * 100.0
        } else {
            0.0
        };
        let load = sysinfo::System::load_average();

        let processes = process_infos(&sys);
        let process_count = processes.len();
        let top_cpu_processes = top_n(processes.clone(), 10, true);
        let top_memory_processes = top_n(processes, 10, false);

        Ok(Snapshot {
            timestamp: Utc::now(),
            cpu_percent,
            memory_percent,
            memory_used_mb,
            memory_total_mb,
            load_1min: load.one,
            load_5min: load.five,
            load_15min: load.fifteen,
            process_count,
            top_cpu_processes,
            top_memory_processes,
            listening_ports: BTreeSet::new(),
        })
    }

    async fn list_processes(&self, filter: ProcessFilter) -> Result<Vec<ProcessInfo>, ProbeError> {
        if filter.min_cpu_percent.is_none() && filter.min_memory_mb.is_none() {
            return Err(ProbeError(
                "list_processes requires a non-trivial filter".to_string(),
            ));
        }
        let mut sys = self.inner.lock();
        sys.refresh_all();
        let processes = process_infos(&sys);
        Ok(processes
            .into_iter()
            .filter(|p| {
                filter
                    .min_cpu_percent
                    .map(|min| p.cpu_percent >= min)
                    .unwrap_or(true)
                    && filter
                        .min_memory_mb
                        .map(|min| p.memory_mb >= min)
                        .unwrap_or(true)
            })
            .collect())
    }

    async fn read_kernel_path(&self, path: &str) -> Result<Vec<u8>, ProbeError> {
        if !is_kernel_path(path) {
            return Err(ProbeError(format!("'{}' is not a kernel path", path)));
        }
        tokio::fs::read(path)
            .await
            .map_err(|e| ProbeError(e.to_string()))
    }
}

/// In-memory test double: returns a fixed, caller-supplied sequence of
/// snapshots, one per call to `sample`.
pub struct FakeProbe {
    snapshots: parking_lot::Mutex<std::collections::VecDeque<Snapshot>>,
}

impl FakeProbe {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        FakeProbe {
            snapshots: parking_lot::Mutex::new(snapshots.into()),
        }
    }
}

#[async_trait]
impl SystemProbe for FakeProbe {
    async fn sample(&self) -> Result<Snapshot, ProbeError> {
        self.snapshots
            .lock()
            .pop_front()
            .ok_or_else(|| ProbeError("fake probe exhausted".to_string()))
    }

    async fn list_processes(&self, _filter: ProcessFilter) -> Result<Vec<ProcessInfo>, ProbeError> {
        Ok(Vec::new())
    }

    async fn read_kernel_path(&self, path: &str) -> Result<Vec<u8>, ProbeError> {
        if !is_kernel_path(path) {
            return Err(ProbeError(format!("'{}' is not a kernel path", path)));
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_probe_serves_snapshots_in_order() {
        let s1 = Snapshot::empty(Utc::now());
        let mut s2 = Snapshot::empty(Utc::now());
        s2.cpu_percent = 42.0;
        let probe = FakeProbe::new(vec![s1.clone(), s2.clone()]);
        assert_eq!(probe.sample().await.unwrap().cpu_percent, s1.cpu_percent);
        assert_eq!(probe.sample().await.unwrap().cpu_percent, s2.cpu_percent);
        assert!(probe.sample().await.is_err());
    }

    #[tokio::test]
    async fn read_kernel_path_rejects_non_kernel_paths() {
        let probe = FakeProbe::new(vec![]);
        assert!(probe.read_kernel_path("/proc/1/status").await.is_ok());
        assert!(probe.read_kernel_path("/etc/passwd").await.is_err());
    }

    #[test]
    fn top_n_sorts_by_cpu_desc_and_dedups() {
        let processes = vec![
            ProcessInfo::new(1, "a", "u", 10.0, 1.0, "S"),
            ProcessInfo::new(2, "b", "u", 50.0, 1.0, "S"),
            ProcessInfo::new(2, "b-dup", "u", 50.0, 1.0, "S"),
        ];
        let top = top_n(processes, 10, true);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].pid, 2);
    }
}
