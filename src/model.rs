//! Core data model shared by every component: snapshots, process info,
//! anomaly events and severities, and the persisted allowlist/cache entry
//! shapes.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single point-in-time reading of system metrics plus top process lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub load_1min: f64,
    pub load_5min: f64,
    pub load_15min: f64,
    pub process_count: usize,
    /// Descending by cpu, len <= 10, deduplicated by pid.
    pub top_cpu_processes: Vec<ProcessInfo>,
    /// Descending by memory, len <= 10, deduplicated by pid.
    pub top_memory_processes: Vec<ProcessInfo>,
    pub listening_ports: BTreeSet<u16>,
}

impl Snapshot {
    /// An empty snapshot, useful as a zero value while baselines warm up.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Snapshot {
            timestamp,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_used_mb: 0.0,
            memory_total_mb: 0.0,
            load_1min: 0.0,
            load_5min: 0.0,
            load_15min: 0.0,
            process_count: 0,
            top_cpu_processes: Vec::new(),
            top_memory_processes: Vec::new(),
            listening_ports: BTreeSet::new(),
        }
    }
}

/// One process observed at sample time. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub name: String,
    pub user: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub state: String,
}

impl ProcessInfo {
    pub fn new(
        pid: i32,
        name: impl Into<String>,
        user: impl Into<String>,
        cpu_percent: f64,
        memory_mb: f64,
        state: impl Into<String>,
    ) -> Self {
        ProcessInfo {
            pid,
            name: name.into(),
            user: user.into(),
            cpu_percent,
            memory_mb,
            state: state.into(),
        }
    }

    /// "Z" or "zombie", case-insensitive, flags the zombie case.
    pub fn is_zombie(&self) -> bool {
        self.state.to_lowercase().contains('z')
    }
}

/// Closed set of anomaly kinds the Detector can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    CpuSpike,
    MemorySpike,
    MemoryLeak,
    ProcessCrash,
    ProcessRestart,
    CrashLoop,
    NewProcess,
    ProcessDied,
    PortChange,
    ZombieProcess,
    HighLoad,
    LogError,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::CpuSpike => "cpu_spike",
            AnomalyType::MemorySpike => "memory_spike",
            AnomalyType::MemoryLeak => "memory_leak",
            AnomalyType::ProcessCrash => "process_crash",
            AnomalyType::ProcessRestart => "process_restart",
            AnomalyType::CrashLoop => "crash_loop",
            AnomalyType::NewProcess => "new_process",
            AnomalyType::ProcessDied => "process_died",
            AnomalyType::PortChange => "port_change",
            AnomalyType::ZombieProcess => "zombie_process",
            AnomalyType::HighLoad => "high_load",
            AnomalyType::LogError => "log_error",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered severity: INFO < WARNING < ERROR < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Error = 2,
    Critical = 3,
}

#[derive(Debug)]
pub struct ParseSeverityError(String);

impl fmt::Display for ParseSeverityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown severity: '{}'", self.0)
    }
}
impl std::error::Error for ParseSeverityError {}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseSeverityError> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            other => Err(ParseSeverityError(other.to_string())),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Severity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Severity::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// An immutable record of a detected anomaly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: AnomalyType,
    pub severity: Severity,
    pub message: String,
    pub details: HashMap<String, Value>,
}

impl AnomalyEvent {
    pub fn new(
        event_type: AnomalyType,
        severity: Severity,
        message: impl Into<String>,
        details: HashMap<String, Value>,
    ) -> Self {
        AnomalyEvent {
            timestamp: Utc::now(),
            event_type,
            severity,
            message: message.into(),
            details,
        }
    }

    /// Fingerprint source string used by the Investigation Cache.
    pub fn fingerprint_source(&self) -> String {
        format!("{}:{}", self.event_type.as_str(), self.message)
    }
}

/// Allowlist entry match strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowlistEntryType {
    Base,
    Exact,
    Prefix,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowlistEntry {
    pub pattern: String,
    #[serde(rename = "type")]
    pub entry_type: AllowlistEntryType,
    pub added: DateTime<Utc>,
}

/// A cached investigation result, keyed by fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestigationCacheEntry {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub event_message: String,
    pub analysis: String,
    pub count: u64,
}

pub(crate) fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_total_order() {
        let all = [
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Critical,
        ];
        for a in all {
            for b in all {
                let lt = a < b;
                let eq = a == b;
                let gt = a > b;
                assert_eq!([lt, eq, gt].iter().filter(|x| **x).count(), 1);
            }
        }
    }

    #[test]
    fn severity_parse_case_insensitive() {
        assert_eq!(Severity::parse("WARNING").unwrap(), Severity::Warning);
        assert_eq!(Severity::parse("Critical").unwrap(), Severity::Critical);
        assert!(Severity::parse("bogus").is_err());
    }

    #[test]
    fn event_round_trips_through_json() {
        let mut details = HashMap::new();
        details.insert("pid".to_string(), Value::from(999));
        let event = AnomalyEvent::new(AnomalyType::CpuSpike, Severity::Warning, "cpu hot", details);
        let json = serde_json::to_string(&event).unwrap();
        let back: AnomalyEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn zombie_detection_is_case_insensitive() {
        let p = ProcessInfo::new(1, "defunct", "root", 0.0, 0.0, "Z");
        assert!(p.is_zombie());
        let p2 = ProcessInfo::new(1, "defunct", "root", 0.0, 0.0, "zombie");
        assert!(p2.is_zombie());
        let p3 = ProcessInfo::new(1, "sleeping", "root", 0.0, 0.0, "S");
        assert!(!p3.is_zombie());
    }

    #[test]
    fn fingerprint_source_matches_type_colon_message() {
        let event = AnomalyEvent::new(AnomalyType::MemoryLeak, Severity::Warning, "growing", HashMap::new());
        assert_eq!(event.fingerprint_source(), "memory_leak:growing");
    }
}
