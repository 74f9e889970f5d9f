//! Immutable configuration, built once at start-up and shared by reference.
//!
//! One value is constructed up front and passed explicitly into every
//! component rather than kept behind file-level statics, so tests can build
//! a `Config` without touching process environment at all.

use std::path::PathBuf;
use std::time::Duration;

use crate::model::Severity;

#[derive(Debug, Clone)]
pub struct Config {
    // §6 environment variables
    pub read_only_mode: bool,
    pub require_approval: bool,
    pub allow_network: bool,
    pub model: Option<String>,
    pub api_key: Option<String>,

    // §4.4 Anomaly Detector thresholds
    pub cpu_spike_ratio: f64,
    pub cpu_critical_abs: f64,
    pub memory_spike_ratio: f64,
    pub memory_critical_abs: f64,
    pub memory_leak_window_samples: usize,
    pub memory_leak_monotonic_fraction: f64,
    pub new_process_cpu_threshold: f64,
    pub new_process_mem_threshold_mb: f64,
    pub restart_window: Duration,
    pub crash_loop_count: u32,

    // §4.6 Watcher cadences
    pub cpu_watcher_interval: Duration,
    pub memory_watcher_interval: Duration,
    pub load_watcher_interval: Duration,
    pub process_watcher_interval: Duration,
    pub watcher_backoff: Duration,

    // §4.7 Handlers
    pub max_events_per_minute: u32,
    pub events_log_path: PathBuf,

    // §4.8 Investigation cache
    pub cache_path: PathBuf,
    pub cache_ttl: Duration,

    // §4.9 Investigation orchestrator
    pub min_severity: Severity,
    pub max_concurrent_investigations: usize,
    pub investigation_timeout: Duration,
    pub investigations_log_path: PathBuf,

    // §4.10 Allowlist
    pub allowlist_path: PathBuf,
    pub network_allowlist_path: PathBuf,

    // §5
    pub queue_drain_grace: Duration,
}

#[derive(Debug)]
pub struct ConfigError(String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}
impl std::error::Error for ConfigError {}

fn bool_env(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.to_lowercase();
            !(v == "false" || v == "0" || v == "no" || v == "off")
        }
        Err(_) => default,
    }
}

impl Config {
    /// Builds the default configuration, then overrides from `spec.md` §6's
    /// environment variables. Never panics; unset/unparsable values fall back
    /// to their documented default.
    pub fn from_env() -> Self {
        let home_events = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".uatu")
            .join("events.jsonl");
        let home_investigations = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".uatu")
            .join("investigations.jsonl");
        let home_cache = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".uatu")
            .join("investigation_cache.json");
        let config_allowlist = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("uatu")
            .join("allowlist.json");
        let config_network_allowlist = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("uatu")
            .join("network_allowlist.json");

        Config {
            read_only_mode: bool_env("READ_ONLY_MODE", true),
            require_approval: bool_env("REQUIRE_APPROVAL", true),
            allow_network: bool_env("ALLOW_NETWORK", false),
            model: std::env::var("MODEL").ok(),
            api_key: std::env::var("API_KEY").ok(),

            cpu_spike_ratio: 1.5,
            cpu_critical_abs: 90.0,
            memory_spike_ratio: 1.3,
            memory_critical_abs: 95.0,
            memory_leak_window_samples: 6,
            memory_leak_monotonic_fraction: 0.8,
            new_process_cpu_threshold: 20.0,
            new_process_mem_threshold_mb: 500.0,
            restart_window: Duration::from_secs(5 * 60),
            crash_loop_count: 3,

            cpu_watcher_interval: Duration::from_secs(1),
            memory_watcher_interval: Duration::from_secs(2),
            load_watcher_interval: Duration::from_secs(5),
            process_watcher_interval: Duration::from_secs(3),
            watcher_backoff: Duration::from_secs(5),

            max_events_per_minute: 60,
            events_log_path: home_events,

            cache_path: home_cache,
            cache_ttl: Duration::from_secs(60 * 60),

            min_severity: Severity::Warning,
            max_concurrent_investigations: 3,
            investigation_timeout: Duration::from_secs(120),
            investigations_log_path: home_investigations,

            allowlist_path: config_allowlist,
            network_allowlist_path: config_network_allowlist,

            queue_drain_grace: Duration::from_secs(5),
        }
    }

    /// Fails fast for configuration that makes investigation impossible.
    /// Called only by entry points that actually need the provider
    /// (`watch --investigate`), not by the bare detection pipeline.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConfigError("API_KEY is required for investigation".to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        // Build without touching the environment, for tests.
        Config {
            read_only_mode: true,
            require_approval: true,
            allow_network: false,
            model: None,
            api_key: None,

            cpu_spike_ratio: 1.5,
            cpu_critical_abs: 90.0,
            memory_spike_ratio: 1.3,
            memory_critical_abs: 95.0,
            memory_leak_window_samples: 6,
            memory_leak_monotonic_fraction: 0.8,
            new_process_cpu_threshold: 20.0,
            new_process_mem_threshold_mb: 500.0,
            restart_window: Duration::from_secs(5 * 60),
            crash_loop_count: 3,

            cpu_watcher_interval: Duration::from_secs(1),
            memory_watcher_interval: Duration::from_secs(2),
            load_watcher_interval: Duration::from_secs(5),
            process_watcher_interval: Duration::from_secs(3),
            watcher_backoff: Duration::from_secs(5),

            max_events_per_minute: 60,
            events_log_path: PathBuf::from("events.jsonl"),

            cache_path: PathBuf::from("investigation_cache.json"),
            cache_ttl: Duration::from_secs(60 * 60),

            min_severity: Severity::Warning,
            max_concurrent_investigations: 3,
            investigation_timeout: Duration::from_secs(120),
            investigations_log_path: PathBuf::from("investigations.jsonl"),

            allowlist_path: PathBuf::from("allowlist.json"),
            network_allowlist_path: PathBuf::from("network_allowlist.json"),

            queue_drain_grace: Duration::from_secs(5),
        }
    }
}
