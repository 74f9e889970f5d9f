//! Uatu: host-resident system observation daemon and LLM tool-call
//! permission gate.
//!
//! A thin CLI dispatches to the detection pipeline (`watch`) or tails the
//! JSONL logs it produces (`events`, `investigations`). Argument parsing is
//! hand-rolled over `std::env::args()` — no crate for it, this surface is
//! explicitly out of scope.

mod allowlist;
mod baseline;
mod bus;
mod cache;
mod config;
mod detector;
mod gate;
mod handlers;
mod history;
mod model;
mod orchestrator;
mod probe;
mod provider;
mod watchers;

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use config::Config;
use model::Severity;
use probe::SystemProbe;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to start async runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match args.first().map(String::as_str) {
        Some("watch") => runtime.block_on(run_watch(&args[1..])),
        Some("events") => run_events(&args[1..]),
        Some("investigations") => run_investigations(&args[1..]),
        Some(other) => {
            eprintln!("unknown subcommand '{}'", other);
            ExitCode::from(1)
        }
        None => {
            println!(
                "Uatu's interactive chat UI is an external surface and is not implemented here.\n\
                 Available subcommands: watch, events, investigations."
            );
            ExitCode::SUCCESS
        }
    }
}

fn flag_value(args: &[String], name: &str) -> Option<String> {
    args.iter().find_map(|a| a.strip_prefix(name).map(str::to_string))
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

async fn run_watch(args: &[String]) -> ExitCode {
    let config = Arc::new(Config::from_env());

    if has_flag(args, "--investigate") {
        if let Err(e) = config.require_api_key() {
            log::error!("{}", e);
            return ExitCode::from(1);
        }
    }

    let interval_override = flag_value(args, "--interval=").and_then(|v| v.parse::<u64>().ok());
    let baseline_minutes = flag_value(args, "--baseline=")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5);
    let investigate_level = flag_value(args, "--investigate-level=")
        .and_then(|v| Severity::parse(&v).ok())
        .unwrap_or(config.min_severity);

    log::info!("Uatu starting (read_only_mode={})", config.read_only_mode);

    let probe: Arc<dyn SystemProbe> = Arc::new(probe::SysinfoProbe::new());
    let bus = bus::EventBus::new();

    log::info!("learning baseline over {} minute(s)...", baseline_minutes);
    let cancel = baseline::CancelToken::new();
    let progress = baseline::Progress::new();
    let sample_interval = interval_override
        .map(std::time::Duration::from_secs)
        .unwrap_or(config.cpu_watcher_interval);
    let baseline_snapshot = match baseline::learn(
        probe.as_ref(),
        std::time::Duration::from_secs(baseline_minutes * 60),
        sample_interval,
        &cancel,
        &progress,
    )
    .await
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            log::error!("baseline learning failed: {}", e);
            return ExitCode::from(1);
        }
    };
    log::info!("baseline learned from {} sample(s)", progress.samples_collected());

    let shared = watchers::SharedState::new(config.clone(), probe.clone(), bus.clone());
    shared.set_baseline(baseline_snapshot);

    let event_logger: Arc<dyn bus::Handler> = Arc::new(handlers::EventLogger::new(&config.events_log_path));
    let console: Arc<dyn bus::Handler> = Arc::new(handlers::ConsoleDisplay::new());
    let rate_limiter: Arc<dyn bus::Handler> = Arc::new(handlers::RateLimiter::new(config.max_events_per_minute, bus.clone()));

    let topics = [
        watchers::cpu_topic(),
        watchers::memory_topic(),
        watchers::load_topic(),
        watchers::process_crash_topic(),
        watchers::process_restart_topic(),
        watchers::new_process_topic(),
        watchers::zombie_topic(),
    ];
    for topic in topics {
        bus.subscribe(topic, event_logger.clone());
        bus.subscribe(topic, console.clone());
        bus.subscribe(topic, rate_limiter.clone());
    }

    // The rate limiter's own dampening notice (§4.7) needs a listener too,
    // but not the rate limiter itself — it would otherwise count its own
    // notices toward the very window that triggered them.
    bus.subscribe(handlers::DAMPENING_TOPIC, event_logger.clone());
    bus.subscribe(handlers::DAMPENING_TOPIC, console.clone());

    if has_flag(args, "--investigate") {
        let cache = Arc::new(cache::InvestigationCache::load(&config.cache_path, config.cache_ttl));
        let provider = Arc::new(provider::TimeoutProvider::new(
            UnimplementedProvider,
            config.investigation_timeout,
        ));
        // `Orchestrator::new` spawns its own worker task holding an owned
        // `Arc<Self>`, so subscribing it as a Handler is enough to keep it
        // alive for the life of the process.
        let orchestrator = orchestrator::Orchestrator::new(
            investigate_level,
            probe.clone(),
            cache,
            provider,
            config.max_concurrent_investigations,
            config.investigations_log_path.clone(),
        );
        let handler: Arc<dyn bus::Handler> = orchestrator;
        for topic in topics {
            bus.subscribe(topic, handler.clone());
        }
    }

    let cpu_watcher = Arc::new(watchers::CpuWatcher::new(shared.clone()));
    let memory_watcher = Arc::new(watchers::MemoryWatcher::new(shared.clone()));
    let load_watcher = Arc::new(watchers::LoadWatcher::new(shared.clone()));
    let process_watcher = Arc::new(watchers::ProcessWatcher::new(shared.clone()));

    let watcher_handles: Vec<(Arc<dyn watchers::Watcher>, tokio::task::JoinHandle<()>)> = vec![
        spawn_watcher(cpu_watcher),
        spawn_watcher(memory_watcher),
        spawn_watcher(load_watcher),
        spawn_watcher(process_watcher),
    ];

    log::info!("watchers running; press Ctrl-C to stop");
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("received interrupt, shutting down"),
        Err(e) => log::error!("failed to listen for ctrl-c: {}", e),
    }

    // §5 cascading shutdown: stop every watcher, then drain in-flight work
    // for a bounded grace period rather than waiting indefinitely.
    for (watcher, _) in &watcher_handles {
        watcher.stop();
    }
    for (_, handle) in watcher_handles {
        let _ = tokio::time::timeout(config.queue_drain_grace, handle).await;
    }

    ExitCode::from(130)
}

fn spawn_watcher<W: watchers::Watcher + 'static>(
    watcher: Arc<W>,
) -> (Arc<dyn watchers::Watcher>, tokio::task::JoinHandle<()>) {
    let run_handle = watcher.clone();
    let handle = tokio::spawn(async move { run_handle.run().await });
    (watcher, handle)
}

/// No concrete LLM client ships with this crate (§1 scope); `watch
/// --investigate` without a real provider wired in always reports that no
/// analysis is available.
struct UnimplementedProvider;

#[async_trait::async_trait]
impl provider::InvestigationProvider for UnimplementedProvider {
    async fn investigate(&self, _prompt: &str) -> Result<String, provider::ProviderError> {
        Err(provider::ProviderError(
            "no investigation provider configured".to_string(),
        ))
    }
}

fn run_events(args: &[String]) -> ExitCode {
    let config = Config::from_env();
    let last = flag_value(args, "--last=").and_then(|v| v.parse::<usize>().ok());
    tail_jsonl(&config.events_log_path, last)
}

fn run_investigations(args: &[String]) -> ExitCode {
    let config = Config::from_env();
    let last = flag_value(args, "--last=").and_then(|v| v.parse::<usize>().ok());
    if has_flag(args, "--full") {
        tail_jsonl(&config.investigations_log_path, last)
    } else {
        tail_jsonl_summary(&config.investigations_log_path, last)
    }
}

fn tail_jsonl(path: &std::path::Path, last: Option<usize>) -> ExitCode {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("could not read {:?}: {}", path, e);
            return ExitCode::from(1);
        }
    };
    let lines: Vec<&str> = contents.lines().collect();
    let start = last.map(|n| lines.len().saturating_sub(n)).unwrap_or(0);
    for line in &lines[start..] {
        println!("{}", line);
    }
    ExitCode::SUCCESS
}

fn tail_jsonl_summary(path: &std::path::Path, last: Option<usize>) -> ExitCode {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("could not read {:?}: {}", path, e);
            return ExitCode::from(1);
        }
    };
    let lines: Vec<&str> = contents.lines().collect();
    let start = last.map(|n| lines.len().saturating_sub(n)).unwrap_or(0);
    for line in &lines[start..] {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(record) => {
                let ts = record["timestamp"].as_str().unwrap_or("?");
                let msg = record["event"]["message"].as_str().unwrap_or("?");
                let cached = record["investigation"]["cached"].as_bool().unwrap_or(false);
                println!("[{}] {} ({})", ts, msg, if cached { "cached" } else { "fresh" });
            }
            Err(_) => println!("{}", line),
        }
    }
    ExitCode::SUCCESS
}
