//! SMARTFLOW — Signal intelligence shim over a blockchain-analytics API
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the scan components and either runs a single scan (`--once`)
//! or monitors continuously until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use smartflow::cache::Cache;
use smartflow::config;
use smartflow::engine::{MonitorOptions, ScanOrchestrator, ScanReport, ScanRequest};
use smartflow::limiter::RateLimiter;
use smartflow::risk::RiskEngine;
use smartflow::source::http::AnalyticsClient;
use smartflow::storage::SignalStore;
use smartflow::types::TradingSignal;

const BANNER: &str = r#"
 ____  __  __    _    ____ _____ _____ _     _____        __
/ ___||  \/  |  / \  |  _ \_   _|  ___| |   / _ \ \      / /
\___ \| |\/| | / _ \ | |_) || | | |_  | |  | | | \ \ /\ / /
 ___) | |  | |/ ___ \|  _ < | | |  _| | |__| |_| |\ V  V /
|____/|_|  |_/_/   \_\_| \_\|_| |_|   |_____\___/  \_/\_/

  Smart-money signal scanner
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let once = std::env::args().skip(1).any(|a| a == "--once");

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        chains = ?cfg.scan.chains,
        modes = ?cfg.scan.modes,
        preset = %cfg.rate_limit.preset,
        once,
        "SMARTFLOW starting up"
    );

    // -- Initialise components -------------------------------------------

    // Missing API key is fatal here, before any scan runs.
    let source = Arc::new(AnalyticsClient::from_config(&cfg.api)?);
    let cache = Arc::new(Cache::new());
    let limiter = Arc::new(RateLimiter::new(cfg.rate_limit.limiter_config()));
    let store = Arc::new(SignalStore::open(Some(&cfg.store.path)));
    info!(path = %store.path().display(), signals = store.len(), "Signal store opened");

    let orchestrator = Arc::new(ScanOrchestrator::new(
        source,
        cache.clone(),
        limiter.clone(),
        store.clone(),
        RiskEngine::new(cfg.risk.clone()),
    ));

    let request = ScanRequest {
        chains: cfg.scan.chains.clone(),
        modes: cfg.scan.modes.clone(),
        limit: cfg.scan.limit,
        analyze: cfg.scan.analyze,
    };

    if once {
        let report = orchestrator.scan(&request).await?;
        print_report(&report);
    } else {
        let options = MonitorOptions {
            request,
            interval: Duration::from_secs(cfg.scan.interval_secs),
            dedupe_window: Duration::from_millis(cfg.risk.dedupe_window_ms),
        };
        info!(
            interval_secs = cfg.scan.interval_secs,
            "Entering monitor loop. Press Ctrl+C to stop."
        );

        let handle = orchestrator.clone().monitor(options, print_signal);

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutdown signal received, waiting for in-flight scan.");
        handle.shutdown().await?;
    }

    // -- Summary -----------------------------------------------------------

    let cache_stats = cache.stats();
    let limiter_stats = limiter.stats();
    info!(
        hits = cache_stats.hits,
        misses = cache_stats.misses,
        hit_rate = format!("{:.0}%", cache_stats.hit_rate() * 100.0),
        credits_saved = cache_stats.credits_saved,
        requests = limiter_stats.total_requests,
        throttled = limiter_stats.throttled,
        "Session stats"
    );
    println!("\nSignal log: {}", store.get_stats(None));
    info!("SMARTFLOW shut down cleanly.");

    Ok(())
}

/// Per-chain warnings first, then the ranked signals.
fn print_report(report: &ScanReport) {
    for (chain, failures) in report.failures_by_chain() {
        for failure in failures {
            warn!(chain, mode = %failure.mode, error = %failure.error, "Source unavailable");
            println!("WARNING: {chain} ({}) unavailable: {}", failure.mode, failure.error);
        }
    }

    println!("\n{report}");
    if report.signals.is_empty() {
        println!("No new signals.");
    }
    for (rank, signal) in report.signals.iter().enumerate() {
        println!("{:>2}. {signal}", rank + 1);
        if let Some(action) = &signal.suggested_action {
            println!(
                "    -> {} {:?} urgency, {:?} size: {}",
                action.action, action.urgency, action.position_size_hint, action.reasoning
            );
        }
    }
}

fn print_signal(signal: &TradingSignal) {
    info!(id = %signal.signal.id, risk = signal.risk_score, "New signal");
    println!("{signal}");
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("smartflow=info"));

    let json_logging = std::env::var("SMARTFLOW_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
