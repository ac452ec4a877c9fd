//! Continuous monitoring: repeated scans on a fixed interval.
//!
//! Each monitor keeps its own short-lived "seen" set so a signal delivered
//! on one tick is not handed to the callback again on the next. Stopping is
//! cooperative. A tick already running when `stop()` is called finishes
//! and still delivers its callbacks; no further tick is started.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::engine::scanner::{ScanOrchestrator, ScanRequest};
use crate::types::TradingSignal;

// ---------------------------------------------------------------------------
// Seen set
// ---------------------------------------------------------------------------

/// Keys remembered for `window` after insertion. Expiry is checked on read.
#[derive(Debug)]
pub struct SeenSet {
    window: Duration,
    entries: HashMap<String, Instant>,
}

impl SeenSet {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Record `key` and return true, unless it was seen within the window.
    pub fn insert_if_new(&mut self, key: &str) -> bool {
        let now = Instant::now();
        if let Some(&seen_at) = self.entries.get(key) {
            if now.duration_since(seen_at) < self.window {
                return false;
            }
        }
        self.entries.insert(key.to_string(), now);
        true
    }

    /// Whether `key` was seen within the window. Drops it if expired.
    pub fn contains(&mut self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(&seen_at) if seen_at.elapsed() < self.window => true,
            Some(_) => {
                self.entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        let window = self.window;
        self.entries.retain(|_, seen_at| seen_at.elapsed() < window);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub request: ScanRequest,
    pub interval: Duration,
    /// How long a delivered signal is suppressed on later ticks.
    pub dedupe_window: Duration,
}

/// Handle to a running monitor. Dropping it also stops the monitor.
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop scheduling ticks. Returns immediately; an in-flight tick runs on.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Whether the monitor task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for any in-flight tick to complete.
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.task.await.context("Monitor task failed")
    }
}

impl ScanOrchestrator {
    /// Scan immediately, then every `options.interval`, calling `on_signal`
    /// once per signal not delivered within the dedup window.
    pub fn monitor<F>(self: Arc<Self>, options: MonitorOptions, mut on_signal: F) -> MonitorHandle
    where
        F: FnMut(&TradingSignal) + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut seen = SeenSet::new(options.dedupe_window);
            let mut ticker = tokio::time::interval(options.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut tick = 0u64;

            info!(
                interval_ms = options.interval.as_millis() as u64,
                chains = options.request.chains.len(),
                modes = options.request.modes.len(),
                "Monitor started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        tick += 1;
                        match self.scan(&options.request).await {
                            Ok(report) => {
                                let mut delivered = 0usize;
                                for signal in &report.signals {
                                    if seen.insert_if_new(&signal.signal.dedupe_key()) {
                                        on_signal(signal);
                                        delivered += 1;
                                    }
                                }
                                seen.prune();
                                debug!(tick, delivered, seen = seen.len(), "Monitor tick done");
                            }
                            Err(e) => {
                                error!(tick, error = %e, "Monitor scan failed, continuing");
                            }
                        }
                    }
                }
            }

            info!(ticks = tick, "Monitor stopped");
        });

        MonitorHandle { stop_tx, task }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::limiter::{RateLimitConfig, RateLimiter};
    use crate::risk::{RiskConfig, RiskEngine};
    use crate::source::MockCandidateSource;
    use crate::storage::SignalStore;
    use crate::types::{Candidate, Metric, Metrics, ScanMode};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn temp_path() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("smartflow_test_monitor_{}.json", uuid::Uuid::new_v4()));
        p
    }

    fn candidate(token: &str) -> Candidate {
        Candidate {
            mode: ScanMode::DexTrades,
            token: token.to_string(),
            symbol: token.to_uppercase(),
            chain: "base".to_string(),
            score: 4.5,
            reason: "smart wallets buying".to_string(),
            metrics: Metrics::new().with(Metric::Buyers, 6.0),
            produced_at: Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap(),
        }
    }

    fn orchestrator(source: MockCandidateSource, path: &PathBuf) -> Arc<ScanOrchestrator> {
        orchestrator_with(source, path, RiskConfig::default())
    }

    fn orchestrator_with(
        source: MockCandidateSource,
        path: &PathBuf,
        risk: RiskConfig,
    ) -> Arc<ScanOrchestrator> {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_tokens: 100.0,
            refill_rate: 100.0,
            min_delay: Duration::ZERO,
        });
        Arc::new(ScanOrchestrator::new(
            Arc::new(source),
            Arc::new(Cache::new()),
            Arc::new(limiter),
            Arc::new(SignalStore::open(Some(path))),
            RiskEngine::new(risk),
        ))
    }

    fn options(interval: Duration) -> MonitorOptions {
        MonitorOptions {
            request: ScanRequest {
                chains: vec!["base".into()],
                modes: vec![ScanMode::DexTrades],
                limit: 10,
                analyze: false,
            },
            interval,
            dedupe_window: Duration::from_secs(30 * 60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_seen_set_expires_on_read() {
        let mut seen = SeenSet::new(Duration::from_secs(10));
        assert!(seen.insert_if_new("base:0xa:dex-trades"));
        assert!(!seen.insert_if_new("base:0xa:dex-trades"));
        assert!(seen.contains("base:0xa:dex-trades"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!seen.contains("base:0xa:dex-trades"));
        assert!(seen.is_empty());
        assert!(seen.insert_if_new("base:0xa:dex-trades"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seen_set_prune() {
        let mut seen = SeenSet::new(Duration::from_secs(5));
        seen.insert_if_new("a");
        tokio::time::advance(Duration::from_secs(3)).await;
        seen.insert_if_new("b");
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(seen.prune(), 1);
        assert_eq!(seen.len(), 1);
        assert!(seen.contains("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_candidate_delivered_once_across_ticks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut source = MockCandidateSource::new();
        source.expect_name().return_const("mock");
        source.expect_fetch_candidates().returning(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![candidate("0xabc")])
        });

        // Persisted dedup off, so only the seen set can suppress the repeat.
        let risk = RiskConfig {
            dedupe_window_ms: 0,
            ..RiskConfig::default()
        };
        let path = temp_path();
        let orch = orchestrator_with(source, &path, risk);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();

        let handle = orch.clone().monitor(options(Duration::from_millis(1000)), move |s| {
            sink.lock().push(s.signal.id.clone());
        });

        // Ticks at 0 ms and 1000 ms.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.shutdown().await.unwrap();

        assert_eq!(delivered.lock().len(), 1);
        assert!(calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(orch.store().len(), 1);

        // A plain scan still reports it: the store did not filter the repeat.
        let report = orch.scan(&options(Duration::ZERO).request).await.unwrap();
        assert_eq!(report.signals.len(), 1);
        assert_eq!(report.signals[0].signal.id, delivered.lock()[0]);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_token_on_later_tick_is_delivered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut source = MockCandidateSource::new();
        source.expect_name().return_const("mock");
        source.expect_fetch_candidates().returning(move |_, _, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(vec![candidate("0xa")])
            } else {
                Ok(vec![candidate("0xa"), candidate("0xb")])
            }
        });

        let path = temp_path();
        let orch = orchestrator(source, &path);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();

        // Longer than the DEX-trades cache TTL, so each tick refetches.
        let handle = orch.monitor(options(Duration::from_secs(60)), move |s| {
            sink.lock().push(s.candidate().token.clone());
        });

        tokio::time::sleep(Duration::from_secs(90)).await;
        handle.shutdown().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*delivered.lock(), vec!["0xa".to_string(), "0xb".to_string()]);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_ticks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut source = MockCandidateSource::new();
        source.expect_name().return_const("mock");
        source.expect_fetch_candidates().returning(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        });

        let path = temp_path();
        let orch = orchestrator(source, &path);
        let handle = orch.monitor(options(Duration::from_secs(60)), |_| {});

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
        assert!(handle.is_stopped());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(handle.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.shutdown().await.unwrap();
        std::fs::remove_file(&path).ok();
    }
}
