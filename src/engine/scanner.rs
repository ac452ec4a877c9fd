//! Scan orchestrator.
//!
//! Fans out over every (chain, mode) pair, pacing requests through the
//! shared rate limiter and serving repeats from the cache, then hands the
//! combined candidates to the risk engine and persists the survivors.
//! A failing pair is logged and reported; it never aborts the scan.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{make_key, Cache};
use crate::limiter::RateLimiter;
use crate::risk::RiskEngine;
use crate::source::CandidateSource;
use crate::storage::SignalStore;
use crate::types::{Analysis, Candidate, DataKind, ScanMode, TradingSignal};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How many of the top-ranked signals get a deep-analysis lookup.
pub const ANALYZE_TOP_N: usize = 3;

/// Credit cost of one deep-analysis lookup.
const ANALYSIS_CREDITS: u32 = 1;

// ---------------------------------------------------------------------------
// Request & report
// ---------------------------------------------------------------------------

/// Parameters of one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub chains: Vec<String>,
    pub modes: Vec<ScanMode>,
    /// Per-pair candidate limit passed to the source.
    pub limit: usize,
    pub analyze: bool,
}

/// A (chain, mode) fetch that failed during a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub chain: String,
    pub mode: ScanMode,
    pub error: String,
}

/// Everything one scan produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Chains actually scanned after the allow/deny filter.
    pub chains: Vec<String>,
    /// Ranked, persisted signals.
    pub signals: Vec<TradingSignal>,
    pub failures: Vec<SourceFailure>,
    pub candidates_fetched: usize,
    /// Credits saved by cache hits during this scan.
    pub credits_saved: u64,
}

impl ScanReport {
    /// Failures grouped per chain, for per-chain warnings.
    pub fn failures_by_chain(&self) -> BTreeMap<&str, Vec<&SourceFailure>> {
        let mut grouped: BTreeMap<&str, Vec<&SourceFailure>> = BTreeMap::new();
        for failure in &self.failures {
            grouped.entry(failure.chain.as_str()).or_default().push(failure);
        }
        grouped
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scan {} | {} chains | {} candidates | {} signals | {} failures | {} credits saved",
            self.scan_id,
            self.chains.len(),
            self.candidates_fetched,
            self.signals.len(),
            self.failures.len(),
            self.credits_saved,
        )
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ScanOrchestrator {
    source: Arc<dyn CandidateSource>,
    cache: Arc<Cache>,
    limiter: Arc<RateLimiter>,
    store: Arc<SignalStore>,
    engine: RiskEngine,
}

impl ScanOrchestrator {
    pub fn new(
        source: Arc<dyn CandidateSource>,
        cache: Arc<Cache>,
        limiter: Arc<RateLimiter>,
        store: Arc<SignalStore>,
        engine: RiskEngine,
    ) -> Self {
        Self {
            source,
            cache,
            limiter,
            store,
            engine,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    pub fn engine(&self) -> &RiskEngine {
        &self.engine
    }

    /// Run one full scan.
    ///
    /// Source failures are recorded in the report. Only a failure to persist
    /// the surviving signals is returned as an error.
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanReport> {
        let scan_id = Uuid::new_v4();
        let started_at = Utc::now();
        let saved_before = self.cache.stats().credits_saved;

        let chains = self.engine.config().effective_chains(&request.chains);
        if chains.len() < request.chains.len() {
            info!(
                requested = request.chains.len(),
                effective = chains.len(),
                "Chain filter removed some chains"
            );
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut failures = Vec::new();

        for chain in &chains {
            for &mode in &request.modes {
                match self.fetch_pair(chain, mode, request.limit).await {
                    Ok(batch) => candidates.extend(batch),
                    Err(e) => {
                        warn!(
                            chain = %chain,
                            mode = %mode,
                            source = self.source.name(),
                            error = %e,
                            "Candidate fetch failed, continuing scan"
                        );
                        failures.push(SourceFailure {
                            chain: chain.clone(),
                            mode,
                            error: format!("{e:#}"),
                        });
                    }
                }
            }
        }
        let candidates_fetched = candidates.len();

        let window = self.engine.config().dedupe_window();
        let mut signals = self
            .engine
            .evaluate(candidates, |c| self.store.has_recent_signal(c, window));

        if request.analyze {
            self.analyze_top(&mut signals).await;
        }

        let survivors: Vec<Candidate> = signals.iter().map(|s| s.candidate().clone()).collect();
        let stored = self.store.log_batch(&survivors)?;
        for (signal, record) in signals.iter_mut().zip(stored) {
            signal.signal = record;
        }

        let report = ScanReport {
            scan_id,
            started_at,
            chains,
            signals,
            failures,
            candidates_fetched,
            credits_saved: self.cache.stats().credits_saved.saturating_sub(saved_before),
        };
        info!(
            scan_id = %report.scan_id,
            candidates = report.candidates_fetched,
            signals = report.signals.len(),
            failures = report.failures.len(),
            credits_saved = report.credits_saved,
            "Scan complete"
        );
        Ok(report)
    }

    /// Rate-limited, cached fetch for one (chain, mode) pair.
    async fn fetch_pair(&self, chain: &str, mode: ScanMode, limit: usize) -> Result<Vec<Candidate>> {
        let credits = mode.credits();
        let key = make_key(
            "candidates",
            &json!({ "chain": chain, "mode": mode, "limit": limit }),
        );
        self.limiter.acquire(f64::from(credits)).await;
        self.cache
            .get_or_fetch(&key, mode.data_kind().ttl(), credits, || {
                self.source.fetch_candidates(chain, mode, limit)
            })
            .await
    }

    /// Best-effort deep analysis of the top signals, concurrently.
    async fn analyze_top(&self, signals: &mut [TradingSignal]) {
        let lookups = signals.iter().take(ANALYZE_TOP_N).map(|s| {
            let chain = s.candidate().chain.clone();
            let token = s.candidate().token.clone();
            async move {
                let key = make_key("analysis", &json!({ "chain": chain, "token": token }));
                self.limiter.acquire(f64::from(ANALYSIS_CREDITS)).await;
                self.cache
                    .get_or_fetch(&key, DataKind::Analysis.ttl(), ANALYSIS_CREDITS, || {
                        self.source.analyze_token(&chain, &token)
                    })
                    .await
            }
        });
        let results = join_all(lookups).await;

        for (signal, result) in signals.iter_mut().zip(results) {
            signal.analysis = Some(match result {
                Ok(data) => Analysis::Ok { data },
                Err(e) => {
                    warn!(token = %signal.candidate().token, error = %e, "Deep analysis failed");
                    Analysis::Error {
                        message: format!("{e:#}"),
                    }
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
