//! Risk engine: threshold filtering, deduplication, scoring and ranking.
//!
//! Pure and synchronous: given the same candidates, config and recency
//! predicate, the output is identical. Persisted dedup is injected as a
//! predicate so the engine never touches storage or the network.

pub mod scoring;

use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::types::{Candidate, Metric, Signal, TradingSignal};
use scoring::RiskAssessment;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Risk filter and ranking configuration (`[risk]` in config.toml).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Candidates scoring below this are dropped (inclusive bound).
    pub min_score: f64,
    /// Ranked output is truncated to this many signals.
    pub max_signals_per_scan: usize,
    /// Suppress re-emission of the same chain+token+mode within this window.
    pub dedupe_window_ms: u64,
    pub min_smart_money_buyers: Option<f64>,
    /// Compared against the absolute 24h netflow.
    pub min_netflow_usd: Option<f64>,
    pub min_fresh_wallets: Option<f64>,
    pub allowed_chains: Option<Vec<String>>,
    pub excluded_chains: Option<Vec<String>>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_score: 2.0,
            max_signals_per_scan: 10,
            dedupe_window_ms: 30 * 60 * 1000,
            min_smart_money_buyers: None,
            min_netflow_usd: None,
            min_fresh_wallets: None,
            allowed_chains: None,
            excluded_chains: None,
        }
    }
}

impl RiskConfig {
    /// Dedup window as a chrono duration.
    pub fn dedupe_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.dedupe_window_ms.min(i64::MAX as u64) as i64)
    }

    /// Apply the allow-list, then subtract the deny-list.
    pub fn effective_chains(&self, requested: &[String]) -> Vec<String> {
        let listed = |list: &Option<Vec<String>>, chain: &str| {
            list.as_ref()
                .map(|l| l.iter().any(|c| c.eq_ignore_ascii_case(chain)))
        };
        requested
            .iter()
            .filter(|chain| listed(&self.allowed_chains, chain.as_str()).unwrap_or(true))
            .filter(|chain| !listed(&self.excluded_chains, chain.as_str()).unwrap_or(false))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Turns raw candidates into ranked, risk-annotated trading signals.
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Run threshold filter → dedup → scoring → ranking.
    ///
    /// `is_recent` reports whether a candidate's chain+token+mode was already
    /// emitted within the dedup window (normally the signal store).
    pub fn evaluate<F>(&self, candidates: Vec<Candidate>, is_recent: F) -> Vec<TradingSignal>
    where
        F: Fn(&Candidate) -> bool,
    {
        let total = candidates.len();

        let passed: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| self.passes_thresholds(c))
            .collect();
        let after_threshold = passed.len();

        let fresh: Vec<Candidate> = passed.into_iter().filter(|c| !is_recent(c)).collect();
        let after_recent = fresh.len();

        let unique = dedupe_batch(fresh);
        let after_dedupe = unique.len();

        let mut signals: Vec<TradingSignal> = unique.into_iter().map(score_candidate).collect();
        rank(&mut signals);
        signals.truncate(self.config.max_signals_per_scan);

        info!(
            candidates = total,
            after_threshold,
            after_recent,
            after_dedupe,
            emitted = signals.len(),
            "Risk evaluation complete"
        );
        signals
    }

    /// Score and metric threshold checks. A missing metric never fails a
    /// threshold; only an explicit below-threshold value does.
    pub fn passes_thresholds(&self, candidate: &Candidate) -> bool {
        let cfg = &self.config;
        if candidate.score < cfg.min_score {
            debug!(token = %candidate.token, score = candidate.score, "Below min score");
            return false;
        }

        let below = |threshold: Option<f64>, metric: Metric, abs: bool| {
            match (threshold, candidate.metrics.get(metric)) {
                (Some(min), Some(value)) => {
                    let value = if abs { value.abs() } else { value };
                    value < min
                }
                _ => false,
            }
        };

        if below(cfg.min_smart_money_buyers, Metric::Buyers, false)
            || below(cfg.min_netflow_usd, Metric::Netflow24h, true)
            || below(cfg.min_fresh_wallets, Metric::FreshWallets, false)
        {
            debug!(token = %candidate.token, "Below metric threshold");
            return false;
        }
        true
    }
}

/// Keep the highest-scoring candidate per chain+token, whatever the mode.
/// First seen wins ties. Output preserves first-seen key order.
pub fn dedupe_batch(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, Candidate> = HashMap::new();

    for candidate in candidates {
        let key = candidate.token_key();
        match best.get(&key) {
            Some(existing) if existing.score >= candidate.score => {}
            Some(_) => {
                best.insert(key, candidate);
            }
            None => {
                order.push(key.clone());
                best.insert(key, candidate);
            }
        }
    }

    order.into_iter().filter_map(|k| best.remove(&k)).collect()
}

/// Attach the risk assessment to a candidate.
///
/// The signal's `logged_at` is provisional (the candidate's production time)
/// until the store returns the persisted record.
pub fn score_candidate(candidate: Candidate) -> TradingSignal {
    let assessment = RiskAssessment::assess(&candidate);
    let logged_at = candidate.produced_at;
    TradingSignal {
        signal: Signal::from_candidate(candidate, logged_at),
        risk_score: assessment.risk_score,
        risk_factors: assessment.risk_factors,
        recommendation: assessment.recommendation,
        confidence: assessment.confidence,
        suggested_action: assessment.suggested_action,
        analysis: None,
    }
}

/// Risk score descending, then raw score descending.
pub fn rank(signals: &mut [TradingSignal]) {
    signals.sort_by(|a, b| {
        b.risk_score.cmp(&a.risk_score).then_with(|| {
            b.candidate()
                .score
                .partial_cmp(&a.candidate().score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
