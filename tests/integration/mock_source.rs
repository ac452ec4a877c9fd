//! Mock candidate source for integration testing.
//!
//! Provides a deterministic `CandidateSource` that serves fixed candidates
//! per chain, can be told to fail for specific chains, and counts calls.
//! All in-memory with no external dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use smartflow::source::CandidateSource;
use smartflow::types::{Candidate, Metric, Metrics, ScanMode};

/// A mock analytics source for deterministic testing.
pub struct MockSource {
    candidates: HashMap<String, Vec<Candidate>>,
    failing_chains: Arc<Mutex<HashSet<String>>>,
    fetch_calls: Arc<Mutex<usize>>,
    analysis_calls: Arc<Mutex<usize>>,
}

impl MockSource {
    /// Default candidates on ethereum, base and solana.
    pub fn new() -> Self {
        Self::with_candidates(Self::default_candidates())
    }

    pub fn with_candidates(candidates: Vec<Candidate>) -> Self {
        let mut by_chain: HashMap<String, Vec<Candidate>> = HashMap::new();
        for c in candidates {
            by_chain.entry(c.chain.clone()).or_default().push(c);
        }
        Self {
            candidates: by_chain,
            failing_chains: Arc::new(Mutex::new(HashSet::new())),
            fetch_calls: Arc::new(Mutex::new(0)),
            analysis_calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Make every fetch for `chain` fail.
    pub fn fail_chain(&self, chain: &str) {
        self.failing_chains.lock().unwrap().insert(chain.to_string());
    }

    pub fn fetch_calls(&self) -> usize {
        *self.fetch_calls.lock().unwrap()
    }

    pub fn analysis_calls(&self) -> usize {
        *self.analysis_calls.lock().unwrap()
    }

    pub fn candidate(
        chain: &str,
        token: &str,
        mode: ScanMode,
        score: f64,
        metrics: Metrics,
    ) -> Candidate {
        Candidate {
            mode,
            token: token.to_string(),
            symbol: token.trim_start_matches("0x").to_uppercase(),
            chain: chain.to_string(),
            score,
            reason: format!("mock {mode} candidate"),
            metrics,
            produced_at: Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    /// A spread of candidates with known risk outcomes.
    fn default_candidates() -> Vec<Candidate> {
        vec![
            // riskScore 4: score > 5, strong ratio, high netflow
            Self::candidate(
                "ethereum",
                "0xaaa",
                ScanMode::SmartMoney,
                6.0,
                Metrics::new()
                    .with(Metric::Buyers, 10.0)
                    .with(Metric::Sellers, 2.0)
                    .with(Metric::Netflow24h, 150_000.0),
            ),
            // Same token via the screener with a lower score: deduped away
            Self::candidate(
                "ethereum",
                "0xaaa",
                ScanMode::Screener,
                3.5,
                Metrics::new().with(Metric::Buyers, 10.0),
            ),
            // riskScore 1: score > 3 only
            Self::candidate("base", "0xbbb", ScanMode::SmartMoney, 4.0, Metrics::new()),
            // riskScore -1: more sellers than buyers
            Self::candidate(
                "base",
                "0xccc",
                ScanMode::Screener,
                2.5,
                Metrics::new()
                    .with(Metric::Buyers, 3.0)
                    .with(Metric::Sellers, 9.0),
            ),
            // Below min score: filtered
            Self::candidate("solana", "0xddd", ScanMode::SmartMoney, 1.9, Metrics::new()),
            // Exactly at min score: kept, riskScore 0
            Self::candidate("solana", "0xeee", ScanMode::SmartMoney, 2.0, Metrics::new()),
        ]
    }
}

#[async_trait]
impl CandidateSource for MockSource {
    async fn fetch_candidates(
        &self,
        chain: &str,
        mode: ScanMode,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        *self.fetch_calls.lock().unwrap() += 1;
        if self.failing_chains.lock().unwrap().contains(chain) {
            return Err(anyhow!("HTTP 502 Bad Gateway for {chain}"));
        }
        Ok(self
            .candidates
            .get(chain)
            .map(|list| {
                list.iter()
                    .filter(|c| c.mode == mode)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn analyze_token(&self, chain: &str, token: &str) -> Result<Value> {
        *self.analysis_calls.lock().unwrap() += 1;
        Ok(json!({ "chain": chain, "token": token, "holders": 1200 }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
