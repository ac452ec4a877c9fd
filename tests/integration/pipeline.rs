//! Full scan pipeline: source → cache → risk → store.

use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use smartflow::cache::Cache;
use smartflow::engine::{ScanOrchestrator, ScanRequest};
use smartflow::limiter::{RateLimitConfig, RateLimiter};
use smartflow::risk::{RiskConfig, RiskEngine};
use smartflow::storage::{SignalFilter, SignalStore};
use smartflow::types::{Action, Analysis, OutcomeUpdate, Recommendation, ScanMode};

use crate::mock_source::MockSource;

fn temp_path() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("smartflow_it_signals_{}.json", uuid::Uuid::new_v4()));
    p
}

fn build(source: Arc<MockSource>, risk: RiskConfig, path: &PathBuf) -> ScanOrchestrator {
    let limiter = RateLimiter::new(RateLimitConfig {
        max_tokens: 100.0,
        refill_rate: 50.0,
        min_delay: Duration::ZERO,
    });
    ScanOrchestrator::new(
        source,
        Arc::new(Cache::new()),
        Arc::new(limiter),
        Arc::new(SignalStore::open(Some(path))),
        RiskEngine::new(risk),
    )
}

fn request(analyze: bool) -> ScanRequest {
    ScanRequest {
        chains: vec!["ethereum".into(), "base".into(), "solana".into()],
        modes: vec![ScanMode::SmartMoney, ScanMode::Screener],
        limit: 20,
        analyze,
    }
}

fn tokens(report: &smartflow::engine::ScanReport) -> Vec<&str> {
    report
        .signals
        .iter()
        .map(|s| s.candidate().token.as_str())
        .collect()
}

#[tokio::test]
async fn test_full_scan_ranks_and_persists() {
    let source = Arc::new(MockSource::new());
    let path = temp_path();
    let orch = build(source.clone(), RiskConfig::default(), &path);

    let report = orch.scan(&request(false)).await.unwrap();

    assert_eq!(source.fetch_calls(), 6);
    assert_eq!(report.candidates_fetched, 6);
    assert!(report.failures.is_empty());
    assert_eq!(tokens(&report), vec!["0xaaa", "0xbbb", "0xeee", "0xccc"]);

    let top = &report.signals[0];
    assert_eq!(top.risk_score, 4);
    assert_eq!(top.recommendation, Recommendation::StrongBuy);
    assert!((top.confidence - 0.8).abs() < 1e-10);
    assert_eq!(top.candidate().mode, ScanMode::SmartMoney);
    assert!(top.risk_factors.contains(&"Strong buyer/seller ratio".to_string()));
    assert!(top.risk_factors.contains(&"High netflow".to_string()));

    assert_eq!(report.signals[3].recommendation, Recommendation::Avoid);

    let reloaded = SignalStore::open(Some(&path));
    assert_eq!(reloaded.len(), 4);
    assert!(reloaded.get(&top.signal.id).is_some());
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_partial_outage_still_returns_signals() {
    let source = Arc::new(MockSource::new());
    source.fail_chain("base");
    let path = temp_path();
    let orch = build(source.clone(), RiskConfig::default(), &path);

    let report = orch.scan(&request(false)).await.unwrap();

    assert_eq!(tokens(&report), vec!["0xaaa", "0xeee"]);
    assert_eq!(report.failures.len(), 2);
    let by_chain = report.failures_by_chain();
    assert_eq!(by_chain.keys().copied().collect::<Vec<_>>(), vec!["base"]);
    assert!(report.failures[0].error.contains("502"));
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_repeat_scan_uses_cache_and_suppresses_repeats() {
    let source = Arc::new(MockSource::new());
    let path = temp_path();
    let orch = build(source.clone(), RiskConfig::default(), &path);

    let first = orch.scan(&request(false)).await.unwrap();
    assert_eq!(first.signals.len(), 4);

    // The screener 0xaaa lost intra-batch dedup to smart-money last time,
    // so it was never logged and now surfaces on its own.
    let second = orch.scan(&request(false)).await.unwrap();
    assert_eq!(source.fetch_calls(), 6);
    assert_eq!(second.signals.len(), 1);
    assert!(second.signals[0]
        .signal
        .id
        .starts_with("ethereum:0xaaa:screener:"));
    // Three chains, smart-money (5) + screener (1) each.
    assert_eq!(second.credits_saved, 18);
    assert_eq!(orch.cache().stats().hits, 6);
    assert_eq!(orch.store().len(), 5);

    let third = orch.scan(&request(false)).await.unwrap();
    assert!(third.signals.is_empty());
    assert_eq!(source.fetch_calls(), 6);
    assert_eq!(orch.store().len(), 5);
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_dedup_survives_restart() {
    let path = temp_path();
    {
        let orch = build(Arc::new(MockSource::new()), RiskConfig::default(), &path);
        assert_eq!(orch.scan(&request(false)).await.unwrap().signals.len(), 4);
    }

    // Fresh cache and source, same signal file.
    let source = Arc::new(MockSource::new());
    let orch = build(source.clone(), RiskConfig::default(), &path);
    let report = orch.scan(&request(false)).await.unwrap();
    assert_eq!(source.fetch_calls(), 6);
    let ids: Vec<&str> = report.signals.iter().map(|s| s.signal.id.as_str()).collect();
    assert_eq!(ids, vec!["ethereum:0xaaa:screener:2026-06-01T12:00:00.000Z"]);

    let again = orch.scan(&request(false)).await.unwrap();
    assert!(again.signals.is_empty());
    assert_eq!(SignalStore::open(Some(&path)).len(), 5);
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_analysis_attached_to_top_three() {
    let source = Arc::new(MockSource::new());
    let path = temp_path();
    let orch = build(source.clone(), RiskConfig::default(), &path);

    let report = orch.scan(&request(true)).await.unwrap();

    assert_eq!(source.analysis_calls(), 3);
    for signal in &report.signals[..3] {
        match &signal.analysis {
            Some(Analysis::Ok { data }) => assert_eq!(data["token"], signal.candidate().token),
            other => panic!("expected analysis, got {other:?}"),
        }
    }
    assert!(report.signals[3].analysis.is_none());
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_risk_config_limits_output() {
    let path = temp_path();
    let capped = RiskConfig {
        max_signals_per_scan: 2,
        ..RiskConfig::default()
    };
    let orch = build(Arc::new(MockSource::new()), capped, &path);
    let report = orch.scan(&request(false)).await.unwrap();
    assert_eq!(tokens(&report), vec!["0xaaa", "0xbbb"]);
    std::fs::remove_file(&path).ok();

    let path = temp_path();
    let strict = RiskConfig {
        min_score: 4.0,
        allowed_chains: Some(vec!["ethereum".into(), "solana".into()]),
        ..RiskConfig::default()
    };
    let orch = build(Arc::new(MockSource::new()), strict, &path);
    let report = orch.scan(&request(false)).await.unwrap();
    assert_eq!(report.chains, vec!["ethereum".to_string(), "solana".to_string()]);
    assert_eq!(tokens(&report), vec!["0xaaa"]);
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_outcome_lifecycle() {
    let path = temp_path();
    let orch = build(Arc::new(MockSource::new()), RiskConfig::default(), &path);
    let report = orch.scan(&request(false)).await.unwrap();
    let id = report.signals[0].signal.id.clone();
    let store = orch.store();

    let acted = store
        .mark_acted(&id, Action::Buy, Some("entered on signal".into()))
        .unwrap()
        .unwrap();
    assert!(acted.acted);

    let update = OutcomeUpdate {
        entry_price: Some(dec!(100)),
        exit_price: Some(dec!(150)),
        ..OutcomeUpdate::default()
    };
    let closed = store.record_outcome(&id, update).unwrap().unwrap();
    let outcome = closed.outcome.unwrap();
    assert_eq!(outcome.action, Action::Buy);
    assert_eq!(outcome.pnl, Some(dec!(50)));
    assert_eq!(outcome.pnl_percent, Some(dec!(50)));
    assert_eq!(outcome.notes.as_deref(), Some("entered on signal"));

    assert!(store.mark_acted("nope", Action::Sell, None).unwrap().is_none());
    assert!(store
        .record_outcome("nope", OutcomeUpdate::default())
        .unwrap()
        .is_none());

    let stats = store.get_stats(None);
    assert_eq!(stats.total, 4);
    assert_eq!(stats.acted, 1);
    assert_eq!(stats.profitable, 1);
    assert_eq!(stats.total_pnl, dec!(50));

    let acted_only = SignalFilter {
        acted: Some(true),
        ..SignalFilter::default()
    };
    assert_eq!(store.find(&acted_only).len(), 1);

    let reloaded = SignalStore::open(Some(&path));
    assert_eq!(reloaded.get(&id).unwrap().outcome.unwrap().pnl, Some(dec!(50)));
    std::fs::remove_file(&path).ok();
}
