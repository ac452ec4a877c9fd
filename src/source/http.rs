//! HTTP candidate source over the blockchain-analytics REST API.
//!
//! Every endpoint is a POST with a JSON body and the API key in the
//! `apiKey` header. Responses wrap their rows in a `data` array; rows are
//! parsed leniently (every field optional) and converted into candidates
//! with a per-mode opportunity score.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::source::CandidateSource;
use crate::types::{Candidate, Metric, Metrics, ScanMode};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const USER_AGENT: &str = "SMARTFLOW/0.1.0";
const SMART_MONEY_PATH: &str = "/smart-money/netflow";
const SCREENER_PATH: &str = "/token-screener";
const DEX_TRADES_PATH: &str = "/smart-money/dex-trades";
const TOKEN_INFO_PATH: &str = "/tgm/token-information";

/// DEX trades are aggregated per token, so fetch more rows than candidates.
const DEX_TRADES_ROW_FACTOR: usize = 5;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NetflowRow {
    pub token_address: String,
    pub token_symbol: String,
    pub chain: Option<String>,
    pub net_flow_24h_usd: Option<f64>,
    pub net_flow_7d_usd: Option<f64>,
    pub trader_count: Option<f64>,
    pub market_cap_usd: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ScreenerRow {
    pub token_address: String,
    pub token_symbol: String,
    pub chain: Option<String>,
    pub buy_volume: Option<f64>,
    pub sell_volume: Option<f64>,
    pub volume: Option<f64>,
    pub netflow: Option<f64>,
    pub nof_buyers: Option<f64>,
    pub nof_sellers: Option<f64>,
    pub price_change: Option<f64>,
    pub liquidity: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub fresh_wallets: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DexTradeRow {
    pub chain: Option<String>,
    pub token_bought_address: String,
    pub token_bought_symbol: String,
    pub trade_value_usd: Option<f64>,
    pub trader_address: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AnalyticsClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl AnalyticsClient {
    pub fn new(base_url: &str, api_key: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build analytics HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Build from config, resolving the API key immediately.
    pub fn from_config(cfg: &ApiConfig) -> Result<Self> {
        let api_key = cfg.api_key()?;
        Self::new(&cfg.base_url, api_key, cfg.timeout())
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "POST analytics API");

        let resp = self
            .http
            .post(&url)
            .header("apiKey", self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .with_context(|| format!("Analytics API request failed: {path}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Analytics API error {status} on {path}: {body}");
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse analytics response: {path}"))
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<Vec<T>> {
        let envelope: DataEnvelope<T> = self.post(path, body).await?;
        Ok(envelope.data)
    }
}

fn list_body(chain: &str, per_page: usize) -> Value {
    json!({
        "chains": [chain],
        "pagination": { "page": 1, "per_page": per_page },
    })
}

#[async_trait]
impl CandidateSource for AnalyticsClient {
    async fn fetch_candidates(
        &self,
        chain: &str,
        mode: ScanMode,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let now = Utc::now();
        let mut candidates = match mode {
            ScanMode::SmartMoney => {
                let rows: Vec<NetflowRow> =
                    self.fetch_rows(SMART_MONEY_PATH, &list_body(chain, limit)).await?;
                rows.iter()
                    .filter_map(|r| convert_netflow(r, chain, now))
                    .collect::<Vec<_>>()
            }
            ScanMode::Screener => {
                let rows: Vec<ScreenerRow> =
                    self.fetch_rows(SCREENER_PATH, &list_body(chain, limit)).await?;
                rows.iter()
                    .filter_map(|r| convert_screener(r, chain, now))
                    .collect()
            }
            ScanMode::Flows => {
                let rows: Vec<ScreenerRow> =
                    self.fetch_rows(SCREENER_PATH, &list_body(chain, limit)).await?;
                rows.iter()
                    .filter_map(|r| convert_flow(r, chain, now))
                    .collect()
            }
            ScanMode::DexTrades => {
                let per_page = limit.saturating_mul(DEX_TRADES_ROW_FACTOR);
                let rows: Vec<DexTradeRow> =
                    self.fetch_rows(DEX_TRADES_PATH, &list_body(chain, per_page)).await?;
                aggregate_dex_trades(&rows, chain, now)
            }
        };

        candidates.truncate(limit);
        info!(chain, mode = %mode, count = candidates.len(), "Fetched candidates");
        Ok(candidates)
    }

    async fn analyze_token(&self, chain: &str, token: &str) -> Result<Value> {
        let body = json!({
            "chain": chain,
            "token_address": token,
            "timeframe": "1d",
        });
        self.post(TOKEN_INFO_PATH, &body).await
    }

    fn name(&self) -> &'static str {
        "analytics"
    }
}

// ---------------------------------------------------------------------------
// Row conversion and opportunity scoring
// ---------------------------------------------------------------------------

/// Orders of magnitude above $1k; 0 at or below $1k.
fn usd_magnitude(usd: f64) -> f64 {
    (usd.max(1.0).log10() - 3.0).max(0.0)
}

fn row_chain(row_chain: &Option<String>, requested: &str) -> String {
    row_chain
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or(requested)
        .to_string()
}

fn symbol_or_address(symbol: &str, address: &str) -> String {
    if symbol.is_empty() {
        address.to_string()
    } else {
        symbol.to_string()
    }
}

/// Smart-money netflow: only net inflows are opportunities.
pub fn convert_netflow(row: &NetflowRow, chain: &str, now: DateTime<Utc>) -> Option<Candidate> {
    let flow = row.net_flow_24h_usd?;
    if row.token_address.is_empty() || flow <= 0.0 {
        return None;
    }
    let traders = row.trader_count.unwrap_or(0.0);
    let score = usd_magnitude(flow) + traders.max(0.0).sqrt() * 0.5;

    let mut metrics = Metrics::new().with(Metric::Netflow24h, flow);
    metrics.set_opt(Metric::Netflow7d, row.net_flow_7d_usd);
    metrics.set_opt(Metric::TraderCount, row.trader_count);
    metrics.set_opt(Metric::MarketCap, row.market_cap_usd);

    Some(Candidate {
        mode: ScanMode::SmartMoney,
        token: row.token_address.clone(),
        symbol: symbol_or_address(&row.token_symbol, &row.token_address),
        chain: row_chain(&row.chain, chain),
        score,
        reason: format!(
            "Smart money net inflow ${:.0} (24h) from {:.0} traders",
            flow, traders
        ),
        metrics,
        produced_at: now,
    })
}

fn screener_metrics(row: &ScreenerRow) -> Metrics {
    let mut metrics = Metrics::new();
    metrics.set_opt(Metric::Buyers, row.nof_buyers);
    metrics.set_opt(Metric::Sellers, row.nof_sellers);
    metrics.set_opt(Metric::Netflow24h, row.netflow);
    metrics.set_opt(Metric::Volume24h, row.volume);
    metrics.set_opt(Metric::BuyVolume, row.buy_volume);
    metrics.set_opt(Metric::SellVolume, row.sell_volume);
    metrics.set_opt(Metric::Liquidity, row.liquidity);
    metrics.set_opt(Metric::MarketCap, row.market_cap_usd);
    metrics.set_opt(Metric::PriceChange24h, row.price_change);
    metrics.set_opt(Metric::FreshWallets, row.fresh_wallets);
    metrics
}

/// Screener: buyer pressure, buy-side volume share and price momentum.
pub fn convert_screener(row: &ScreenerRow, chain: &str, now: DateTime<Utc>) -> Option<Candidate> {
    if row.token_address.is_empty() {
        return None;
    }
    let buyers = row.nof_buyers.unwrap_or(0.0);
    let sellers = row.nof_sellers.unwrap_or(0.0);
    let ratio = buyers / sellers.max(1.0);

    let buy_volume = row.buy_volume.unwrap_or(0.0);
    let sell_volume = row.sell_volume.unwrap_or(0.0);
    let total = buy_volume + sell_volume;
    let buy_share = if total > 0.0 { buy_volume / total } else { 0.5 };

    let momentum = row.price_change.unwrap_or(0.0).clamp(-1.0, 1.0);
    let score = ratio.min(5.0) + (buy_share - 0.5) * 4.0
        + momentum
        + usd_magnitude(row.volume.unwrap_or(total)) * 0.5;
    if score <= 0.0 {
        return None;
    }

    Some(Candidate {
        mode: ScanMode::Screener,
        token: row.token_address.clone(),
        symbol: symbol_or_address(&row.token_symbol, &row.token_address),
        chain: row_chain(&row.chain, chain),
        score,
        reason: format!(
            "{buyers:.0} buyers vs {sellers:.0} sellers, {:.0}% buy volume",
            buy_share * 100.0
        ),
        metrics: screener_metrics(row),
        produced_at: now,
    })
}

/// Token flows: 24h netflow across all holders, inflows only.
pub fn convert_flow(row: &ScreenerRow, chain: &str, now: DateTime<Utc>) -> Option<Candidate> {
    let flow = row.netflow?;
    if row.token_address.is_empty() || flow <= 0.0 {
        return None;
    }
    let score = usd_magnitude(flow) * 1.5 + row.fresh_wallets.unwrap_or(0.0).max(0.0).sqrt() * 0.25;

    Some(Candidate {
        mode: ScanMode::Flows,
        token: row.token_address.clone(),
        symbol: symbol_or_address(&row.token_symbol, &row.token_address),
        chain: row_chain(&row.chain, chain),
        score,
        reason: format!("Net inflow ${flow:.0} (24h)"),
        metrics: screener_metrics(row),
        produced_at: now,
    })
}

#[derive(Default)]
struct TradeAggregate<'a> {
    symbol: &'a str,
    chain: Option<&'a String>,
    volume: f64,
    trades: usize,
    buyers: Vec<&'a str>,
}

/// Smart-money DEX buys grouped per bought token, in first-seen order.
/// Score rewards distinct buyers over repeated buys by one wallet.
pub fn aggregate_dex_trades(
    rows: &[DexTradeRow],
    chain: &str,
    now: DateTime<Utc>,
) -> Vec<Candidate> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_token: HashMap<&str, TradeAggregate> = HashMap::new();

    for row in rows {
        let token = row.token_bought_address.as_str();
        if token.is_empty() {
            continue;
        }
        let agg = by_token.entry(token).or_insert_with(|| {
            order.push(token);
            TradeAggregate::default()
        });
        if agg.symbol.is_empty() {
            agg.symbol = &row.token_bought_symbol;
        }
        if agg.chain.is_none() {
            agg.chain = row.chain.as_ref();
        }
        agg.volume += row.trade_value_usd.unwrap_or(0.0).max(0.0);
        agg.trades += 1;
        if !row.trader_address.is_empty() && !agg.buyers.contains(&row.trader_address.as_str()) {
            agg.buyers.push(&row.trader_address);
        }
    }

    order
        .into_iter()
        .filter_map(|token| {
            let agg = by_token.get(token)?;
            let buyers = agg.buyers.len() as f64;
            let score = buyers + usd_magnitude(agg.volume);
            let chain_name = agg.chain.cloned();
            Some(Candidate {
                mode: ScanMode::DexTrades,
                token: token.to_string(),
                symbol: symbol_or_address(agg.symbol, token),
                chain: row_chain(&chain_name, chain),
                score,
                reason: format!(
                    "{buyers:.0} smart wallets bought ${:.0} over {} trades",
                    agg.volume, agg.trades
                ),
                metrics: Metrics::new()
                    .with(Metric::Buyers, buyers)
                    .with(Metric::Volume24h, agg.volume)
                    .with(Metric::BuyVolume, agg.volume),
                produced_at: now,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn netflow_row(flow: Option<f64>) -> NetflowRow {
        NetflowRow {
            token_address: "0xaaa".into(),
            token_symbol: "AAA".into(),
            chain: None,
            net_flow_24h_usd: flow,
            net_flow_7d_usd: Some(400_000.0),
            trader_count: Some(16.0),
            market_cap_usd: None,
        }
    }

    #[test]
    fn test_netflow_conversion() {
        let now = Utc::now();
        let c = convert_netflow(&netflow_row(Some(100_000.0)), "ethereum", now).unwrap();
        assert_eq!(c.mode, ScanMode::SmartMoney);
        assert_eq!(c.chain, "ethereum");
        assert_eq!(c.symbol, "AAA");
        // 2 orders above $1k + sqrt(16) * 0.5
        assert!((c.score - 4.0).abs() < 1e-9);
        assert_eq!(c.metrics.get(Metric::Netflow24h), Some(100_000.0));
        assert_eq!(c.metrics.get(Metric::TraderCount), Some(16.0));
        assert_eq!(c.metrics.get(Metric::MarketCap), None);
        assert_eq!(c.produced_at, now);
    }

    #[test]
    fn test_netflow_skips_outflows_and_missing() {
        let now = Utc::now();
        assert!(convert_netflow(&netflow_row(Some(-5.0)), "ethereum", now).is_none());
        assert!(convert_netflow(&netflow_row(None), "ethereum", now).is_none());
    }

    #[test]
    fn test_screener_conversion_carries_metrics() {
        let row = ScreenerRow {
            token_address: "0xbbb".into(),
            token_symbol: String::new(),
            chain: Some("base".into()),
            buy_volume: Some(75_000.0),
            sell_volume: Some(25_000.0),
            volume: Some(100_000.0),
            nof_buyers: Some(30.0),
            nof_sellers: Some(10.0),
            price_change: Some(0.2),
            ..Default::default()
        };
        let c = convert_screener(&row, "ethereum", Utc::now()).unwrap();
        assert_eq!(c.chain, "base");
        assert_eq!(c.symbol, "0xbbb");
        assert_eq!(c.metrics.get(Metric::Buyers), Some(30.0));
        assert_eq!(c.metrics.get(Metric::Sellers), Some(10.0));
        // ratio 3 + share 1.0 + momentum 0.2 + volume 1.0
        assert!((c.score - 5.2).abs() < 1e-9);
        assert!(c.reason.contains("75% buy volume"));
    }

    #[test]
    fn test_screener_drops_sell_pressure() {
        let row = ScreenerRow {
            token_address: "0xccc".into(),
            buy_volume: Some(0.0),
            sell_volume: Some(10_000.0),
            nof_buyers: Some(0.0),
            nof_sellers: Some(50.0),
            price_change: Some(-0.4),
            ..Default::default()
        };
        assert!(convert_screener(&row, "ethereum", Utc::now()).is_none());
    }

    #[test]
    fn test_flow_conversion() {
        let row = ScreenerRow {
            token_address: "0xddd".into(),
            token_symbol: "DDD".into(),
            netflow: Some(1_000_000.0),
            ..Default::default()
        };
        let c = convert_flow(&row, "solana", Utc::now()).unwrap();
        assert_eq!(c.mode, ScanMode::Flows);
        assert!((c.score - 4.5).abs() < 1e-9);

        let outflow = ScreenerRow { netflow: Some(-1.0), ..row };
        assert!(convert_flow(&outflow, "solana", Utc::now()).is_none());
    }

    #[test]
    fn test_dex_trades_aggregate_per_token() {
        let trade = |token: &str, trader: &str, usd: f64| DexTradeRow {
            chain: None,
            token_bought_address: token.into(),
            token_bought_symbol: token.to_uppercase(),
            trade_value_usd: Some(usd),
            trader_address: trader.into(),
        };
        let rows = vec![
            trade("0xe", "w1", 5_000.0),
            trade("0xf", "w1", 500.0),
            trade("0xe", "w2", 3_000.0),
            trade("0xe", "w1", 2_000.0),
            trade("", "w3", 1.0),
        ];
        let out = aggregate_dex_trades(&rows, "base", Utc::now());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].token, "0xe");
        assert_eq!(out[0].metrics.get(Metric::Buyers), Some(2.0));
        assert_eq!(out[0].metrics.get(Metric::Volume24h), Some(10_000.0));
        assert!((out[0].score - 3.0).abs() < 1e-9);
        assert!(out[0].reason.contains("3 trades"));
        assert_eq!(out[1].token, "0xf");
        assert!((out[1].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_envelope_is_lenient() {
        let parsed: DataEnvelope<NetflowRow> = serde_json::from_str(
            r#"{"data":[{"token_address":"0x1","unexpected":true}],"pagination":{}}"#,
        )
        .unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].token_address, "0x1");
        assert!(parsed.data[0].net_flow_24h_usd.is_none());

        let empty: DataEnvelope<NetflowRow> = serde_json::from_str("{}").unwrap();
        assert!(empty.data.is_empty());
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = AnalyticsClient::new(
            "https://api.example.com/v1/",
            SecretString::new("k".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://api.example.com/v1");
        assert_eq!(client.name(), "analytics");
    }
}
