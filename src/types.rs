//! Shared types for the SMARTFLOW signal pipeline.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the source, risk, store,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Scan modes
// ---------------------------------------------------------------------------

/// Which opportunity feed a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMode {
    /// Tokens with the largest smart-money netflow.
    SmartMoney,
    /// Token screener (volume, buyers/sellers, price action).
    Screener,
    /// Token flow ranking by 24h netflow across all holders.
    Flows,
    /// Recent smart-money DEX buys aggregated per token.
    DexTrades,
}

impl ScanMode {
    /// All known modes (useful for iteration).
    pub const ALL: &'static [ScanMode] = &[
        ScanMode::SmartMoney,
        ScanMode::Screener,
        ScanMode::Flows,
        ScanMode::DexTrades,
    ];

    /// Stable identifier used in ids, cache keys and config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::SmartMoney => "smart-money",
            ScanMode::Screener => "screener",
            ScanMode::Flows => "flows",
            ScanMode::DexTrades => "dex-trades",
        }
    }

    /// Cache staleness class of the data this mode fetches.
    pub fn data_kind(&self) -> DataKind {
        match self {
            ScanMode::SmartMoney => DataKind::SmartMoney,
            ScanMode::Screener | ScanMode::Flows => DataKind::TokenScreen,
            ScanMode::DexTrades => DataKind::DexTrades,
        }
    }

    /// API credits one fetch in this mode costs.
    pub fn credits(&self) -> u32 {
        match self {
            ScanMode::SmartMoney => 5,
            ScanMode::Screener | ScanMode::Flows => 1,
            ScanMode::DexTrades => 5,
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ScanMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "smart-money" | "smartmoney" | "sm" => Ok(ScanMode::SmartMoney),
            "screener" | "screen" => Ok(ScanMode::Screener),
            "flows" | "flow" | "netflow" => Ok(ScanMode::Flows),
            "dex-trades" | "dex" | "trades" => Ok(ScanMode::DexTrades),
            _ => Err(anyhow::anyhow!("Unknown scan mode: {s}")),
        }
    }
}

/// Staleness classes for cached vendor data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    SmartMoney,
    TokenScreen,
    DexTrades,
    Profile,
    Analysis,
    Search,
}

impl DataKind {
    /// How long data of this kind may be served from cache.
    pub fn ttl(&self) -> std::time::Duration {
        let secs = match self {
            DataKind::SmartMoney => 60,
            DataKind::TokenScreen => 300,
            DataKind::DexTrades => 30,
            DataKind::Profile => 900,
            DataKind::Analysis => 600,
            DataKind::Search => 1800,
        };
        std::time::Duration::from_secs(secs)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Closed set of on-chain metrics a candidate may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    Buyers,
    Sellers,
    #[serde(rename = "netflow24h")]
    Netflow24h,
    #[serde(rename = "netflow7d")]
    Netflow7d,
    FreshWallets,
    #[serde(rename = "volume24h")]
    Volume24h,
    BuyVolume,
    SellVolume,
    Liquidity,
    MarketCap,
    #[serde(rename = "priceChange24h")]
    PriceChange24h,
    TraderCount,
}

/// Reported metric values. A missing key means the source did not report it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<Metric, f64>);

impl Metrics {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.set(metric, value);
        self
    }

    /// Insert a value; non-finite values are ignored.
    pub fn set(&mut self, metric: Metric, value: f64) {
        if value.is_finite() {
            self.0.insert(metric, value);
        }
    }

    /// Insert only when the source reported a value.
    pub fn set_opt(&mut self, metric: Metric, value: Option<f64>) {
        if let Some(v) = value {
            self.set(metric, v);
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.0.get(&metric).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Metric, f64)> for Metrics {
    fn from_iter<I: IntoIterator<Item = (Metric, f64)>>(iter: I) -> Self {
        let mut metrics = Metrics::new();
        for (m, v) in iter {
            metrics.set(m, v);
        }
        metrics
    }
}

// ---------------------------------------------------------------------------
// Candidate & Signal
// ---------------------------------------------------------------------------

/// An unfiltered, unscored opportunity from one (chain, mode) fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub mode: ScanMode,
    /// Token contract address (or mint).
    pub token: String,
    pub symbol: String,
    pub chain: String,
    /// Source-specific opportunity score (higher = more interesting).
    pub score: f64,
    pub reason: String,
    #[serde(default)]
    pub metrics: Metrics,
    pub produced_at: DateTime<Utc>,
}

impl Candidate {
    /// Deterministic signal id: `chain:token:mode:produced_at`.
    pub fn signal_id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.chain,
            self.token,
            self.mode,
            self.produced_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }

    /// Key used for recency dedup (chain + token + mode).
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}:{}", self.chain, self.token, self.mode)
    }

    /// Key used for intra-batch dedup (chain + token, any mode).
    pub fn token_key(&self) -> String {
        format!("{}:{}", self.chain, self.token)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {} score={:.2} ({})",
            self.chain, self.mode, self.symbol, self.score, self.reason
        )
    }
}

/// A persisted, identity-stable record of a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    #[serde(flatten)]
    pub candidate: Candidate,
    pub logged_at: DateTime<Utc>,
    #[serde(default)]
    pub acted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl Signal {
    /// Wrap a candidate as a fresh, un-acted signal.
    pub fn from_candidate(candidate: Candidate, logged_at: DateTime<Utc>) -> Self {
        Self {
            id: candidate.signal_id(),
            candidate,
            logged_at,
            acted: false,
            outcome: None,
        }
    }

    /// Recency key (chain + token + mode).
    pub fn dedupe_key(&self) -> String {
        self.candidate.dedupe_key()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What was done with a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Skip,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Skip => write!(f, "SKIP"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(Action::Buy),
            "sell" => Ok(Action::Sell),
            "skip" | "pass" => Ok(Action::Skip),
            _ => Err(anyhow::anyhow!("Unknown action: {s}")),
        }
    }
}

/// Result of acting (or not) on a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl_percent: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Outcome {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            executed_at: None,
            entry_price: None,
            exit_price: None,
            pnl: None,
            pnl_percent: None,
            notes: None,
        }
    }

    /// Whether the realised P&L is positive.
    pub fn is_profitable(&self) -> bool {
        self.pnl.map(|p| p > Decimal::ZERO).unwrap_or(false)
    }
}

/// Partial outcome fields to merge into a signal's outcome.
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeUpdate {
    pub action: Option<Action>,
    pub executed_at: Option<DateTime<Utc>>,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Trading signals (risk-annotated view)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Watch,
    Avoid,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::StrongBuy => write!(f, "STRONG BUY"),
            Recommendation::Buy => write!(f, "BUY"),
            Recommendation::Watch => write!(f, "WATCH"),
            Recommendation::Avoid => write!(f, "AVOID"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSize {
    Small,
    Medium,
    Large,
}

/// Concrete next step synthesised for buy-side recommendations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedAction {
    pub action: Action,
    pub urgency: Urgency,
    pub reasoning: String,
    pub target_chain: String,
    pub target_token: String,
    pub position_size_hint: PositionSize,
}

/// Outcome of the optional deep-analysis lookup for a top signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum Analysis {
    Ok { data: serde_json::Value },
    Error { message: String },
}

/// A signal annotated with a computed risk assessment. Never persisted as such.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingSignal {
    #[serde(flatten)]
    pub signal: Signal,
    pub risk_score: i32,
    pub risk_factors: Vec<String>,
    pub recommendation: Recommendation,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<SuggestedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
}

impl TradingSignal {
    pub fn candidate(&self) -> &Candidate {
        &self.signal.candidate
    }
}

impl fmt::Display for TradingSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.signal.candidate;
        write!(
            f,
            "{} {} on {} via {} | risk {} | conf {:.0}% | score {:.2}",
            self.recommendation,
            c.symbol,
            c.chain,
            c.mode,
            self.risk_score,
            self.confidence * 100.0,
            c.score,
        )?;
        if !self.risk_factors.is_empty() {
            write!(f, " | {}", self.risk_factors.join(", "))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SMARTFLOW.
#[derive(Debug, thiserror::Error)]
pub enum SmartflowError {
    #[error("Source error ({source_name}): {message}")]
    Source { source_name: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
