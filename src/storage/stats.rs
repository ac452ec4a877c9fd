//! Aggregate statistics over logged signals.

use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::types::Signal;

/// Summary of a set of signals and their recorded outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalStats {
    pub total: usize,
    pub acted: usize,
    pub with_outcome: usize,
    /// Outcomes with a positive P&L.
    pub profitable: usize,
    /// Sum of P&L over outcomes that carry one.
    pub total_pnl: Decimal,
    pub avg_pnl: Option<Decimal>,
    pub total_pnl_percent: Decimal,
    pub avg_pnl_percent: Option<Decimal>,
    pub avg_score: f64,
    pub by_chain: BTreeMap<String, usize>,
    pub by_mode: BTreeMap<String, usize>,
}

impl SignalStats {
    pub fn from_signals<'a, I>(signals: I) -> Self
    where
        I: IntoIterator<Item = &'a Signal>,
    {
        let mut stats = SignalStats::default();
        let mut score_sum = 0.0;
        let mut pnl_count = 0u32;
        let mut pnl_percent_count = 0u32;

        for signal in signals {
            stats.total += 1;
            score_sum += signal.candidate.score;
            *stats.by_chain.entry(signal.candidate.chain.clone()).or_default() += 1;
            *stats
                .by_mode
                .entry(signal.candidate.mode.as_str().to_string())
                .or_default() += 1;

            if signal.acted {
                stats.acted += 1;
            }
            let Some(outcome) = &signal.outcome else {
                continue;
            };
            stats.with_outcome += 1;
            if outcome.is_profitable() {
                stats.profitable += 1;
            }
            if let Some(pnl) = outcome.pnl {
                stats.total_pnl += pnl;
                pnl_count += 1;
            }
            if let Some(pct) = outcome.pnl_percent {
                stats.total_pnl_percent += pct;
                pnl_percent_count += 1;
            }
        }

        if stats.total > 0 {
            stats.avg_score = score_sum / stats.total as f64;
        }
        if pnl_count > 0 {
            stats.avg_pnl = Some(stats.total_pnl / Decimal::from(pnl_count));
        }
        if pnl_percent_count > 0 {
            stats.avg_pnl_percent = Some(stats.total_pnl_percent / Decimal::from(pnl_percent_count));
        }
        stats
    }

    /// Profitable outcomes as a fraction of outcomes with a P&L.
    pub fn win_rate(&self) -> f64 {
        if self.with_outcome == 0 {
            0.0
        } else {
            self.profitable as f64 / self.with_outcome as f64
        }
    }
}

impl fmt::Display for SignalStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} signals | {} acted | {} with outcome | win rate {:.0}% | P&L {:.2}",
            self.total,
            self.acted,
            self.with_outcome,
            self.win_rate() * 100.0,
            self.total_pnl.to_f64().unwrap_or(0.0),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
