//! Rule-based risk scoring.
//!
//! Each rule contributes an independent signed amount to an integer risk
//! score; the total maps to a recommendation and a fixed confidence.

use crate::types::{
    Action, Candidate, Metric, PositionSize, Recommendation, SuggestedAction, Urgency,
};

/// Netflow (USD, 24h) above which a token gets the "High netflow" bonus.
pub const HIGH_NETFLOW_USD: f64 = 100_000.0;

pub const FACTOR_STRONG_RATIO: &str = "Strong buyer/seller ratio";
pub const FACTOR_HIGH_NETFLOW: &str = "High netflow";
pub const FACTOR_MORE_SELLERS: &str = "More sellers than buyers";

/// Used when a buy-side recommendation fired on score alone.
const FALLBACK_REASONING: &str = "Opportunity score above threshold";

/// Result of scoring a single candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub risk_score: i32,
    pub risk_factors: Vec<String>,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub suggested_action: Option<SuggestedAction>,
}

impl RiskAssessment {
    pub fn assess(candidate: &Candidate) -> Self {
        let mut risk_score = 0i32;
        let mut risk_factors = Vec::new();

        if candidate.score > 5.0 {
            risk_score += 2;
        } else if candidate.score > 3.0 {
            risk_score += 1;
        }

        let buyers = candidate.metrics.get(Metric::Buyers);
        let sellers = candidate.metrics.get(Metric::Sellers);
        if let (Some(buyers), Some(sellers)) = (buyers, sellers) {
            if buyers > 2.0 * sellers {
                risk_score += 1;
                risk_factors.push(FACTOR_STRONG_RATIO.to_string());
            }
        }

        if candidate
            .metrics
            .get(Metric::Netflow24h)
            .is_some_and(|flow| flow > HIGH_NETFLOW_USD)
        {
            risk_score += 1;
            risk_factors.push(FACTOR_HIGH_NETFLOW.to_string());
        }

        if let (Some(buyers), Some(sellers)) = (buyers, sellers) {
            if sellers > buyers {
                risk_score -= 1;
                risk_factors.push(FACTOR_MORE_SELLERS.to_string());
            }
        }

        let (recommendation, confidence) = recommend(risk_score);
        let suggested_action = suggest_action(candidate, recommendation, &risk_factors);

        Self {
            risk_score,
            risk_factors,
            recommendation,
            confidence,
            suggested_action,
        }
    }
}

/// Map a risk score to a recommendation and confidence.
pub fn recommend(risk_score: i32) -> (Recommendation, f64) {
    match risk_score {
        s if s >= 3 => (Recommendation::StrongBuy, 0.8),
        s if s >= 1 => (Recommendation::Buy, 0.6),
        s if s >= 0 => (Recommendation::Watch, 0.4),
        _ => (Recommendation::Avoid, 0.3),
    }
}

/// Buy-side recommendations get a concrete action; others get none.
fn suggest_action(
    candidate: &Candidate,
    recommendation: Recommendation,
    risk_factors: &[String],
) -> Option<SuggestedAction> {
    let strong = match recommendation {
        Recommendation::StrongBuy => true,
        Recommendation::Buy => false,
        Recommendation::Watch | Recommendation::Avoid => return None,
    };

    let reasoning = if risk_factors.is_empty() {
        FALLBACK_REASONING.to_string()
    } else {
        risk_factors.join(", ")
    };

    Some(SuggestedAction {
        action: Action::Buy,
        urgency: if strong { Urgency::High } else { Urgency::Medium },
        reasoning,
        target_chain: candidate.chain.clone(),
        target_token: candidate.token.clone(),
        position_size_hint: if strong { PositionSize::Medium } else { PositionSize::Small },
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
