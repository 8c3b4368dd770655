mod rules;
mod weights;

pub use weights::ScoringWeights;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::ingest::domain::CustomerFeatureRecord;

/// Reason codes surfaced with every score, ranked by contribution.
pub mod reasons {
    pub const INACTIVE_OVER_90_DAYS: &str = "inactive_over_90_days";
    pub const INACTIVE_OVER_60_DAYS: &str = "inactive_over_60_days";
    pub const INACTIVE_OVER_30_DAYS: &str = "inactive_over_30_days";
    pub const NO_RECENT_LOGINS: &str = "no_recent_logins";
    pub const LOW_LOGIN_FREQUENCY: &str = "low_login_frequency";
    pub const DECLINING_LOGINS: &str = "declining_logins";
    pub const HEAVY_SUPPORT_BURDEN: &str = "heavy_support_burden";
    pub const ELEVATED_SUPPORT_VOLUME: &str = "elevated_support_volume";
    pub const MINIMAL_FEATURE_ADOPTION: &str = "minimal_feature_adoption";
    pub const NARROW_FEATURE_ADOPTION: &str = "narrow_feature_adoption";
    pub const FREE_PLAN: &str = "free_plan_risk";
    pub const BILLING_INSTABILITY: &str = "billing_instability";
    /// Zero rules triggered: the account looks healthy.
    pub const HEALTHY_ENGAGEMENT: &str = "healthy_engagement";
}

/// Coarse bucket derived from the churn score via fixed thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

/// Discrete rule contribution, kept for transparent audits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub reason: String,
    pub weight: f64,
}

/// Derived scoring state for one customer; immutable per computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub customer_id: String,
    pub churn_score: f64,
    pub risk_tier: RiskTier,
    /// Reason codes ordered by contribution, deduplicated.
    pub reasons: Vec<String>,
    pub components: Vec<ScoreComponent>,
    pub understanding_score: u8,
    pub maturity_flag: bool,
}

impl ScoredRecord {
    /// Field lookup for playbook conditions; unknown names yield `None`.
    pub fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "churn_score" => json!(self.churn_score),
            "risk_level" | "risk_tier" => json!(self.risk_tier.label()),
            "churn_reason" => json!(self.reasons.join("; ")),
            "top_reason" => json!(self.reasons.first().cloned().unwrap_or_default()),
            "understanding_score" => json!(self.understanding_score),
            "maturity_flag" => json!(self.maturity_flag),
            _ => return None,
        };
        Some(value)
    }

    pub fn action_recommended(&self) -> &'static str {
        match self.reasons.first().map(String::as_str) {
            Some(reasons::HEALTHY_ENGAGEMENT) | None => "maintain_current_engagement",
            Some(
                reasons::INACTIVE_OVER_90_DAYS
                | reasons::INACTIVE_OVER_60_DAYS
                | reasons::INACTIVE_OVER_30_DAYS,
            ) => "send_reactivation_campaign",
            Some(
                reasons::NO_RECENT_LOGINS
                | reasons::LOW_LOGIN_FREQUENCY
                | reasons::DECLINING_LOGINS,
            ) => "schedule_success_checkin",
            Some(reasons::HEAVY_SUPPORT_BURDEN | reasons::ELEVATED_SUPPORT_VOLUME) => {
                "escalate_to_support_review"
            }
            Some(reasons::MINIMAL_FEATURE_ADOPTION | reasons::NARROW_FEATURE_ADOPTION) => {
                "promote_unused_features"
            }
            Some(reasons::FREE_PLAN | reasons::BILLING_INSTABILITY) => "offer_billing_review",
            Some(_) => "monitor_account",
        }
    }

    pub fn view(&self) -> ScoringOutcomeView {
        ScoringOutcomeView {
            churn_score: self.churn_score,
            risk_level: self.risk_tier.label(),
            churn_reason: self.reasons.join("; "),
            understanding_score: self.understanding_score,
            action_recommended: self.action_recommended(),
        }
    }
}

/// Wire shape returned to ingestion callers and persisted as current state.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringOutcomeView {
    pub churn_score: f64,
    pub risk_level: &'static str,
    pub churn_reason: String,
    pub understanding_score: u8,
    pub action_recommended: &'static str,
}

/// Deterministic, side-effect-free churn scorer over the canonical table.
pub struct ScoringEngine {
    weights: ScoringWeights,
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, record: &CustomerFeatureRecord) -> ScoredRecord {
        let mut components = rules::evaluate_rules(record, &self.weights);
        components.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.reason.cmp(&b.reason))
        });

        let raw_total: f64 = components.iter().map(|component| component.weight).sum();
        let churn_score = raw_total.clamp(0.0, 1.0);

        let mut seen = HashSet::new();
        let mut ranked: Vec<String> = components
            .iter()
            .filter(|component| seen.insert(component.reason.clone()))
            .map(|component| component.reason.clone())
            .collect();
        if ranked.is_empty() {
            ranked.push(reasons::HEALTHY_ENGAGEMENT.to_string());
        }

        ScoredRecord {
            customer_id: record.customer_id.clone(),
            churn_score,
            risk_tier: self.tier_for(churn_score),
            reasons: ranked,
            components,
            understanding_score: understanding_score(record),
            maturity_flag: record.days_since_signup < self.weights.maturity_minimum_days,
        }
    }

    /// Monotone score-to-tier mapping, inclusive on each lower bound.
    pub fn tier_for(&self, score: f64) -> RiskTier {
        if score >= self.weights.high_tier_threshold {
            RiskTier::High
        } else if score >= self.weights.medium_tier_threshold {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }
}

/// Confidence proxy: account tenure (0-60, saturating at 90 days) plus ten
/// points for each engagement signal that carries a non-default value.
fn understanding_score(record: &CustomerFeatureRecord) -> u8 {
    let tenure = (f64::from(record.days_since_signup.min(90)) / 90.0 * 60.0).round() as u32;
    let signals = [
        record.logins_last_30_days > 0,
        record.email_opens_last_30_days > 0,
        record.active_features_used > 0,
        record.monthly_revenue > 0.0,
    ]
    .iter()
    .filter(|present| **present)
    .count() as u32;

    (tenure + signals * 10).min(100) as u8
}
