use serde::{Deserialize, Serialize};

/// Canonical churn weight table, on the 0-1 scale. This is the single source
/// of truth for every ingestion path; family budgets sum to 1.0 and each
/// family contributes at most its strongest tier:
///
///   inactivity recency   0.40  (>90d / >60d / >30d)
///   login engagement     0.25  (none / <3 / <10 in 30d)
///   support burden       0.20  (>5 / >2 open tickets)
///   feature adoption     0.10  (<2 / <4 distinct features)
///   plan & billing       0.05  (free or trial plan, else billing trouble)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub inactive_over_90: f64,
    pub inactive_over_60: f64,
    pub inactive_over_30: f64,
    pub no_recent_logins: f64,
    pub low_login_frequency: f64,
    pub declining_logins: f64,
    pub heavy_support_burden: f64,
    pub elevated_support_volume: f64,
    pub minimal_feature_adoption: f64,
    pub narrow_feature_adoption: f64,
    pub free_plan: f64,
    pub billing_instability: f64,
    /// Scores at or above this bound are high risk.
    pub high_tier_threshold: f64,
    /// Scores at or above this bound (and below the high bound) are medium.
    pub medium_tier_threshold: f64,
    /// Accounts younger than this many days get the maturity flag.
    pub maturity_minimum_days: u32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            inactive_over_90: 0.40,
            inactive_over_60: 0.25,
            inactive_over_30: 0.12,
            no_recent_logins: 0.25,
            low_login_frequency: 0.18,
            declining_logins: 0.08,
            heavy_support_burden: 0.20,
            elevated_support_volume: 0.12,
            minimal_feature_adoption: 0.10,
            narrow_feature_adoption: 0.05,
            free_plan: 0.05,
            billing_instability: 0.05,
            high_tier_threshold: 0.70,
            medium_tier_threshold: 0.40,
            maturity_minimum_days: 30,
        }
    }
}

impl ScoringWeights {
    /// Worst-case total across families; stays at or under 1.0 so the clamp
    /// on the final score is a safety net, not a crutch.
    pub fn max_total(&self) -> f64 {
        self.inactive_over_90
            .max(self.inactive_over_60)
            .max(self.inactive_over_30)
            + self
                .no_recent_logins
                .max(self.low_login_frequency)
                .max(self.declining_logins)
            + self.heavy_support_burden.max(self.elevated_support_volume)
            + self
                .minimal_feature_adoption
                .max(self.narrow_feature_adoption)
            + self.free_plan.max(self.billing_instability)
    }
}
