use serde::Serialize;

use crate::scoring::{RiskTier, ScoredRecord};

/// One reason code's footprint across the scored population.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonBreakdown {
    pub reason: String,
    pub count: usize,
    /// Fraction of scored customers carrying this reason.
    pub share: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

/// Population-level rollup for dashboard summaries. Read-only over stored
/// scored records; never touches the dispatch path.
#[derive(Debug, Clone, Serialize)]
pub struct ChurnReasonRollup {
    pub total_customers: usize,
    pub tiers: TierCounts,
    pub average_churn_score: f64,
    pub reasons: Vec<ReasonBreakdown>,
}

pub fn aggregate(records: &[ScoredRecord]) -> ChurnReasonRollup {
    let total = records.len();
    let mut tiers = TierCounts::default();
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    let mut score_sum = 0.0;

    for record in records {
        match record.risk_tier {
            RiskTier::Low => tiers.low += 1,
            RiskTier::Medium => tiers.medium += 1,
            RiskTier::High => tiers.high += 1,
        }
        score_sum += record.churn_score;
        for reason in &record.reasons {
            *counts.entry(reason.as_str()).or_default() += 1;
        }
    }

    let mut reasons: Vec<ReasonBreakdown> = counts
        .into_iter()
        .map(|(reason, count)| ReasonBreakdown {
            reason: reason.to_string(),
            count,
            share: if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            },
        })
        .collect();
    // Highest-footprint first; alphabetical among ties for stable output.
    reasons.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.reason.cmp(&b.reason)));

    ChurnReasonRollup {
        total_customers: total,
        tiers,
        average_churn_score: if total == 0 { 0.0 } else { score_sum / total as f64 },
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::domain::CustomerFeatureRecord;
    use crate::scoring::{reasons, ScoringEngine, ScoringWeights};

    fn scored(customer: &str, last_login_days: u32, plan: &str) -> ScoredRecord {
        let mut features = CustomerFeatureRecord::blank(customer);
        features.last_login_days_ago = last_login_days;
        features.logins_last_30_days = if last_login_days > 30 { 0 } else { 20 };
        features.active_features_used = 5;
        features.subscription_plan = plan.to_string();
        ScoringEngine::new(ScoringWeights::default()).score(&features)
    }

    #[test]
    fn rollup_counts_tiers_and_ranks_reasons() {
        let records = vec![
            scored("a", 95, "free"),
            scored("b", 95, "free"),
            scored("c", 1, "enterprise"),
        ];

        let rollup = aggregate(&records);
        assert_eq!(rollup.total_customers, 3);
        assert_eq!(rollup.tiers.high, 2);
        assert_eq!(rollup.tiers.low, 1);

        let top = &rollup.reasons[0];
        assert_eq!(top.count, 2);
        assert!((top.share - 2.0 / 3.0).abs() < 1e-9);
        assert!(rollup
            .reasons
            .iter()
            .any(|entry| entry.reason == reasons::HEALTHY_ENGAGEMENT));
    }

    #[test]
    fn empty_population_yields_empty_rollup() {
        let rollup = aggregate(&[]);
        assert_eq!(rollup.total_customers, 0);
        assert_eq!(rollup.average_churn_score, 0.0);
        assert!(rollup.reasons.is_empty());
    }
}
