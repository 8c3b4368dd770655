use super::reasons;
use super::weights::ScoringWeights;
use super::ScoreComponent;
use crate::ingest::domain::CustomerFeatureRecord;

/// Additive rule pass over the canonical record. Each family contributes at
/// most one tier so the total never exceeds the table's unit budget.
pub(crate) fn evaluate_rules(
    record: &CustomerFeatureRecord,
    weights: &ScoringWeights,
) -> Vec<ScoreComponent> {
    let mut components = Vec::new();
    let mut triggered = |reason: &'static str, weight: f64| {
        components.push(ScoreComponent {
            reason: reason.to_string(),
            weight,
        });
    };

    // Inactivity recency.
    if record.last_login_days_ago > 90 {
        triggered(reasons::INACTIVE_OVER_90_DAYS, weights.inactive_over_90);
    } else if record.last_login_days_ago > 60 {
        triggered(reasons::INACTIVE_OVER_60_DAYS, weights.inactive_over_60);
    } else if record.last_login_days_ago > 30 {
        triggered(reasons::INACTIVE_OVER_30_DAYS, weights.inactive_over_30);
    }

    // Login engagement over the trailing month.
    if record.logins_last_30_days == 0 {
        triggered(reasons::NO_RECENT_LOGINS, weights.no_recent_logins);
    } else if record.logins_last_30_days < 3 {
        triggered(reasons::LOW_LOGIN_FREQUENCY, weights.low_login_frequency);
    } else if record.logins_last_30_days < 10 {
        triggered(reasons::DECLINING_LOGINS, weights.declining_logins);
    }

    // Support burden.
    if record.support_tickets_opened > 5 {
        triggered(reasons::HEAVY_SUPPORT_BURDEN, weights.heavy_support_burden);
    } else if record.support_tickets_opened > 2 {
        triggered(
            reasons::ELEVATED_SUPPORT_VOLUME,
            weights.elevated_support_volume,
        );
    }

    // Feature adoption breadth.
    if record.active_features_used < 2 {
        triggered(
            reasons::MINIMAL_FEATURE_ADOPTION,
            weights.minimal_feature_adoption,
        );
    } else if record.active_features_used < 4 {
        triggered(
            reasons::NARROW_FEATURE_ADOPTION,
            weights.narrow_feature_adoption,
        );
    }

    // Plan type and billing health share one family budget.
    let plan = record.subscription_plan.trim().to_ascii_lowercase();
    let payment = record.last_payment_status.trim().to_ascii_lowercase();
    if plan == "free" || plan == "trial" {
        triggered(reasons::FREE_PLAN, weights.free_plan);
    } else if record.billing_issue_count > 0
        || payment == "failed"
        || payment == "past_due"
        || payment == "overdue"
    {
        triggered(reasons::BILLING_INSTABILITY, weights.billing_instability);
    }

    components
}
