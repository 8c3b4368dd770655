use serde_json::Value;
use tracing::warn;

use super::{Condition, ConditionOperator};
use crate::ingest::domain::CustomerFeatureRecord;
use crate::scoring::ScoredRecord;

/// Evaluate a playbook's flat condition list against a scored customer.
///
/// Semantics are logical AND with no grouping. The contract is "never crash
/// the dispatch loop": unknown fields, unknown operators, and failed numeric
/// coercions all evaluate to non-match.
pub fn matches(
    conditions: &[Condition],
    scored: &ScoredRecord,
    features: &CustomerFeatureRecord,
) -> bool {
    conditions
        .iter()
        .all(|condition| condition_holds(condition, scored, features))
}

fn condition_holds(
    condition: &Condition,
    scored: &ScoredRecord,
    features: &CustomerFeatureRecord,
) -> bool {
    let field = condition.field.trim();
    let Some(actual) = scored.field(field).or_else(|| features.field(field)) else {
        warn!(field, "playbook condition references unknown field; treating as non-match");
        return false;
    };

    match condition.operator {
        ConditionOperator::Equals => values_equal(&actual, &condition.value),
        ConditionOperator::NotEquals => !values_equal(&actual, &condition.value),
        ConditionOperator::GreaterThan => match (coerce_numeric(&actual), coerce_numeric(&condition.value)) {
            (Some(lhs), Some(rhs)) => lhs > rhs,
            _ => false,
        },
        ConditionOperator::LessThan => match (coerce_numeric(&actual), coerce_numeric(&condition.value)) {
            (Some(lhs), Some(rhs)) => lhs < rhs,
            _ => false,
        },
        ConditionOperator::Contains => stringify(&actual).contains(&stringify(&condition.value)),
        ConditionOperator::Unknown => {
            warn!(field, "playbook condition uses unknown operator; treating as non-match");
            false
        }
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return a == b;
    }
    // String comparison is case-sensitive by contract.
    stringify(lhs) == stringify(rhs)
}

fn coerce_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{ScoringEngine, ScoringWeights};
    use serde_json::json;

    fn condition(field: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    fn scored_pair(last_login_days: u32) -> (ScoredRecord, CustomerFeatureRecord) {
        let mut features = CustomerFeatureRecord::blank("cust-1");
        features.last_login_days_ago = last_login_days;
        features.logins_last_30_days = if last_login_days > 30 { 2 } else { 25 };
        features.support_tickets_opened = if last_login_days > 30 { 6 } else { 0 };
        features.subscription_plan = if last_login_days > 30 {
            "free".to_string()
        } else {
            "enterprise".to_string()
        };
        features.active_features_used = 5;
        let scored = ScoringEngine::new(ScoringWeights::default()).score(&features);
        (scored, features)
    }

    #[test]
    fn high_churn_condition_separates_risky_from_healthy() {
        let threshold = vec![condition(
            "churn_score",
            ConditionOperator::GreaterThan,
            json!(0.70),
        )];

        let (risky, risky_features) = scored_pair(95);
        assert!(matches(&threshold, &risky, &risky_features));

        let (healthy, healthy_features) = scored_pair(1);
        assert!(!matches(&threshold, &healthy, &healthy_features));
    }

    #[test]
    fn non_numeric_operand_fails_closed() {
        let (scored, features) = scored_pair(95);
        let condition = vec![condition(
            "subscription_plan",
            ConditionOperator::GreaterThan,
            json!(10),
        )];
        assert!(!matches(&condition, &scored, &features));
    }

    #[test]
    fn unknown_field_and_operator_fail_closed() {
        let (scored, features) = scored_pair(95);
        assert!(!matches(
            &[condition("astral_plane", ConditionOperator::Equals, json!("x"))],
            &scored,
            &features
        ));
        assert!(!matches(
            &[condition("churn_score", ConditionOperator::Unknown, json!(1))],
            &scored,
            &features
        ));
    }

    #[test]
    fn equals_is_case_sensitive_on_strings() {
        let (scored, features) = scored_pair(95);
        assert!(matches(
            &[condition("subscription_plan", ConditionOperator::Equals, json!("free"))],
            &scored,
            &features
        ));
        assert!(!matches(
            &[condition("subscription_plan", ConditionOperator::Equals, json!("Free"))],
            &scored,
            &features
        ));
    }

    #[test]
    fn numeric_strings_coerce_for_comparisons() {
        let (scored, features) = scored_pair(95);
        assert!(matches(
            &[condition(
                "last_login_days_ago",
                ConditionOperator::GreaterThan,
                json!("90"),
            )],
            &scored,
            &features
        ));
    }

    #[test]
    fn contains_runs_on_stringified_values() {
        let (scored, features) = scored_pair(95);
        assert!(matches(
            &[condition(
                "churn_reason",
                ConditionOperator::Contains,
                json!("inactive_over_90"),
            )],
            &scored,
            &features
        ));
    }

    #[test]
    fn empty_condition_list_matches_everything() {
        let (scored, features) = scored_pair(1);
        assert!(matches(&[], &scored, &features));
    }

    #[test]
    fn all_conditions_must_hold() {
        let (scored, features) = scored_pair(95);
        let both = vec![
            condition("risk_level", ConditionOperator::Equals, json!("high")),
            condition("subscription_plan", ConditionOperator::Equals, json!("enterprise")),
        ];
        assert!(!matches(&both, &scored, &features));
    }
}
