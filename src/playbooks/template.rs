use std::collections::BTreeMap;

use serde_json::Value;

use crate::ingest::domain::CustomerFeatureRecord;
use crate::scoring::ScoredRecord;

/// Substitute `{{variable}}` placeholders. Unresolved names render as empty
/// strings so half-filled drafts never leak raw markers into customer mail.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                if let Some(value) = vars.get(name) {
                    rendered.push_str(value);
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated marker; emit the remainder verbatim.
                rendered.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

/// Variables available to playbook templates: the scored and feature record
/// fields plus any static campaign data carried in the action config under
/// `variables`.
pub fn template_vars(
    scored: &ScoredRecord,
    features: &CustomerFeatureRecord,
    config: &Value,
) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("customer_id".to_string(), features.customer_id.clone());
    vars.insert("owner_id".to_string(), features.owner_id.clone());
    vars.insert(
        "subscription_plan".to_string(),
        features.subscription_plan.clone(),
    );
    vars.insert(
        "monthly_revenue".to_string(),
        format!("{:.2}", features.monthly_revenue),
    );
    vars.insert(
        "last_login_days_ago".to_string(),
        features.last_login_days_ago.to_string(),
    );
    vars.insert(
        "churn_score".to_string(),
        format!("{:.2}", scored.churn_score),
    );
    vars.insert(
        "risk_level".to_string(),
        scored.risk_tier.label().to_string(),
    );
    vars.insert("churn_reason".to_string(), scored.reasons.join("; "));
    vars.insert(
        "top_reason".to_string(),
        scored.reasons.first().cloned().unwrap_or_default(),
    );
    vars.insert(
        "action_recommended".to_string(),
        scored.action_recommended().to_string(),
    );

    if let Some(extra) = config.get("variables").and_then(Value::as_object) {
        for (key, value) in extra {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            vars.insert(key.clone(), rendered);
        }
    }

    vars
}
