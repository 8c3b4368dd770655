mod aliases;
pub mod domain;
mod normalizer;
pub mod service;

use std::collections::HashMap;

use serde_json::{Map, Value};

use aliases::canonical_field;
use domain::CustomerFeatureRecord;
use normalizer::{clean_value, normalize_key};

/// The one rejection ingestion is allowed to make: a row with no resolvable
/// customer key. Every other missing or mangled field degrades to a default.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no customer key could be resolved from the submitted fields (tried aliases of '{field}')")]
    MissingIdentity { field: &'static str },
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingIdentity { field } => field,
        }
    }
}

/// Maps heterogeneous raw payloads (aliased headers, encoding noise) onto the
/// canonical feature record.
pub struct FeatureNormalizer;

impl FeatureNormalizer {
    pub fn normalize(raw: &Map<String, Value>) -> Result<CustomerFeatureRecord, ValidationError> {
        let mut resolved: HashMap<&'static str, String> = HashMap::new();

        for (key, value) in raw {
            let Some(canonical) = canonical_field(&normalize_key(key)) else {
                continue;
            };
            let cleaned = clean_value(&stringify(value));
            if cleaned.is_empty() {
                continue;
            }
            // First synonym with a usable value wins.
            resolved.entry(canonical).or_insert(cleaned);
        }

        let customer_id = resolved
            .remove(aliases::CUSTOMER_ID)
            .ok_or(ValidationError::MissingIdentity {
                field: aliases::CUSTOMER_ID,
            })?;

        let mut record = CustomerFeatureRecord::blank(customer_id);
        record.owner_id = categorical(&resolved, aliases::OWNER_ID);
        record.days_since_signup = count(&resolved, aliases::DAYS_SINCE_SIGNUP);
        record.monthly_revenue = numeric(&resolved, aliases::MONTHLY_REVENUE);
        record.logins_last_30_days = count(&resolved, aliases::LOGINS_LAST_30_DAYS);
        record.active_features_used = count(&resolved, aliases::ACTIVE_FEATURES_USED);
        record.support_tickets_opened = count(&resolved, aliases::SUPPORT_TICKETS_OPENED);
        record.email_opens_last_30_days = count(&resolved, aliases::EMAIL_OPENS_LAST_30_DAYS);
        record.last_login_days_ago = count(&resolved, aliases::LAST_LOGIN_DAYS_AGO);
        record.billing_issue_count = count(&resolved, aliases::BILLING_ISSUE_COUNT);
        record.subscription_plan = categorical(&resolved, aliases::SUBSCRIPTION_PLAN);
        record.last_payment_status = categorical(&resolved, aliases::LAST_PAYMENT_STATUS);

        Ok(record)
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

fn numeric(resolved: &HashMap<&'static str, String>, key: &'static str) -> f64 {
    let Some(raw) = resolved.get(key) else {
        return 0.0;
    };
    let scrubbed: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%'))
        .collect();
    scrubbed.trim().parse::<f64>().unwrap_or(0.0).max(0.0)
}

fn count(resolved: &HashMap<&'static str, String>, key: &'static str) -> u32 {
    numeric(resolved, key).round() as u32
}

fn categorical(resolved: &HashMap<&'static str, String>, key: &'static str) -> String {
    match resolved.get(key) {
        Some(value) if !value.is_empty() => value.clone(),
        _ => "Unknown".to_string(),
    }
}
