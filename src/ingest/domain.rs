use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Canonical behavioral/billing snapshot for one customer. The record is
/// total: every numeric signal defaults to zero and every categorical signal
/// to "Unknown", so a partially populated upload still scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerFeatureRecord {
    pub customer_id: String,
    #[serde(default = "unknown")]
    pub owner_id: String,
    #[serde(default)]
    pub days_since_signup: u32,
    #[serde(default)]
    pub monthly_revenue: f64,
    #[serde(default)]
    pub logins_last_30_days: u32,
    #[serde(default)]
    pub active_features_used: u32,
    #[serde(default)]
    pub support_tickets_opened: u32,
    #[serde(default)]
    pub email_opens_last_30_days: u32,
    #[serde(default)]
    pub last_login_days_ago: u32,
    #[serde(default)]
    pub billing_issue_count: u32,
    #[serde(default = "unknown")]
    pub subscription_plan: String,
    #[serde(default = "unknown")]
    pub last_payment_status: String,
}

fn unknown() -> String {
    "Unknown".to_string()
}

impl CustomerFeatureRecord {
    pub fn blank(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            owner_id: unknown(),
            days_since_signup: 0,
            monthly_revenue: 0.0,
            logins_last_30_days: 0,
            active_features_used: 0,
            support_tickets_opened: 0,
            email_opens_last_30_days: 0,
            last_login_days_ago: 0,
            billing_issue_count: 0,
            subscription_plan: unknown(),
            last_payment_status: unknown(),
        }
    }

    /// Point lookup used by the playbook condition evaluator. Unknown names
    /// return `None` so the evaluator can fail closed.
    pub fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "customer_id" => json!(self.customer_id),
            "owner_id" => json!(self.owner_id),
            "days_since_signup" => json!(self.days_since_signup),
            "monthly_revenue" => json!(self.monthly_revenue),
            "logins_last_30_days" => json!(self.logins_last_30_days),
            "active_features_used" => json!(self.active_features_used),
            "support_tickets_opened" => json!(self.support_tickets_opened),
            "email_opens_last_30_days" => json!(self.email_opens_last_30_days),
            "last_login_days_ago" => json!(self.last_login_days_ago),
            "billing_issue_count" => json!(self.billing_issue_count),
            "subscription_plan" => json!(self.subscription_plan),
            "last_payment_status" => json!(self.last_payment_status),
            _ => return None,
        };
        Some(value)
    }
}
