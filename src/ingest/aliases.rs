use super::normalizer::normalize_key;
use std::collections::HashMap;
use std::sync::OnceLock;

pub(crate) const CUSTOMER_ID: &str = "customer_id";
pub(crate) const OWNER_ID: &str = "owner_id";
pub(crate) const DAYS_SINCE_SIGNUP: &str = "days_since_signup";
pub(crate) const MONTHLY_REVENUE: &str = "monthly_revenue";
pub(crate) const LOGINS_LAST_30_DAYS: &str = "logins_last_30_days";
pub(crate) const ACTIVE_FEATURES_USED: &str = "active_features_used";
pub(crate) const SUPPORT_TICKETS_OPENED: &str = "support_tickets_opened";
pub(crate) const EMAIL_OPENS_LAST_30_DAYS: &str = "email_opens_last_30_days";
pub(crate) const LAST_LOGIN_DAYS_AGO: &str = "last_login_days_ago";
pub(crate) const BILLING_ISSUE_COUNT: &str = "billing_issue_count";
pub(crate) const SUBSCRIPTION_PLAN: &str = "subscription_plan";
pub(crate) const LAST_PAYMENT_STATUS: &str = "last_payment_status";

static FIELD_ALIAS_MAP: OnceLock<HashMap<String, &'static str>> = OnceLock::new();

/// Resolve an already-normalized header to the canonical field it denotes.
pub(crate) fn canonical_field(normalized_key: &str) -> Option<&'static str> {
    field_alias_map().get(normalized_key).copied()
}

fn field_alias_map() -> &'static HashMap<String, &'static str> {
    FIELD_ALIAS_MAP.get_or_init(|| {
        // Ordered synonym lists observed across customer exports; earlier
        // entries are the names our own tracker emits.
        const ALIASES: &[(&str, &[&str])] = &[
            (
                CUSTOMER_ID,
                &[
                    "customer_id",
                    "customer_key",
                    "customer",
                    "user_id",
                    "user_key",
                    "user",
                    "client_id",
                    "account_ref",
                    "id",
                ],
            ),
            (
                OWNER_ID,
                &[
                    "owner_id",
                    "tenant_id",
                    "account_id",
                    "workspace_id",
                    "team_id",
                    "owner",
                ],
            ),
            (
                DAYS_SINCE_SIGNUP,
                &[
                    "days_since_signup",
                    "signup_age_days",
                    "account_age_days",
                    "tenure_days",
                    "customer_age_days",
                ],
            ),
            (
                MONTHLY_REVENUE,
                &[
                    "monthly_revenue",
                    "revenue",
                    "mrr",
                    "mrr_usd",
                    "monthly_spend",
                    "plan_revenue",
                ],
            ),
            (
                LOGINS_LAST_30_DAYS,
                &[
                    "logins_last_30_days",
                    "logins_30d",
                    "login_count",
                    "logins",
                    "monthly_logins",
                    "sessions_last_30_days",
                ],
            ),
            (
                ACTIVE_FEATURES_USED,
                &[
                    "active_features_used",
                    "features_used",
                    "feature_count",
                    "distinct_features",
                    "active_features",
                ],
            ),
            (
                SUPPORT_TICKETS_OPENED,
                &[
                    "support_tickets_opened",
                    "support_tickets",
                    "tickets_opened",
                    "ticket_count",
                    "tickets",
                ],
            ),
            (
                EMAIL_OPENS_LAST_30_DAYS,
                &[
                    "email_opens_last_30_days",
                    "email_opens_30d",
                    "email_opens",
                    "opens_30d",
                ],
            ),
            (
                LAST_LOGIN_DAYS_AGO,
                &[
                    "last_login_days_ago",
                    "days_since_last_login",
                    "last_login_days",
                    "last_seen_days_ago",
                    "inactive_days",
                ],
            ),
            (
                BILLING_ISSUE_COUNT,
                &[
                    "billing_issue_count",
                    "billing_issues",
                    "failed_payments",
                    "payment_failures",
                    "dunning_count",
                ],
            ),
            (
                SUBSCRIPTION_PLAN,
                &[
                    "subscription_plan",
                    "plan",
                    "plan_name",
                    "subscription",
                    "pricing_tier",
                ],
            ),
            (
                LAST_PAYMENT_STATUS,
                &[
                    "last_payment_status",
                    "payment_status",
                    "billing_status",
                    "last_payment",
                ],
            ),
        ];

        let mut map = HashMap::new();
        for (canonical, synonyms) in ALIASES {
            for synonym in *synonyms {
                map.entry(normalize_key(synonym)).or_insert(*canonical);
            }
        }
        map
    })
}
