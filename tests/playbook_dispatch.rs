//! Integration coverage for playbook dispatch and outbox delivery: cooldown
//! idempotency, per-action failure isolation, bounded retries, coupon
//! lifecycle, and inline tag application.

mod common {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use churnguard::config::DispatchConfig;
    use churnguard::ingest::domain::CustomerFeatureRecord;
    use churnguard::playbooks::dispatcher::PlaybookDispatcher;
    use churnguard::playbooks::outbox::{
        DeliveryError, MailReceipt, MailSender, OutboundEmail, OutboxWorker, WebhookClient,
    };
    use churnguard::playbooks::PlaybookDefinition;
    use churnguard::scoring::{ScoredRecord, ScoringEngine, ScoringWeights};
    use churnguard::store::memory::{
        InMemoryCouponRepository, InMemoryOutbox, InMemoryPlaybookStore, InMemoryRecordStore,
        InMemoryTriggerLog,
    };

    /// Mail fixture that fails the first `failures` sends, then succeeds.
    pub(super) struct FlakyMail {
        failures_remaining: AtomicUsize,
        pub sent: Mutex<Vec<OutboundEmail>>,
    }

    impl FlakyMail {
        pub fn new(failures: usize) -> Self {
            Self {
                failures_remaining: AtomicUsize::new(failures),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl MailSender for FlakyMail {
        fn send(&self, mail: &OutboundEmail) -> Result<MailReceipt, DeliveryError> {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(DeliveryError::Transport("connection reset".to_string()));
            }
            self.sent
                .lock()
                .map_err(|_| DeliveryError::Transport("mail fixture poisoned".to_string()))?
                .push(mail.clone());
            Ok(MailReceipt {
                provider_message_id: "fixture-msg".to_string(),
            })
        }
    }

    pub(super) struct FixedStatusWebhooks {
        status: u16,
        pub posts: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl FixedStatusWebhooks {
        pub fn new(status: u16) -> Self {
            Self {
                status,
                posts: Mutex::new(Vec::new()),
            }
        }
    }

    impl WebhookClient for FixedStatusWebhooks {
        fn post_json(
            &self,
            url: &str,
            payload: &serde_json::Value,
        ) -> Result<u16, DeliveryError> {
            self.posts
                .lock()
                .map_err(|_| DeliveryError::Transport("webhook fixture poisoned".to_string()))?
                .push((url.to_string(), payload.clone()));
            Ok(self.status)
        }
    }

    pub(super) struct Harness {
        pub dispatcher: PlaybookDispatcher,
        pub worker: OutboxWorker,
        pub records: Arc<InMemoryRecordStore>,
        pub trigger_log: Arc<InMemoryTriggerLog>,
        pub outbox: Arc<InMemoryOutbox>,
        pub coupons: Arc<InMemoryCouponRepository>,
        pub mail: Arc<FlakyMail>,
        pub webhooks: Arc<FixedStatusWebhooks>,
    }

    pub(super) fn harness(
        playbooks: Vec<PlaybookDefinition>,
        mail_failures: usize,
        webhook_status: u16,
    ) -> Harness {
        let records = Arc::new(InMemoryRecordStore::default());
        let playbook_store = Arc::new(InMemoryPlaybookStore::default());
        for definition in playbooks {
            playbook_store.put(definition);
        }
        let trigger_log = Arc::new(InMemoryTriggerLog::default());
        let outbox = Arc::new(InMemoryOutbox::default());
        let coupons = Arc::new(InMemoryCouponRepository::default());
        let mail = Arc::new(FlakyMail::new(mail_failures));
        let webhooks = Arc::new(FixedStatusWebhooks::new(webhook_status));

        let config = DispatchConfig {
            default_cooldown_hours: 24,
            outbox_max_attempts: 3,
            outbox_backoff_ms: 0,
        };

        let dispatcher = PlaybookDispatcher::new(
            playbook_store,
            trigger_log.clone(),
            outbox.clone(),
            records.clone(),
            config.clone(),
        );
        let worker = OutboxWorker::new(
            outbox.clone(),
            trigger_log.clone(),
            mail.clone(),
            webhooks.clone(),
            coupons.clone(),
            config,
        );

        Harness {
            dispatcher,
            worker,
            records,
            trigger_log,
            outbox,
            coupons,
            mail,
            webhooks,
        }
    }

    pub(super) fn playbook(definition: serde_json::Value) -> PlaybookDefinition {
        serde_json::from_value(definition).expect("playbook fixture parses")
    }

    pub(super) fn risky_customer(id: &str) -> (ScoredRecord, CustomerFeatureRecord) {
        let mut features = CustomerFeatureRecord::blank(id);
        features.last_login_days_ago = 95;
        features.logins_last_30_days = 0;
        features.subscription_plan = "free".to_string();
        let scored = ScoringEngine::new(ScoringWeights::default()).score(&features);
        (scored, features)
    }
}

use chrono::{Duration, TimeZone, Utc};
use churnguard::playbooks::dispatcher::ActionDisposition;
use churnguard::store::{
    CouponError, CouponRepository, CustomerState, OutboxStore, RecordStore, TriggerLogStore,
    TriggerOutcome,
};
use serde_json::json;

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn email_playbook() -> churnguard::playbooks::PlaybookDefinition {
    common::playbook(json!({
        "id": "pb-email",
        "name": "Dormant winback",
        "conditions": [
            { "field": "churn_score", "operator": "greater_than", "value": 0.7 }
        ],
        "actions": [
            {
                "type": "send_email",
                "config": {
                    "subject": "Come back, {{customer_id}}",
                    "body": "It has been {{last_login_days_ago}} days."
                }
            }
        ]
    }))
}

#[test]
fn repeat_dispatch_within_cooldown_is_skipped() {
    let harness = common::harness(vec![email_playbook()], 0, 200);
    let (scored, features) = common::risky_customer("cust-1");
    let now = fixed_now();

    let first = harness
        .dispatcher
        .dispatch(&scored, &features, now)
        .expect("first dispatch");
    assert_eq!(first.playbooks_matched, 1);
    assert_eq!(first.queued(), 1);

    let second = harness
        .dispatcher
        .dispatch(&scored, &features, now + Duration::minutes(5))
        .expect("second dispatch");
    assert_eq!(second.queued(), 0);
    assert_eq!(second.skipped_cooldown(), 1);

    // One claimed attempt, one audit row for the skip.
    let entries = harness
        .trigger_log
        .entries_for("pb-email", "cust-1")
        .expect("log reads");
    assert_eq!(entries.len(), 2);
    assert_eq!(
        entries
            .iter()
            .filter(|row| row.outcome == TriggerOutcome::SkippedCooldown)
            .count(),
        1
    );
    assert_eq!(harness.outbox.pending_count().expect("pending"), 1);
}

#[test]
fn dispatch_fires_again_in_the_next_cooldown_window() {
    let harness = common::harness(vec![email_playbook()], 0, 200);
    let (scored, features) = common::risky_customer("cust-2");
    let now = fixed_now();

    let first = harness
        .dispatcher
        .dispatch(&scored, &features, now)
        .expect("first dispatch");
    let second = harness
        .dispatcher
        .dispatch(&scored, &features, now + Duration::hours(25))
        .expect("second dispatch");

    assert_eq!(first.queued(), 1);
    assert_eq!(second.queued(), 1);
    assert_eq!(harness.outbox.pending_count().expect("pending"), 2);
}

#[test]
fn action_failure_does_not_block_siblings() {
    // First action is a webhook with no url and can never be enqueued.
    let harness = common::harness(
        vec![common::playbook(json!({
            "id": "pb-mixed",
            "name": "Broken then fine",
            "conditions": [],
            "actions": [
                { "type": "webhook", "config": {} },
                { "type": "send_email", "config": {} }
            ]
        }))],
        0,
        200,
    );
    let (scored, features) = common::risky_customer("cust-3");

    let report = harness
        .dispatcher
        .dispatch(&scored, &features, fixed_now())
        .expect("dispatch");

    assert_eq!(report.failed(), 1);
    assert_eq!(report.queued(), 1);
    assert_eq!(report.actions[0].disposition, ActionDisposition::Failed);
    assert_eq!(report.actions[1].disposition, ActionDisposition::Queued);
}

#[test]
fn unrecognized_action_type_is_recorded_as_failed() {
    let harness = common::harness(
        vec![common::playbook(json!({
            "id": "pb-odd",
            "name": "Future action",
            "conditions": [],
            "actions": [{ "type": "send_carrier_pigeon" }]
        }))],
        0,
        200,
    );
    let (scored, features) = common::risky_customer("cust-4");

    let report = harness
        .dispatcher
        .dispatch(&scored, &features, fixed_now())
        .expect("dispatch");
    assert_eq!(report.failed(), 1);

    let entries = harness
        .trigger_log
        .entries_for("pb-odd", "cust-4")
        .expect("log reads");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, TriggerOutcome::Failed);
}

#[tokio::test]
async fn transient_mail_failures_are_retried_until_delivery() {
    let harness = common::harness(vec![email_playbook()], 2, 200);
    let (scored, features) = common::risky_customer("cust-5");

    harness
        .dispatcher
        .dispatch(&scored, &features, fixed_now())
        .expect("dispatch");
    let delivered = harness.worker.drain().await.expect("drain");

    assert_eq!(delivered, 1);
    assert_eq!(harness.mail.sent.lock().expect("mail log").len(), 1);
    let entries = harness
        .trigger_log
        .entries_for("pb-email", "cust-5")
        .expect("log reads");
    assert_eq!(entries[0].outcome, TriggerOutcome::Sent);
}

#[tokio::test]
async fn exhausted_retries_close_the_attempt_as_failed() {
    let harness = common::harness(
        vec![common::playbook(json!({
            "id": "pb-hook",
            "name": "CRM notify",
            "conditions": [],
            "actions": [
                { "type": "webhook", "config": { "url": "https://crm.example.com/hooks" } }
            ]
        }))],
        0,
        500,
    );
    let (scored, features) = common::risky_customer("cust-6");

    harness
        .dispatcher
        .dispatch(&scored, &features, fixed_now())
        .expect("dispatch");
    let delivered = harness.worker.drain().await.expect("drain");

    assert_eq!(delivered, 0);
    assert_eq!(harness.webhooks.posts.lock().expect("post log").len(), 3);
    assert_eq!(harness.outbox.pending_count().expect("pending"), 0);
    let entries = harness
        .trigger_log
        .entries_for("pb-hook", "cust-6")
        .expect("log reads");
    assert_eq!(entries[0].outcome, TriggerOutcome::Failed);
}

#[tokio::test]
async fn dispatched_coupon_is_redeemable_exactly_once() {
    let harness = common::harness(
        vec![common::playbook(json!({
            "id": "pb-coupon",
            "name": "Save the account",
            "conditions": [],
            "actions": [
                { "type": "create_coupon", "config": { "discount_percent": 20, "valid_days": 5 } }
            ]
        }))],
        0,
        200,
    );
    let (scored, features) = common::risky_customer("cust-7");
    let now = fixed_now();

    let report = harness
        .dispatcher
        .dispatch(&scored, &features, now)
        .expect("dispatch");
    let code = report.actions[0]
        .detail
        .clone()
        .expect("coupon code reported at dispatch");
    assert!(code.starts_with("SAVE20-"));

    harness.worker.drain().await.expect("drain");

    let coupon = harness.coupons.get(&code).expect("coupon persisted");
    assert_eq!(coupon.customer_id, "cust-7");
    assert_eq!(coupon.discount_percent, 20);

    let redeemed = harness
        .coupons
        .redeem(&code, now + Duration::days(1))
        .expect("first redemption");
    assert!(redeemed.redeemed);
    assert!(matches!(
        harness.coupons.redeem(&code, now + Duration::days(1)),
        Err(CouponError::AlreadyRedeemed)
    ));
}

#[tokio::test]
async fn oversized_coupon_validity_is_clamped_not_fatal() {
    let harness = common::harness(
        vec![common::playbook(json!({
            "id": "pb-forever",
            "name": "Eternal discount",
            "conditions": [],
            "actions": [
                {
                    "type": "create_coupon",
                    "config": { "discount_percent": 10, "valid_days": i64::MAX }
                }
            ]
        }))],
        0,
        200,
    );
    let (scored, features) = common::risky_customer("cust-9");
    let now = fixed_now();

    let report = harness
        .dispatcher
        .dispatch(&scored, &features, now)
        .expect("dispatch survives absurd validity window");
    assert_eq!(report.queued(), 1);
    let code = report.actions[0]
        .detail
        .clone()
        .expect("coupon code reported");

    harness.worker.drain().await.expect("drain");
    let coupon = harness.coupons.get(&code).expect("coupon persisted");
    assert!(coupon.expires_at <= now + Duration::days(3650));
    assert!(coupon.expires_at > now);
}

#[test]
fn tag_action_applies_label_to_stored_customer() {
    let harness = common::harness(
        vec![common::playbook(json!({
            "id": "pb-tag",
            "name": "Flag for CSM review",
            "conditions": [],
            "actions": [{ "type": "tag", "config": { "label": "csm_review" } }]
        }))],
        0,
        200,
    );
    let (scored, features) = common::risky_customer("cust-8");
    let now = fixed_now();

    harness
        .records
        .upsert(CustomerState {
            features: features.clone(),
            scored: scored.clone(),
            tags: Vec::new(),
            updated_at: now,
        })
        .expect("seed customer");

    let report = harness
        .dispatcher
        .dispatch(&scored, &features, now)
        .expect("dispatch");
    assert_eq!(report.actions[0].disposition, ActionDisposition::Applied);

    let stored = harness
        .records
        .fetch("cust-8")
        .expect("fetch works")
        .expect("customer exists");
    assert_eq!(stored.tags, vec!["csm_review".to_string()]);
}
