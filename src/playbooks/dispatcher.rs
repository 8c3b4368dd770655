use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::template::{render, template_vars};
use super::{evaluator, Action, ActionType, PlaybookDefinition};
use crate::config::DispatchConfig;
use crate::ingest::domain::CustomerFeatureRecord;
use crate::scoring::ScoredRecord;
use crate::store::{
    ClaimOutcome, DeliveryPayload, OutboxEntry, OutboxStore, PersistenceError, PlaybookStore,
    RecordStore, TriggerLogEntry, TriggerLogStore, TriggerOutcome,
};

/// How a single action attempt was resolved at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDisposition {
    /// Claimed and handed to the outbox for delivery.
    Queued,
    /// Executed inline (tag actions have no external side effect).
    Applied,
    SkippedCooldown,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub playbook_id: String,
    pub action_type: &'static str,
    pub disposition: ActionDisposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-customer dispatch summary returned to the ingestion caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub playbooks_evaluated: usize,
    pub playbooks_matched: usize,
    pub actions: Vec<ActionReport>,
}

impl DispatchReport {
    pub fn queued(&self) -> usize {
        self.count(ActionDisposition::Queued)
    }

    pub fn skipped_cooldown(&self) -> usize {
        self.count(ActionDisposition::SkippedCooldown)
    }

    pub fn failed(&self) -> usize {
        self.count(ActionDisposition::Failed)
    }

    fn count(&self, disposition: ActionDisposition) -> usize {
        self.actions
            .iter()
            .filter(|action| action.disposition == disposition)
            .count()
    }
}

/// Matches active playbooks against a scored customer and records every
/// attempted action. External side effects are not performed here: email,
/// webhook, and coupon work is claimed in the trigger log, then durably
/// enqueued for the outbox worker. Failures in one action never block
/// siblings or other playbooks.
pub struct PlaybookDispatcher {
    playbooks: Arc<dyn PlaybookStore>,
    trigger_log: Arc<dyn TriggerLogStore>,
    outbox: Arc<dyn OutboxStore>,
    records: Arc<dyn RecordStore>,
    config: DispatchConfig,
}

impl PlaybookDispatcher {
    pub fn new(
        playbooks: Arc<dyn PlaybookStore>,
        trigger_log: Arc<dyn TriggerLogStore>,
        outbox: Arc<dyn OutboxStore>,
        records: Arc<dyn RecordStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            playbooks,
            trigger_log,
            outbox,
            records,
            config,
        }
    }

    pub fn dispatch(
        &self,
        scored: &ScoredRecord,
        features: &CustomerFeatureRecord,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, PersistenceError> {
        let mut report = DispatchReport::default();

        for playbook in self.playbooks.active_playbooks()? {
            report.playbooks_evaluated += 1;
            if !evaluator::matches(&playbook.conditions, scored, features) {
                continue;
            }
            report.playbooks_matched += 1;
            info!(
                playbook_id = %playbook.id,
                customer_id = %scored.customer_id,
                risk_level = scored.risk_tier.label(),
                "playbook matched"
            );

            for action in &playbook.actions {
                let outcome = self.attempt_action(&playbook, action, scored, features, now);
                report.actions.push(outcome);
            }
        }

        Ok(report)
    }

    fn attempt_action(
        &self,
        playbook: &PlaybookDefinition,
        action: &Action,
        scored: &ScoredRecord,
        features: &CustomerFeatureRecord,
        now: DateTime<Utc>,
    ) -> ActionReport {
        let cooldown_hours = playbook
            .cooldown_hours
            .unwrap_or(self.config.default_cooldown_hours)
            .max(1);
        let bucket = now.timestamp().div_euclid(i64::from(cooldown_hours) * 3600);
        let attempt_id = Uuid::new_v4().to_string();

        let entry = TriggerLogEntry {
            attempt_id: attempt_id.clone(),
            playbook_id: playbook.id.clone(),
            customer_id: scored.customer_id.clone(),
            action_type: action.action_type,
            attempted_at: now,
            outcome: TriggerOutcome::InProgress,
            detail: None,
            dedupe_bucket: bucket,
        };

        let claim = match self.trigger_log.try_claim(entry.clone()) {
            Ok(claim) => claim,
            Err(err) => {
                warn!(playbook_id = %playbook.id, error = %err, "trigger log claim failed");
                return self.report(playbook, action, ActionDisposition::Failed, Some(err.to_string()));
            }
        };

        if claim == ClaimOutcome::DuplicateInWindow {
            let mut skip_row = entry;
            skip_row.outcome = TriggerOutcome::SkippedCooldown;
            if let Err(err) = self.trigger_log.record_skip(skip_row) {
                warn!(playbook_id = %playbook.id, error = %err, "failed to record cooldown skip");
            }
            return self.report(playbook, action, ActionDisposition::SkippedCooldown, None);
        }

        match action.action_type {
            ActionType::Tag => self.apply_tag(playbook, action, features, &attempt_id),
            ActionType::SendEmail => self.enqueue(
                playbook,
                action,
                &attempt_id,
                scored,
                now,
                build_email_payload(action, scored, features),
            ),
            ActionType::Webhook => match build_webhook_payload(&playbook.id, action, scored, now) {
                Some(payload) => {
                    self.enqueue(playbook, action, &attempt_id, scored, now, payload)
                }
                None => self.fail_attempt(
                    playbook,
                    action,
                    &attempt_id,
                    "webhook action missing url".to_string(),
                ),
            },
            ActionType::CreateCoupon => {
                let (payload, code) = build_coupon_payload(action, now);
                let mut outcome = self.enqueue(playbook, action, &attempt_id, scored, now, payload);
                if outcome.disposition == ActionDisposition::Queued {
                    outcome.detail = Some(code);
                }
                outcome
            }
            ActionType::Unknown => self.fail_attempt(
                playbook,
                action,
                &attempt_id,
                "unsupported action type".to_string(),
            ),
        }
    }

    fn apply_tag(
        &self,
        playbook: &PlaybookDefinition,
        action: &Action,
        features: &CustomerFeatureRecord,
        attempt_id: &str,
    ) -> ActionReport {
        let label = action
            .config
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("at_risk")
            .to_string();

        match self.records.add_tag(&features.customer_id, &label) {
            Ok(()) => {
                self.finish_attempt(attempt_id, TriggerOutcome::Sent, Some(label.clone()));
                self.report(playbook, action, ActionDisposition::Applied, Some(label))
            }
            Err(err) => {
                self.finish_attempt(attempt_id, TriggerOutcome::Failed, Some(err.to_string()));
                self.report(playbook, action, ActionDisposition::Failed, Some(err.to_string()))
            }
        }
    }

    fn enqueue(
        &self,
        playbook: &PlaybookDefinition,
        action: &Action,
        attempt_id: &str,
        scored: &ScoredRecord,
        now: DateTime<Utc>,
        payload: DeliveryPayload,
    ) -> ActionReport {
        let entry = OutboxEntry {
            id: Uuid::new_v4().to_string(),
            attempt_id: attempt_id.to_string(),
            playbook_id: playbook.id.clone(),
            customer_id: scored.customer_id.clone(),
            payload,
            enqueued_at: now,
        };

        match self.outbox.enqueue(entry) {
            Ok(()) => self.report(playbook, action, ActionDisposition::Queued, None),
            Err(err) => {
                self.finish_attempt(attempt_id, TriggerOutcome::Failed, Some(err.to_string()));
                self.report(playbook, action, ActionDisposition::Failed, Some(err.to_string()))
            }
        }
    }

    fn fail_attempt(
        &self,
        playbook: &PlaybookDefinition,
        action: &Action,
        attempt_id: &str,
        detail: String,
    ) -> ActionReport {
        self.finish_attempt(attempt_id, TriggerOutcome::Failed, Some(detail.clone()));
        self.report(playbook, action, ActionDisposition::Failed, Some(detail))
    }

    fn finish_attempt(&self, attempt_id: &str, outcome: TriggerOutcome, detail: Option<String>) {
        if let Err(err) = self.trigger_log.record_outcome(attempt_id, outcome, detail) {
            warn!(attempt_id, error = %err, "failed to update trigger log outcome");
        }
    }

    fn report(
        &self,
        playbook: &PlaybookDefinition,
        action: &Action,
        disposition: ActionDisposition,
        detail: Option<String>,
    ) -> ActionReport {
        ActionReport {
            playbook_id: playbook.id.clone(),
            action_type: action.action_type.label(),
            disposition,
            detail,
        }
    }
}

fn build_email_payload(
    action: &Action,
    scored: &ScoredRecord,
    features: &CustomerFeatureRecord,
) -> DeliveryPayload {
    let vars = template_vars(scored, features, &action.config);
    let recipient_template = action
        .config
        .get("recipient")
        .and_then(Value::as_str)
        .unwrap_or("{{customer_id}}");
    let subject_template = action
        .config
        .get("subject")
        .and_then(Value::as_str)
        .unwrap_or("We miss you, {{customer_id}}");
    let body_template = action
        .config
        .get("body")
        .and_then(Value::as_str)
        .unwrap_or("Hi {{customer_id}}, it has been {{last_login_days_ago}} days since your last visit. {{offer}}");

    DeliveryPayload::Email {
        recipient: render(recipient_template, &vars),
        subject: render(subject_template, &vars),
        body: render(body_template, &vars),
    }
}

fn build_webhook_payload(
    playbook_id: &str,
    action: &Action,
    scored: &ScoredRecord,
    now: DateTime<Utc>,
) -> Option<DeliveryPayload> {
    let url = action.config.get("url").and_then(Value::as_str)?.to_string();
    let event = action
        .config
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or("churn_risk_triggered");

    let payload = json!({
        "event": event,
        "customer_id": scored.customer_id,
        "playbook_id": playbook_id,
        "risk_level": scored.risk_tier.label(),
        "churn_score": scored.churn_score,
        "offer": action.config.get("offer").cloned().unwrap_or(Value::Null),
        "timestamp": now.to_rfc3339(),
    });

    Some(DeliveryPayload::Webhook { url, payload })
}

/// Returns the payload plus the generated code so dispatch can report it to
/// the caller before delivery happens.
fn build_coupon_payload(action: &Action, now: DateTime<Utc>) -> (DeliveryPayload, String) {
    let discount_percent = action
        .config
        .get("discount_percent")
        .and_then(Value::as_u64)
        .map(|value| value.min(100) as u8)
        .unwrap_or(10);
    // Operator configs are loosely validated; an unbounded window would
    // overflow the expiry arithmetic.
    let valid_days = action
        .config
        .get("valid_days")
        .and_then(Value::as_i64)
        .unwrap_or(14)
        .clamp(1, 3650);

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();

    let code = format!("SAVE{discount_percent}-{suffix}");
    let payload = DeliveryPayload::Coupon {
        code: code.clone(),
        discount_percent,
        expires_at: now + Duration::days(valid_days),
    };
    (payload, code)
}
