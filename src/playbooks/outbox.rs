use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::store::{
    Coupon, CouponRepository, DeliveryPayload, OutboxEntry, OutboxStatus, OutboxStore,
    PersistenceError, TriggerLogStore, TriggerOutcome,
};

/// Transport failure reported by a delivery collaborator. Collaborators are
/// expected to bound their own calls with a timeout and surface it here.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("endpoint returned status {0}")]
    Rejected(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailReceipt {
    pub provider_message_id: String,
}

/// Mail-sending collaborator; implemented outside the core.
pub trait MailSender: Send + Sync {
    fn send(&self, mail: &OutboundEmail) -> Result<MailReceipt, DeliveryError>;
}

/// Outbound HTTP collaborator for webhook posts.
pub trait WebhookClient: Send + Sync {
    fn post_json(&self, url: &str, payload: &serde_json::Value) -> Result<u16, DeliveryError>;
}

/// Drains the durable outbox: each entry is delivered with bounded retry and
/// exponential backoff, then its trigger-log attempt is closed out with the
/// final outcome. A delivery failure only ever affects its own entry.
pub struct OutboxWorker {
    outbox: Arc<dyn OutboxStore>,
    trigger_log: Arc<dyn TriggerLogStore>,
    mail: Arc<dyn MailSender>,
    webhooks: Arc<dyn WebhookClient>,
    coupons: Arc<dyn CouponRepository>,
    config: DispatchConfig,
}

const DRAIN_CHUNK: usize = 16;

impl OutboxWorker {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        trigger_log: Arc<dyn TriggerLogStore>,
        mail: Arc<dyn MailSender>,
        webhooks: Arc<dyn WebhookClient>,
        coupons: Arc<dyn CouponRepository>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            outbox,
            trigger_log,
            mail,
            webhooks,
            coupons,
            config,
        }
    }

    /// Deliver everything currently pending; returns the delivered count.
    pub async fn drain(&self) -> Result<usize, PersistenceError> {
        let mut delivered = 0;

        loop {
            let batch = self.outbox.take_pending(DRAIN_CHUNK)?;
            if batch.is_empty() {
                break;
            }
            for entry in batch {
                if self.deliver_with_retry(&entry).await {
                    delivered += 1;
                }
            }
        }

        Ok(delivered)
    }

    async fn deliver_with_retry(&self, entry: &OutboxEntry) -> bool {
        let max_attempts = self.config.outbox_max_attempts.max(1);
        let mut backoff = self.config.outbox_backoff();

        for attempt in 1..=max_attempts {
            match self.deliver(entry) {
                Ok(detail) => {
                    self.close(entry, OutboxStatus::Delivered, TriggerOutcome::Sent, detail);
                    return true;
                }
                Err(err) if attempt < max_attempts => {
                    warn!(
                        entry_id = %entry.id,
                        attempt,
                        error = %err,
                        "outbox delivery failed; backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => {
                    warn!(entry_id = %entry.id, error = %err, "outbox delivery exhausted retries");
                    self.close(
                        entry,
                        OutboxStatus::Failed,
                        TriggerOutcome::Failed,
                        Some(err.to_string()),
                    );
                    return false;
                }
            }
        }

        false
    }

    fn deliver(&self, entry: &OutboxEntry) -> Result<Option<String>, DeliveryError> {
        match &entry.payload {
            DeliveryPayload::Email {
                recipient,
                subject,
                body,
            } => {
                let receipt = self.mail.send(&OutboundEmail {
                    recipient: recipient.clone(),
                    subject: subject.clone(),
                    body: body.clone(),
                })?;
                Ok(Some(receipt.provider_message_id))
            }
            DeliveryPayload::Webhook { url, payload } => {
                let status = self.webhooks.post_json(url, payload)?;
                if (200..300).contains(&status) {
                    Ok(Some(format!("http {status}")))
                } else {
                    Err(DeliveryError::Rejected(status))
                }
            }
            DeliveryPayload::Coupon {
                code,
                discount_percent,
                expires_at,
            } => {
                self.coupons
                    .insert(Coupon {
                        code: code.clone(),
                        customer_id: entry.customer_id.clone(),
                        discount_percent: *discount_percent,
                        issued_at: entry.enqueued_at,
                        expires_at: *expires_at,
                        redeemed: false,
                    })
                    .map_err(|err| DeliveryError::Transport(err.to_string()))?;
                Ok(Some(code.clone()))
            }
        }
    }

    fn close(
        &self,
        entry: &OutboxEntry,
        status: OutboxStatus,
        outcome: TriggerOutcome,
        detail: Option<String>,
    ) {
        if let Err(err) = self.outbox.mark(&entry.id, status, detail.clone()) {
            warn!(entry_id = %entry.id, error = %err, "failed to mark outbox entry");
        }
        if let Err(err) = self
            .trigger_log
            .record_outcome(&entry.attempt_id, outcome, detail)
        {
            warn!(entry_id = %entry.id, error = %err, "failed to close trigger log attempt");
        }
        if outcome == TriggerOutcome::Sent {
            info!(
                entry_id = %entry.id,
                customer_id = %entry.customer_id,
                playbook_id = %entry.playbook_id,
                delivered_at = %Utc::now().to_rfc3339(),
                "outbox entry delivered"
            );
        }
    }
}
