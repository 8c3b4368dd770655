pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ingest::domain::CustomerFeatureRecord;
use crate::playbooks::{ActionType, PlaybookDefinition};
use crate::scoring::ScoredRecord;

/// Error enumeration for collaborator store failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Current persisted state for one customer: latest features, latest score,
/// and segmentation tags. Superseded wholesale on each ingestion event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerState {
    pub features: CustomerFeatureRecord,
    pub scored: ScoredRecord,
    #[serde(default)]
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert-by-key record store consumed by ingestion and reporting.
pub trait RecordStore: Send + Sync {
    fn upsert(&self, state: CustomerState) -> Result<(), PersistenceError>;
    fn fetch(&self, customer_id: &str) -> Result<Option<CustomerState>, PersistenceError>;
    fn all_scored(&self) -> Result<Vec<ScoredRecord>, PersistenceError>;
    fn add_tag(&self, customer_id: &str, tag: &str) -> Result<(), PersistenceError>;
}

/// Read-only playbook source; definitions are authored elsewhere.
pub trait PlaybookStore: Send + Sync {
    fn active_playbooks(&self) -> Result<Vec<PlaybookDefinition>, PersistenceError>;
}

/// Outcome states for a trigger-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    InProgress,
    Sent,
    Failed,
    SkippedCooldown,
}

impl TriggerOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TriggerOutcome::InProgress => "in_progress",
            TriggerOutcome::Sent => "sent",
            TriggerOutcome::Failed => "failed",
            TriggerOutcome::SkippedCooldown => "skipped_cooldown",
        }
    }
}

/// Append-only audit row, one per attempted action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerLogEntry {
    pub attempt_id: String,
    pub playbook_id: String,
    pub customer_id: String,
    pub action_type: ActionType,
    pub attempted_at: DateTime<Utc>,
    pub outcome: TriggerOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub dedupe_bucket: i64,
}

/// Result of the atomic conditional insert backing the idempotency gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    DuplicateInWindow,
}

/// Trigger-log collaborator. `try_claim` must behave as a single atomic
/// conditional insert on (playbook_id, customer_id, action_type,
/// dedupe_bucket): under concurrent attempts exactly one caller wins and the
/// rest observe `DuplicateInWindow` without a separate read.
pub trait TriggerLogStore: Send + Sync {
    fn try_claim(&self, entry: TriggerLogEntry) -> Result<ClaimOutcome, PersistenceError>;
    /// Append a non-claiming audit row (outcome `skipped_cooldown`).
    fn record_skip(&self, entry: TriggerLogEntry) -> Result<(), PersistenceError>;
    fn record_outcome(
        &self,
        attempt_id: &str,
        outcome: TriggerOutcome,
        detail: Option<String>,
    ) -> Result<(), PersistenceError>;
    fn entries_for(
        &self,
        playbook_id: &str,
        customer_id: &str,
    ) -> Result<Vec<TriggerLogEntry>, PersistenceError>;
}

/// Single-use, time-bounded discount code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub customer_id: String,
    pub discount_percent: u8,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub redeemed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CouponError {
    #[error("coupon code not found")]
    NotFound,
    #[error("coupon expired")]
    Expired,
    #[error("coupon already redeemed")]
    AlreadyRedeemed,
    #[error(transparent)]
    Store(#[from] PersistenceError),
}

pub trait CouponRepository: Send + Sync {
    fn insert(&self, coupon: Coupon) -> Result<(), PersistenceError>;
    /// Marks the coupon redeemed; a second redemption attempt fails.
    fn redeem(&self, code: &str, now: DateTime<Utc>) -> Result<Coupon, CouponError>;
}

/// Payload variants the outbox worker knows how to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryPayload {
    Email {
        recipient: String,
        subject: String,
        body: String,
    },
    Webhook {
        url: String,
        payload: Value,
    },
    Coupon {
        code: String,
        discount_percent: u8,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Failed,
}

/// Durably recorded intent to perform one external side effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    /// Trigger-log attempt this delivery reports back to.
    pub attempt_id: String,
    pub playbook_id: String,
    pub customer_id: String,
    pub payload: DeliveryPayload,
    pub enqueued_at: DateTime<Utc>,
}

pub trait OutboxStore: Send + Sync {
    fn enqueue(&self, entry: OutboxEntry) -> Result<(), PersistenceError>;
    /// Removes and returns up to `limit` pending entries for delivery.
    fn take_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, PersistenceError>;
    fn mark(
        &self,
        entry_id: &str,
        status: OutboxStatus,
        detail: Option<String>,
    ) -> Result<(), PersistenceError>;
    fn pending_count(&self) -> Result<usize, PersistenceError>;
}
