//! In-memory store implementations backing the demo server, the offline CLI,
//! and the test suites. Production deployments swap these for database-backed
//! collaborators implementing the same traits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{
    ClaimOutcome, Coupon, CouponError, CouponRepository, CustomerState, OutboxEntry, OutboxStatus,
    OutboxStore, PersistenceError, PlaybookStore, RecordStore, TriggerLogEntry, TriggerLogStore,
    TriggerOutcome,
};
use crate::playbooks::PlaybookDefinition;
use crate::scoring::ScoredRecord;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, PersistenceError> {
    mutex
        .lock()
        .map_err(|_| PersistenceError::Unavailable("store mutex poisoned".to_string()))
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    customers: Mutex<HashMap<String, CustomerState>>,
}

impl RecordStore for InMemoryRecordStore {
    fn upsert(&self, state: CustomerState) -> Result<(), PersistenceError> {
        let mut customers = lock(&self.customers)?;
        let key = state.features.customer_id.clone();
        // Tags survive re-scoring; the snapshot itself is superseded.
        let tags = customers
            .get(&key)
            .map(|existing| existing.tags.clone())
            .unwrap_or_default();
        let mut state = state;
        for tag in tags {
            if !state.tags.contains(&tag) {
                state.tags.push(tag);
            }
        }
        customers.insert(key, state);
        Ok(())
    }

    fn fetch(&self, customer_id: &str) -> Result<Option<CustomerState>, PersistenceError> {
        Ok(lock(&self.customers)?.get(customer_id).cloned())
    }

    fn all_scored(&self) -> Result<Vec<ScoredRecord>, PersistenceError> {
        let customers = lock(&self.customers)?;
        let mut scored: Vec<ScoredRecord> =
            customers.values().map(|state| state.scored.clone()).collect();
        scored.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));
        Ok(scored)
    }

    fn add_tag(&self, customer_id: &str, tag: &str) -> Result<(), PersistenceError> {
        let mut customers = lock(&self.customers)?;
        let state = customers
            .get_mut(customer_id)
            .ok_or(PersistenceError::NotFound)?;
        if !state.tags.iter().any(|existing| existing == tag) {
            state.tags.push(tag.to_string());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPlaybookStore {
    playbooks: Mutex<Vec<PlaybookDefinition>>,
}

impl InMemoryPlaybookStore {
    /// Operator-side helper for seeding definitions; not part of the core's
    /// read-only contract.
    pub fn put(&self, definition: PlaybookDefinition) {
        if let Ok(mut playbooks) = self.playbooks.lock() {
            playbooks.retain(|existing| existing.id != definition.id);
            playbooks.push(definition);
        }
    }
}

impl PlaybookStore for InMemoryPlaybookStore {
    fn active_playbooks(&self) -> Result<Vec<PlaybookDefinition>, PersistenceError> {
        let playbooks = lock(&self.playbooks)?;
        Ok(playbooks
            .iter()
            .filter(|playbook| playbook.active)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct TriggerLogInner {
    rows: Vec<TriggerLogEntry>,
    claims: HashSet<(String, String, &'static str, i64)>,
}

/// Trigger log with the claim set and audit rows behind one mutex, so the
/// conditional insert is a single atomic step.
#[derive(Default)]
pub struct InMemoryTriggerLog {
    inner: Mutex<TriggerLogInner>,
}

impl TriggerLogStore for InMemoryTriggerLog {
    fn try_claim(&self, entry: TriggerLogEntry) -> Result<ClaimOutcome, PersistenceError> {
        let mut inner = lock(&self.inner)?;
        let key = (
            entry.playbook_id.clone(),
            entry.customer_id.clone(),
            entry.action_type.label(),
            entry.dedupe_bucket,
        );
        if !inner.claims.insert(key) {
            return Ok(ClaimOutcome::DuplicateInWindow);
        }
        inner.rows.push(entry);
        Ok(ClaimOutcome::Claimed)
    }

    fn record_skip(&self, entry: TriggerLogEntry) -> Result<(), PersistenceError> {
        let mut inner = lock(&self.inner)?;
        inner.rows.push(entry);
        Ok(())
    }

    fn record_outcome(
        &self,
        attempt_id: &str,
        outcome: TriggerOutcome,
        detail: Option<String>,
    ) -> Result<(), PersistenceError> {
        let mut inner = lock(&self.inner)?;
        let row = inner
            .rows
            .iter_mut()
            .find(|row| row.attempt_id == attempt_id)
            .ok_or(PersistenceError::NotFound)?;
        row.outcome = outcome;
        row.detail = detail;
        Ok(())
    }

    fn entries_for(
        &self,
        playbook_id: &str,
        customer_id: &str,
    ) -> Result<Vec<TriggerLogEntry>, PersistenceError> {
        let inner = lock(&self.inner)?;
        Ok(inner
            .rows
            .iter()
            .filter(|row| row.playbook_id == playbook_id && row.customer_id == customer_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryCouponRepository {
    coupons: Mutex<HashMap<String, Coupon>>,
}

impl InMemoryCouponRepository {
    pub fn get(&self, code: &str) -> Option<Coupon> {
        self.coupons.lock().ok()?.get(code).cloned()
    }
}

impl CouponRepository for InMemoryCouponRepository {
    fn insert(&self, coupon: Coupon) -> Result<(), PersistenceError> {
        let mut coupons = lock(&self.coupons)?;
        if coupons.contains_key(&coupon.code) {
            return Err(PersistenceError::Conflict);
        }
        coupons.insert(coupon.code.clone(), coupon);
        Ok(())
    }

    fn redeem(&self, code: &str, now: DateTime<Utc>) -> Result<Coupon, CouponError> {
        let mut coupons = lock(&self.coupons)?;
        let coupon = coupons.get_mut(code).ok_or(CouponError::NotFound)?;
        if coupon.redeemed {
            return Err(CouponError::AlreadyRedeemed);
        }
        if now > coupon.expires_at {
            return Err(CouponError::Expired);
        }
        coupon.redeemed = true;
        Ok(coupon.clone())
    }
}

#[derive(Default)]
struct OutboxInner {
    pending: VecDeque<OutboxEntry>,
    statuses: HashMap<String, (OutboxStatus, Option<String>)>,
}

#[derive(Default)]
pub struct InMemoryOutbox {
    inner: Mutex<OutboxInner>,
}

impl InMemoryOutbox {
    pub fn status_of(&self, entry_id: &str) -> Option<(OutboxStatus, Option<String>)> {
        self.inner.lock().ok()?.statuses.get(entry_id).cloned()
    }
}

impl OutboxStore for InMemoryOutbox {
    fn enqueue(&self, entry: OutboxEntry) -> Result<(), PersistenceError> {
        let mut inner = lock(&self.inner)?;
        inner
            .statuses
            .insert(entry.id.clone(), (OutboxStatus::Pending, None));
        inner.pending.push_back(entry);
        Ok(())
    }

    fn take_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, PersistenceError> {
        let mut inner = lock(&self.inner)?;
        let take = limit.min(inner.pending.len());
        Ok(inner.pending.drain(..take).collect())
    }

    fn mark(
        &self,
        entry_id: &str,
        status: OutboxStatus,
        detail: Option<String>,
    ) -> Result<(), PersistenceError> {
        let mut inner = lock(&self.inner)?;
        inner.statuses.insert(entry_id.to_string(), (status, detail));
        Ok(())
    }

    fn pending_count(&self) -> Result<usize, PersistenceError> {
        Ok(lock(&self.inner)?.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbooks::ActionType;
    use crate::store::DeliveryPayload;
    use chrono::Duration;

    fn webhook_payload() -> DeliveryPayload {
        DeliveryPayload::Webhook {
            url: "https://hooks.example.com/churn".to_string(),
            payload: serde_json::json!({ "event": "test" }),
        }
    }

    fn entry(bucket: i64) -> TriggerLogEntry {
        TriggerLogEntry {
            attempt_id: format!("attempt-{bucket}"),
            playbook_id: "pb-1".to_string(),
            customer_id: "cust-1".to_string(),
            action_type: ActionType::SendEmail,
            attempted_at: Utc::now(),
            outcome: TriggerOutcome::InProgress,
            detail: None,
            dedupe_bucket: bucket,
        }
    }

    #[test]
    fn duplicate_claim_in_same_bucket_loses() {
        let log = InMemoryTriggerLog::default();
        assert_eq!(log.try_claim(entry(7)).unwrap(), ClaimOutcome::Claimed);
        assert_eq!(
            log.try_claim(entry(7)).unwrap(),
            ClaimOutcome::DuplicateInWindow
        );
        assert_eq!(log.try_claim(entry(8)).unwrap(), ClaimOutcome::Claimed);
    }

    #[test]
    fn coupon_is_single_use_and_time_bounded() {
        let repo = InMemoryCouponRepository::default();
        let now = Utc::now();
        repo.insert(Coupon {
            code: "SAVE20-ABC".to_string(),
            customer_id: "cust-1".to_string(),
            discount_percent: 20,
            issued_at: now,
            expires_at: now + Duration::days(14),
            redeemed: false,
        })
        .expect("insert");

        let redeemed = repo.redeem("SAVE20-ABC", now).expect("first redemption");
        assert!(redeemed.redeemed);
        assert!(matches!(
            repo.redeem("SAVE20-ABC", now),
            Err(CouponError::AlreadyRedeemed)
        ));
        assert!(matches!(
            repo.redeem("UNKNOWN", now),
            Err(CouponError::NotFound)
        ));
    }

    #[test]
    fn expired_coupon_cannot_be_redeemed() {
        let repo = InMemoryCouponRepository::default();
        let now = Utc::now();
        repo.insert(Coupon {
            code: "LATE-1".to_string(),
            customer_id: "cust-2".to_string(),
            discount_percent: 10,
            issued_at: now - Duration::days(30),
            expires_at: now - Duration::days(1),
            redeemed: false,
        })
        .expect("insert");

        assert!(matches!(
            repo.redeem("LATE-1", now),
            Err(CouponError::Expired)
        ));
    }

    #[test]
    fn outbox_drains_in_fifo_order() {
        let outbox = InMemoryOutbox::default();
        for index in 0..3 {
            outbox
                .enqueue(OutboxEntry {
                    id: format!("out-{index}"),
                    attempt_id: format!("attempt-{index}"),
                    playbook_id: "pb-1".to_string(),
                    customer_id: "cust-1".to_string(),
                    payload: webhook_payload(),
                    enqueued_at: Utc::now(),
                })
                .expect("enqueue");
        }

        let first = outbox.take_pending(2).expect("take");
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, "out-0");
        assert_eq!(outbox.pending_count().unwrap(), 1);
    }
}
