//! In-memory implementation of the LedgerStore trait for testing and development
//!
//! One async mutex guards every table, so each operation observes and
//! commits a consistent snapshot, the way a serializable transaction would.
//! Operations build their changes on copies and only write them back once
//! nothing can fail any more.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    check_chargeable, DueRevision, IntentUpdate, LedgerStore, LedgerUpdate, RevisedDue,
    StoreError, StoreResult,
};
use crate::contracts::{LedgerEvent, PAYMENT_APPLIED, PAYMENT_REVERTED};
use crate::models::{
    Due, DueStatus, IntentStatus, OnlinePaymentIntent, Payment, PaymentFilter, PaymentMethod,
    PaymentState,
};
use crate::money::floor_zero;

#[derive(Default)]
struct State {
    dues: HashMap<Uuid, Due>,
    payments: HashMap<Uuid, Payment>,
    intents: HashMap<Uuid, OnlinePaymentIntent>,
    outbox: Vec<LedgerEvent>,
}

impl State {
    fn check_payment_reference(&self, payment: &Payment) -> StoreResult<()> {
        if payment.reference.is_empty() {
            return Ok(());
        }
        let taken = self
            .payments
            .values()
            .any(|p| p.method == payment.method && p.reference == payment.reference);
        if taken {
            return Err(StoreError::DuplicateReference {
                method: payment.method,
                reference: payment.reference.clone(),
            });
        }
        Ok(())
    }

    fn find_by_reference(&self, method: PaymentMethod, reference: &str) -> Option<&Payment> {
        self.payments
            .values()
            .find(|p| p.method == method && p.reference == reference)
    }

    /// Move a payment into `next`, adjusting its due's paid total by the
    /// payment's signed contribution. Returns the staged rows and the outbox
    /// event without writing anything back.
    fn stage_transition(
        &self,
        payment: &Payment,
        next: PaymentState,
        today: NaiveDate,
    ) -> StoreResult<(Payment, Due, Option<LedgerEvent>)> {
        let mut due = self
            .dues
            .get(&payment.due_id)
            .cloned()
            .ok_or(StoreError::MissingDue {
                payment_id: payment.id,
                due_id: payment.due_id,
            })?;

        let allowed = match next {
            PaymentState::Applied => payment.state.can_apply(),
            PaymentState::Reverted => payment.state.can_revert(),
            PaymentState::PendingApplication => false,
        };
        if !allowed {
            return Ok((payment.clone(), due, None));
        }

        let now = Utc::now();
        due.paid = floor_zero(due.paid + payment.paid_delta(next));
        due.refresh_status(today);
        due.updated_at = now;

        let mut updated = payment.clone();
        updated.state = next;
        let event_type = match next {
            PaymentState::Applied => {
                updated.applied_at = Some(now);
                PAYMENT_APPLIED
            }
            _ => {
                updated.reverted_at = Some(now);
                PAYMENT_REVERTED
            }
        };
        let event = LedgerEvent::payment_change(event_type, &updated, &due)?;

        Ok((updated, due, Some(event)))
    }

    fn commit_transition(
        &mut self,
        payment: Payment,
        due: Due,
        event: Option<LedgerEvent>,
    ) -> LedgerUpdate {
        let changed = event.is_some();
        if let Some(event) = event {
            self.outbox.push(event);
            self.payments.insert(payment.id, payment.clone());
            self.dues.insert(due.id, due.clone());
        }
        LedgerUpdate {
            payment,
            due,
            changed,
        }
    }

    fn transition_payment(
        &mut self,
        payment_id: Uuid,
        next: PaymentState,
        today: NaiveDate,
    ) -> StoreResult<LedgerUpdate> {
        let payment = self
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or(StoreError::PaymentNotFound(payment_id))?;
        let (payment, due, event) = self.stage_transition(&payment, next, today)?;
        Ok(self.commit_transition(payment, due, event))
    }

    fn intent_update(&self, intent: OnlinePaymentIntent, changed: bool) -> IntentUpdate {
        let payment = intent
            .payment_id
            .and_then(|id| self.payments.get(&id).cloned());
        let due = self.dues.get(&intent.due_id).cloned();
        IntentUpdate {
            intent,
            payment,
            due,
            changed,
        }
    }
}

/// LedgerStore implementation backed by process memory
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events written to the outbox so far, oldest first
    pub async fn outbox_events(&self) -> Vec<LedgerEvent> {
        self.state.lock().await.outbox.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_due(&self, due: &Due) -> StoreResult<Due> {
        let mut state = self.state.lock().await;

        let duplicate = due.is_active
            && state.dues.values().any(|d| {
                d.is_active
                    && d.unit_id == due.unit_id
                    && d.period == due.period
                    && d.concept == due.concept
            });
        if duplicate {
            return Err(StoreError::DuplicateDue {
                unit_id: due.unit_id,
                period: due.period.clone(),
                concept: due.concept.clone(),
            });
        }

        state.dues.insert(due.id, due.clone());
        Ok(due.clone())
    }

    async fn find_due(&self, due_id: Uuid) -> StoreResult<Option<Due>> {
        Ok(self.state.lock().await.dues.get(&due_id).cloned())
    }

    async fn list_dues_for_unit(&self, unit_id: Uuid) -> StoreResult<Vec<Due>> {
        let state = self.state.lock().await;
        let mut dues: Vec<Due> = state
            .dues
            .values()
            .filter(|d| d.unit_id == unit_id)
            .cloned()
            .collect();
        dues.sort_by(|a, b| {
            b.period
                .cmp(&a.period)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(dues)
    }

    async fn list_past_due(&self, today: NaiveDate) -> StoreResult<Vec<Due>> {
        let state = self.state.lock().await;
        let mut dues: Vec<Due> = state
            .dues
            .values()
            .filter(|d| d.is_active && today > d.due_date && d.balance() > Decimal::ZERO)
            .cloned()
            .collect();
        dues.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        Ok(dues)
    }

    async fn revise_due(
        &self,
        due_id: Uuid,
        today: NaiveDate,
        revise: &DueRevision<'_>,
    ) -> StoreResult<RevisedDue> {
        let mut state = self.state.lock().await;
        let current = state
            .dues
            .get(&due_id)
            .cloned()
            .ok_or(StoreError::DueNotFound(due_id))?;

        let mut due = current.clone();
        let edited = revise(&mut due);
        due.paid = current.paid;
        due.recompute_amounts();
        let status_changed = due.refresh_status(today);

        let changed = edited || status_changed;
        if changed {
            due.updated_at = Utc::now();
            state.dues.insert(due.id, due.clone());
        }
        Ok(RevisedDue {
            due: if changed { due } else { current },
            changed,
        })
    }

    async fn mark_overdue(&self, today: NaiveDate) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut count = 0;
        for due in state.dues.values_mut() {
            if due.status == DueStatus::Pending && due.derive_status(today) == DueStatus::Overdue {
                due.status = DueStatus::Overdue;
                due.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<Payment> {
        let mut state = self.state.lock().await;
        if !state.dues.contains_key(&payment.due_id) {
            return Err(StoreError::DueNotFound(payment.due_id));
        }
        state.check_payment_reference(payment)?;
        state.payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn record_payment(&self, payment: &Payment, today: NaiveDate) -> StoreResult<LedgerUpdate> {
        let mut state = self.state.lock().await;
        let due = state
            .dues
            .get(&payment.due_id)
            .ok_or(StoreError::DueNotFound(payment.due_id))?;
        check_chargeable(due, payment.amount)?;
        state.check_payment_reference(payment)?;

        let (applied, due, event) = state.stage_transition(payment, PaymentState::Applied, today)?;
        Ok(state.commit_transition(applied, due, event))
    }

    async fn find_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&payment_id).cloned())
    }

    async fn list_payments(&self, filter: &PaymentFilter) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            payments.truncate(limit.max(0) as usize);
        }
        Ok(payments)
    }

    async fn apply_payment(&self, payment_id: Uuid, today: NaiveDate) -> StoreResult<LedgerUpdate> {
        self.state
            .lock()
            .await
            .transition_payment(payment_id, PaymentState::Applied, today)
    }

    async fn revert_payment(&self, payment_id: Uuid, today: NaiveDate) -> StoreResult<LedgerUpdate> {
        self.state
            .lock()
            .await
            .transition_payment(payment_id, PaymentState::Reverted, today)
    }

    async fn insert_intent(&self, intent: &OnlinePaymentIntent) -> StoreResult<OnlinePaymentIntent> {
        let mut state = self.state.lock().await;
        let due = state
            .dues
            .get(&intent.due_id)
            .ok_or(StoreError::DueNotFound(intent.due_id))?;
        check_chargeable(due, intent.amount)?;
        let taken = state.intents.values().any(|i| {
            i.provider == intent.provider && i.provider_intent_id == intent.provider_intent_id
        });
        if taken {
            return Err(StoreError::DuplicateIntent {
                provider: intent.provider.clone(),
                provider_intent_id: intent.provider_intent_id.clone(),
            });
        }
        state.intents.insert(intent.id, intent.clone());
        Ok(intent.clone())
    }

    async fn find_intent(&self, intent_id: Uuid) -> StoreResult<Option<OnlinePaymentIntent>> {
        Ok(self.state.lock().await.intents.get(&intent_id).cloned())
    }

    async fn find_intent_by_provider_id(
        &self,
        provider: &str,
        provider_intent_id: &str,
    ) -> StoreResult<Option<OnlinePaymentIntent>> {
        let state = self.state.lock().await;
        Ok(state
            .intents
            .values()
            .find(|i| i.provider == provider && i.provider_intent_id == provider_intent_id)
            .cloned())
    }

    async fn transition_intent(
        &self,
        intent_id: Uuid,
        next: IntentStatus,
    ) -> StoreResult<IntentUpdate> {
        if next == IntentStatus::Succeeded {
            return Err(StoreError::Integrity(
                "SUCCEEDED must go through succeed_intent".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let mut intent = state
            .intents
            .get(&intent_id)
            .cloned()
            .ok_or(StoreError::IntentNotFound(intent_id))?;

        if !intent.status.can_transition_to(next) {
            return Ok(state.intent_update(intent, false));
        }

        intent.status = next;
        intent.updated_at = Utc::now();
        state.intents.insert(intent.id, intent.clone());
        Ok(state.intent_update(intent, true))
    }

    async fn succeed_intent(&self, intent_id: Uuid, today: NaiveDate) -> StoreResult<IntentUpdate> {
        let mut state = self.state.lock().await;
        let mut intent = state
            .intents
            .get(&intent_id)
            .cloned()
            .ok_or(StoreError::IntentNotFound(intent_id))?;

        if !intent.status.can_transition_to(IntentStatus::Succeeded) {
            return Ok(state.intent_update(intent, false));
        }

        // A payment already carrying this provider reference is linked
        // rather than duplicated; it is applied only if it never was.
        let payment = match state.find_by_reference(PaymentMethod::Online, &intent.provider_intent_id) {
            Some(existing) if existing.due_id != intent.due_id => {
                return Err(StoreError::Integrity(format!(
                    "payment {} holding reference {} belongs to due {}, not {}",
                    existing.id, intent.provider_intent_id, existing.due_id, intent.due_id
                )));
            }
            Some(existing) => existing.clone(),
            None => Payment::new(
                intent.due_id,
                intent.amount,
                PaymentMethod::Online,
                intent.provider_intent_id.clone(),
                intent.created_by.clone(),
                today,
            ),
        };
        let (payment, due, event) = state.stage_transition(&payment, PaymentState::Applied, today)?;

        intent.status = IntentStatus::Succeeded;
        intent.payment_id = Some(payment.id);
        intent.updated_at = Utc::now();
        state.intents.insert(intent.id, intent.clone());
        let update = state.commit_transition(payment, due, event);

        Ok(IntentUpdate {
            intent,
            payment: Some(update.payment),
            due: Some(update.due),
            changed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn seeded_due(store: &InMemoryLedgerStore, total: Decimal) -> Due {
        let today = date(2024, 3, 1);
        let due = Due::issue(
            Uuid::new_v4(),
            "2024-03",
            "COMMON_EXPENSES",
            total,
            false,
            dec!(0),
            dec!(0),
            dec!(0),
            date(2024, 3, 10),
            today,
        );
        store.insert_due(&due).await.unwrap()
    }

    #[tokio::test]
    async fn test_apply_then_revert_writes_outbox_events() {
        let store = InMemoryLedgerStore::new();
        let today = date(2024, 3, 1);
        let due = seeded_due(&store, dec!(100.00)).await;

        let payment = Payment::new(due.id, dec!(40.00), PaymentMethod::Cash, "", None, today);
        let applied = store.record_payment(&payment, today).await.unwrap();
        assert!(applied.changed);
        assert_eq!(applied.due.paid, dec!(40.00));
        assert_eq!(applied.due.status, DueStatus::Partial);

        let reverted = store.revert_payment(payment.id, today).await.unwrap();
        assert!(reverted.changed);
        assert_eq!(reverted.due.paid, dec!(0));
        assert_eq!(reverted.payment.state, PaymentState::Reverted);

        let again = store.revert_payment(payment.id, today).await.unwrap();
        assert!(!again.changed);
        assert_eq!(again.due.paid, dec!(0));

        let events = store.outbox_events().await;
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec![PAYMENT_APPLIED, PAYMENT_REVERTED]);
    }

    #[tokio::test]
    async fn test_revise_due_keeps_committed_paid() {
        let store = InMemoryLedgerStore::new();
        let today = date(2024, 3, 1);
        let due = seeded_due(&store, dec!(100.00)).await;
        let payment = Payment::new(due.id, dec!(60.00), PaymentMethod::Cash, "", None, today);
        store.record_payment(&payment, today).await.unwrap();

        let revised = store
            .revise_due(due.id, today, &|d: &mut Due| {
                d.paid = dec!(0);
                d.discount = dec!(40.00);
                true
            })
            .await
            .unwrap();

        assert!(revised.changed);
        assert_eq!(revised.due.paid, dec!(60.00));
        assert_eq!(revised.due.total, dec!(60.00));
        assert_eq!(revised.due.status, DueStatus::Paid);
    }

    #[tokio::test]
    async fn test_transition_intent_rejects_succeeded() {
        let store = InMemoryLedgerStore::new();
        let due = seeded_due(&store, dec!(100.00)).await;
        let intent = OnlinePaymentIntent::new(
            due.id,
            dec!(100.00),
            "USD",
            "STRIPE",
            "pi_1",
            None,
            serde_json::json!({}),
        );
        store.insert_intent(&intent).await.unwrap();

        let err = store
            .transition_intent(intent.id, IntentStatus::Succeeded)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_record_payment_checks_balance_under_lock() {
        let store = InMemoryLedgerStore::new();
        let today = date(2024, 3, 1);
        let due = seeded_due(&store, dec!(100.00)).await;

        let first = Payment::new(due.id, dec!(60.00), PaymentMethod::Cash, "", None, today);
        store.record_payment(&first, today).await.unwrap();

        let second = Payment::new(due.id, dec!(60.00), PaymentMethod::Cash, "", None, today);
        let err = store.record_payment(&second, today).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ExceedsBalance { balance, .. } if balance == dec!(40.00)
        ));

        assert!(store.find_payment(second.id).await.unwrap().is_none());
        assert_eq!(store.find_due(due.id).await.unwrap().unwrap().paid, dec!(60.00));
        assert_eq!(store.outbox_events().await.len(), 1);
    }
}
