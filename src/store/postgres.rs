//! PostgreSQL implementation of the LedgerStore trait
//!
//! Each operation runs in one transaction. Payment and intent rows are
//! locked `FOR UPDATE` before their state is checked, so concurrent callers
//! for the same row queue up; the paid total itself is changed with a single
//! `UPDATE ... SET paid = paid + $delta` and the status is derived from the
//! row that statement returns. New payments and intents lock their due
//! first, so the balance they are checked against cannot move before commit.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    check_chargeable, DueRevision, IntentUpdate, LedgerStore, LedgerUpdate, RevisedDue,
    StoreError, StoreResult,
};
use crate::contracts::{LedgerEvent, PAYMENT_APPLIED, PAYMENT_REVERTED};
use crate::models::{
    Due, IntentStatus, OnlinePaymentIntent, Payment, PaymentFilter, PaymentMethod, PaymentState,
};
use crate::repos::{due_repo, intent_repo, outbox_repo, payment_repo};

/// LedgerStore implementation backed by PostgreSQL
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Move a locked payment into `next`: adjust the due's paid total, re-derive
/// its status from the committed value and queue the outbox event.
async fn transition_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    payment: Payment,
    next: PaymentState,
    today: NaiveDate,
) -> StoreResult<LedgerUpdate> {
    let allowed = match next {
        PaymentState::Applied => payment.state.can_apply(),
        PaymentState::Reverted => payment.state.can_revert(),
        PaymentState::PendingApplication => false,
    };

    if !allowed {
        let due = due_repo::find_for_update(tx, payment.due_id)
            .await?
            .ok_or(StoreError::MissingDue {
                payment_id: payment.id,
                due_id: payment.due_id,
            })?;
        return Ok(LedgerUpdate {
            payment,
            due,
            changed: false,
        });
    }

    let delta = payment.paid_delta(next);
    let updated = payment_repo::set_state(tx, payment.id, next).await?;

    let mut due = due_repo::add_paid(tx, payment.due_id, delta)
        .await?
        .ok_or(StoreError::MissingDue {
            payment_id: payment.id,
            due_id: payment.due_id,
        })?;

    if due.refresh_status(today) {
        due_repo::set_status(tx, due.id, due.status).await?;
    }

    let event_type = match next {
        PaymentState::Applied => PAYMENT_APPLIED,
        _ => PAYMENT_REVERTED,
    };
    let event = LedgerEvent::payment_change(event_type, &updated, &due)?;
    outbox_repo::insert_event(tx, &event).await?;

    Ok(LedgerUpdate {
        payment: updated,
        due,
        changed: true,
    })
}

impl PgLedgerStore {
    async fn transition_payment(
        &self,
        payment_id: Uuid,
        next: PaymentState,
        today: NaiveDate,
    ) -> StoreResult<LedgerUpdate> {
        let mut tx = self.pool.begin().await?;

        let payment = payment_repo::find_for_update(&mut tx, payment_id)
            .await?
            .ok_or(StoreError::PaymentNotFound(payment_id))?;
        let update = transition_in_tx(&mut tx, payment, next, today).await?;

        tx.commit().await?;
        Ok(update)
    }

    fn map_payment_insert_error(err: sqlx::Error, payment: &Payment) -> StoreError {
        if is_unique_violation(&err) {
            StoreError::DuplicateReference {
                method: payment.method,
                reference: payment.reference.clone(),
            }
        } else if is_foreign_key_violation(&err) {
            StoreError::DueNotFound(payment.due_id)
        } else {
            StoreError::Database(err)
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_due(&self, due: &Due) -> StoreResult<Due> {
        let mut tx = self.pool.begin().await?;
        let inserted = due_repo::insert(&mut tx, due).await.map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateDue {
                    unit_id: due.unit_id,
                    period: due.period.clone(),
                    concept: due.concept.clone(),
                }
            } else if is_foreign_key_violation(&e) {
                StoreError::UnitNotFound(due.unit_id)
            } else {
                StoreError::Database(e)
            }
        })?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_due(&self, due_id: Uuid) -> StoreResult<Option<Due>> {
        Ok(due_repo::find_by_id(&self.pool, due_id).await?)
    }

    async fn list_dues_for_unit(&self, unit_id: Uuid) -> StoreResult<Vec<Due>> {
        Ok(due_repo::list_for_unit(&self.pool, unit_id).await?)
    }

    async fn list_past_due(&self, today: NaiveDate) -> StoreResult<Vec<Due>> {
        Ok(due_repo::list_past_due(&self.pool, today).await?)
    }

    async fn revise_due(
        &self,
        due_id: Uuid,
        today: NaiveDate,
        revise: &DueRevision<'_>,
    ) -> StoreResult<RevisedDue> {
        let mut tx = self.pool.begin().await?;

        // The row lock keeps concurrent applies out until the new terms and
        // status are committed.
        let current = due_repo::find_for_update(&mut tx, due_id)
            .await?
            .ok_or(StoreError::DueNotFound(due_id))?;

        let mut due = current.clone();
        let edited = revise(&mut due);
        due.paid = current.paid;
        due.recompute_amounts();
        let status_changed = due.refresh_status(today);

        if !(edited || status_changed) {
            tx.rollback().await?;
            return Ok(RevisedDue {
                due: current,
                changed: false,
            });
        }

        let saved = due_repo::update_terms(&mut tx, &due).await?;
        tx.commit().await?;

        Ok(RevisedDue {
            due: saved,
            changed: true,
        })
    }

    async fn mark_overdue(&self, today: NaiveDate) -> StoreResult<u64> {
        Ok(due_repo::mark_overdue(&self.pool, today).await?)
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<Payment> {
        let mut tx = self.pool.begin().await?;
        let inserted = payment_repo::insert(&mut tx, payment)
            .await
            .map_err(|e| Self::map_payment_insert_error(e, payment))?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn record_payment(&self, payment: &Payment, today: NaiveDate) -> StoreResult<LedgerUpdate> {
        let mut tx = self.pool.begin().await?;

        let due = due_repo::find_for_update(&mut tx, payment.due_id)
            .await?
            .ok_or(StoreError::DueNotFound(payment.due_id))?;
        check_chargeable(&due, payment.amount)?;

        let inserted = payment_repo::insert(&mut tx, payment)
            .await
            .map_err(|e| Self::map_payment_insert_error(e, payment))?;
        let update = transition_in_tx(&mut tx, inserted, PaymentState::Applied, today).await?;

        tx.commit().await?;
        Ok(update)
    }

    async fn find_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(payment_repo::find_by_id(&self.pool, payment_id).await?)
    }

    async fn list_payments(&self, filter: &PaymentFilter) -> StoreResult<Vec<Payment>> {
        Ok(payment_repo::list(&self.pool, filter).await?)
    }

    async fn apply_payment(&self, payment_id: Uuid, today: NaiveDate) -> StoreResult<LedgerUpdate> {
        self.transition_payment(payment_id, PaymentState::Applied, today)
            .await
    }

    async fn revert_payment(&self, payment_id: Uuid, today: NaiveDate) -> StoreResult<LedgerUpdate> {
        self.transition_payment(payment_id, PaymentState::Reverted, today)
            .await
    }

    async fn insert_intent(&self, intent: &OnlinePaymentIntent) -> StoreResult<OnlinePaymentIntent> {
        let mut tx = self.pool.begin().await?;

        let due = due_repo::find_for_update(&mut tx, intent.due_id)
            .await?
            .ok_or(StoreError::DueNotFound(intent.due_id))?;
        check_chargeable(&due, intent.amount)?;

        let inserted = intent_repo::insert(&mut tx, intent).await.map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateIntent {
                    provider: intent.provider.clone(),
                    provider_intent_id: intent.provider_intent_id.clone(),
                }
            } else if is_foreign_key_violation(&e) {
                StoreError::DueNotFound(intent.due_id)
            } else {
                StoreError::Database(e)
            }
        })?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_intent(&self, intent_id: Uuid) -> StoreResult<Option<OnlinePaymentIntent>> {
        Ok(intent_repo::find_by_id(&self.pool, intent_id).await?)
    }

    async fn find_intent_by_provider_id(
        &self,
        provider: &str,
        provider_intent_id: &str,
    ) -> StoreResult<Option<OnlinePaymentIntent>> {
        Ok(intent_repo::find_by_provider_id(&self.pool, provider, provider_intent_id).await?)
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

        let mut tx = self.pool.begin().await?;
        let intent = intent_repo::find_for_update(&mut tx, intent_id)
            .await?
            .ok_or(StoreError::IntentNotFound(intent_id))?;

        if !intent.status.can_transition_to(next) {
            tx.rollback().await?;
            return Ok(IntentUpdate {
                intent,
                payment: None,
                due: None,
                changed: false,
            });
        }

        let updated = intent_repo::set_status(&mut tx, intent_id, next, None).await?;
        tx.commit().await?;

        Ok(IntentUpdate {
            intent: updated,
            payment: None,
            due: None,
            changed: true,
        })
    }

    async fn succeed_intent(&self, intent_id: Uuid, today: NaiveDate) -> StoreResult<IntentUpdate> {
        let mut tx = self.pool.begin().await?;

        let intent = intent_repo::find_for_update(&mut tx, intent_id)
            .await?
            .ok_or(StoreError::IntentNotFound(intent_id))?;

        if !intent.status.can_transition_to(IntentStatus::Succeeded) {
            tx.rollback().await?;
            let payment = match intent.payment_id {
                Some(id) => payment_repo::find_by_id(&self.pool, id).await?,
                None => None,
            };
            let due = due_repo::find_by_id(&self.pool, intent.due_id).await?;
            return Ok(IntentUpdate {
                intent,
                payment,
                due,
                changed: false,
            });
        }

        let candidate = Payment::new(
            intent.due_id,
            intent.amount,
            PaymentMethod::Online,
            intent.provider_intent_id.clone(),
            intent.created_by.clone(),
            today,
        );

        // A payment already carrying this provider reference is linked
        // rather than duplicated; it is applied only if it never was.
        let payment = match payment_repo::insert_if_absent(&mut tx, &candidate).await? {
            Some(inserted) => inserted,
            None => payment_repo::find_by_reference_for_update(
                &mut tx,
                PaymentMethod::Online,
                &intent.provider_intent_id,
            )
            .await?
            .ok_or_else(|| {
                StoreError::Integrity(format!(
                    "payment reference {} conflicted but was not found",
                    intent.provider_intent_id
                ))
            })?,
        };
        if payment.due_id != intent.due_id {
            return Err(StoreError::Integrity(format!(
                "payment {} holding reference {} belongs to due {}, not {}",
                payment.id, intent.provider_intent_id, payment.due_id, intent.due_id
            )));
        }

        let update = transition_in_tx(&mut tx, payment, PaymentState::Applied, today).await?;
        let intent = intent_repo::set_status(
            &mut tx,
            intent_id,
            IntentStatus::Succeeded,
            Some(update.payment.id),
        )
        .await?;

        tx.commit().await?;

        Ok(IntentUpdate {
            intent,
            payment: Some(update.payment),
            due: Some(update.due),
            changed: true,
        })
    }
}
