//! Payment service
//!
//! Recording validates the request and hands the balance check, the insert
//! and the paid-total increment to the store as one atomic unit, so two
//! concurrent entries cannot both fit into the same balance. Apply and
//! revert are idempotent through the payment's explicit state.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Payment, PaymentFilter, PaymentMethod};
use crate::store::{LedgerStore, LedgerUpdate, StoreError};
use crate::validation::{validate_positive_amount, validate_reference, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Due not found: {0}")]
    DueNotFound(Uuid),

    #[error("Due is inactive: {0}")]
    Inactive(Uuid),

    #[error("Payment of {amount} exceeds the outstanding balance of {balance}")]
    ExceedsBalance { amount: Decimal, balance: Decimal },

    #[error("Payment not found: {0}")]
    NotFound(Uuid),
}

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Request to record a payment against a due
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPaymentRequest {
    pub due_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn map_store_error(err: StoreError) -> PaymentError {
    match err {
        StoreError::PaymentNotFound(id) => PaymentError::NotFound(id),
        StoreError::DueNotFound(id) => PaymentError::DueNotFound(id),
        StoreError::DueInactive(id) => PaymentError::Inactive(id),
        StoreError::ExceedsBalance { amount, balance, .. } => {
            PaymentError::ExceedsBalance { amount, balance }
        }
        StoreError::MissingDue { payment_id, due_id } => {
            tracing::error!(
                payment_id = %payment_id,
                due_id = %due_id,
                "Payment references a missing due"
            );
            PaymentError::Store(StoreError::MissingDue { payment_id, due_id })
        }
        other => PaymentError::Store(other),
    }
}

/// Validate, insert and apply a payment
pub async fn record_payment(
    store: &dyn LedgerStore,
    req: NewPaymentRequest,
    today: NaiveDate,
) -> PaymentResult<LedgerUpdate> {
    validate_positive_amount("amount", req.amount)?;
    let reference = req.reference.trim().to_string();
    validate_reference(&reference)?;
    if req.method.requires_reference() && reference.is_empty() {
        return Err(ValidationError::MissingReference(req.method.to_string()).into());
    }

    let payment = Payment::new(
        req.due_id,
        req.amount,
        req.method,
        reference,
        req.created_by,
        today,
    );

    let update = store.record_payment(&payment, today).await.map_err(|e| {
        match &e {
            StoreError::DuplicateReference { method, reference } => tracing::warn!(
                method = %method,
                reference = %reference,
                "Payment rejected: duplicate reference"
            ),
            StoreError::ExceedsBalance {
                due_id,
                amount,
                balance,
            } => tracing::warn!(
                due_id = %due_id,
                amount = %amount,
                balance = %balance,
                "Payment rejected: exceeds balance"
            ),
            _ => {}
        }
        map_store_error(e)
    })?;

    tracing::info!(
        payment_id = %update.payment.id,
        due_id = %update.due.id,
        amount = %update.payment.amount,
        method = %update.payment.method,
        paid = %update.due.paid,
        status = %update.due.status,
        "Payment recorded"
    );

    Ok(update)
}

/// Apply a pending payment. No-op for payments already applied or reverted.
pub async fn apply_payment(
    store: &dyn LedgerStore,
    payment_id: Uuid,
    today: NaiveDate,
) -> PaymentResult<LedgerUpdate> {
    let update = store
        .apply_payment(payment_id, today)
        .await
        .map_err(map_store_error)?;

    if update.changed {
        tracing::info!(
            payment_id = %payment_id,
            due_id = %update.due.id,
            paid = %update.due.paid,
            status = %update.due.status,
            "Payment applied"
        );
    } else {
        tracing::warn!(
            payment_id = %payment_id,
            state = ?update.payment.state,
            "Payment not applicable, ignoring"
        );
    }
    Ok(update)
}

/// Revert a payment. Its amount leaves the due's paid total exactly once;
/// reverting again is a no-op.
pub async fn revert_payment(
    store: &dyn LedgerStore,
    payment_id: Uuid,
    today: NaiveDate,
) -> PaymentResult<LedgerUpdate> {
    let update = store
        .revert_payment(payment_id, today)
        .await
        .map_err(map_store_error)?;

    if update.changed {
        tracing::info!(
            payment_id = %payment_id,
            due_id = %update.due.id,
            amount = %update.payment.amount,
            paid = %update.due.paid,
            status = %update.due.status,
            "Payment reverted"
        );
    } else {
        tracing::warn!(payment_id = %payment_id, "Payment already reverted, ignoring");
    }
    Ok(update)
}

pub async fn list_payments(
    store: &dyn LedgerStore,
    filter: &PaymentFilter,
) -> PaymentResult<Vec<Payment>> {
    Ok(store.list_payments(filter).await?)
}
