//! # LedgerStore abstraction
//!
//! The storage seam for dues, payments and online payment intents.
//!
//! Every operation that changes a due's `paid` total runs as one atomic unit
//! inside the store: the increment is executed by the storage engine's own
//! concurrency control, status is re-derived from the freshly committed
//! value, and a failure leaves both `paid` and `status` untouched.
//!
//! ## Implementations
//!
//! - **PgLedgerStore**: PostgreSQL, one transaction per operation, atomic
//!   `UPDATE dues SET paid = paid + $delta`
//! - **InMemoryLedgerStore**: tests/dev, one async mutex guarding all state

mod memory;
mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Due, IntentStatus, OnlinePaymentIntent, Payment, PaymentFilter, PaymentMethod,
};

/// Errors that can occur in ledger storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Active due already exists for unit {unit_id}, period {period}, concept {concept}")]
    DuplicateDue {
        unit_id: Uuid,
        period: String,
        concept: String,
    },

    #[error("Reference '{reference}' already recorded for payment method {method}")]
    DuplicateReference {
        method: PaymentMethod,
        reference: String,
    },

    #[error("Intent '{provider_intent_id}' already registered with provider {provider}")]
    DuplicateIntent {
        provider: String,
        provider_intent_id: String,
    },

    #[error("Unit not found: {0}")]
    UnitNotFound(Uuid),

    #[error("Due not found: {0}")]
    DueNotFound(Uuid),

    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    #[error("Online payment intent not found: {0}")]
    IntentNotFound(Uuid),

    #[error("Due is inactive: {0}")]
    DueInactive(Uuid),

    #[error("Amount {amount} exceeds the outstanding balance of {balance} on due {due_id}")]
    ExceedsBalance {
        due_id: Uuid,
        amount: Decimal,
        balance: Decimal,
    },

    #[error("Payment {payment_id} references missing due {due_id}")]
    MissingDue { payment_id: Uuid, due_id: Uuid },

    #[error("Ledger integrity violation: {0}")]
    Integrity(String),

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A new payment or intent may only target an active due and may not ask
/// for more than its outstanding balance. Stores call this on the locked
/// row, inside the same atomic unit as the write.
pub(crate) fn check_chargeable(due: &Due, amount: Decimal) -> StoreResult<()> {
    if !due.is_active {
        return Err(StoreError::DueInactive(due.id));
    }
    let balance = due.balance();
    if amount > balance {
        return Err(StoreError::ExceedsBalance {
            due_id: due.id,
            amount,
            balance,
        });
    }
    Ok(())
}

/// Edit applied to a locked due; returns true when it changed anything.
///
/// The store re-derives status after the edit and never persists a change
/// to `paid` made here.
pub type DueRevision<'a> = dyn Fn(&mut Due) -> bool + Send + Sync + 'a;

/// Outcome of a due revision
#[derive(Debug, Clone)]
pub struct RevisedDue {
    pub due: Due,
    pub changed: bool,
}

/// Outcome of applying or reverting a payment
#[derive(Debug, Clone)]
pub struct LedgerUpdate {
    pub payment: Payment,
    pub due: Due,
    /// False when the call was a no-op (payment already in the target state)
    pub changed: bool,
}

/// Outcome of an intent status transition
#[derive(Debug, Clone)]
pub struct IntentUpdate {
    pub intent: OnlinePaymentIntent,
    /// Payment produced by a SUCCEEDED transition
    pub payment: Option<Payment>,
    /// Due after crediting the payment
    pub due: Option<Due>,
    pub changed: bool,
}

/// Storage interface for the dues ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new due. Fails with `DuplicateDue` when an active due already
    /// exists for the same (unit, period, concept).
    async fn insert_due(&self, due: &Due) -> StoreResult<Due>;

    async fn find_due(&self, due_id: Uuid) -> StoreResult<Option<Due>>;

    /// All dues of a unit, newest period first
    async fn list_dues_for_unit(&self, unit_id: Uuid) -> StoreResult<Vec<Due>>;

    /// Active dues past their due date that still owe money
    async fn list_past_due(&self, today: NaiveDate) -> StoreResult<Vec<Due>>;

    /// Lock a due, run `revise` on it, re-derive status against the
    /// committed `paid` total and persist.
    async fn revise_due(
        &self,
        due_id: Uuid,
        today: NaiveDate,
        revise: &DueRevision<'_>,
    ) -> StoreResult<RevisedDue>;

    /// Move every active, unpaid, past-due PENDING due to OVERDUE
    async fn mark_overdue(&self, today: NaiveDate) -> StoreResult<u64>;

    /// Insert a payment in PENDING_APPLICATION. Fails with
    /// `DuplicateReference` when (method, reference) is already taken.
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<Payment>;

    async fn find_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>>;

    /// Payments matching `filter`, newest first
    async fn list_payments(&self, filter: &PaymentFilter) -> StoreResult<Vec<Payment>>;

    /// Insert a payment and apply it in one atomic unit; a failure leaves
    /// neither the payment nor the due's paid total behind. Fails with
    /// `DueInactive` or `ExceedsBalance` when the due, as locked, cannot
    /// take the amount.
    async fn record_payment(&self, payment: &Payment, today: NaiveDate)
        -> StoreResult<LedgerUpdate>;

    /// Commit a pending payment into its due. No-op unless the payment is
    /// PENDING_APPLICATION.
    async fn apply_payment(&self, payment_id: Uuid, today: NaiveDate)
        -> StoreResult<LedgerUpdate>;

    /// Revert a payment, removing its amount from the due exactly once.
    /// No-op when the payment is already REVERTED.
    async fn revert_payment(
        &self,
        payment_id: Uuid,
        today: NaiveDate,
    ) -> StoreResult<LedgerUpdate>;

    /// Insert an intent. Fails with `DuplicateIntent` when (provider,
    /// provider intent id) is already registered, and with `DueInactive` or
    /// `ExceedsBalance` like `record_payment`.
    async fn insert_intent(&self, intent: &OnlinePaymentIntent)
        -> StoreResult<OnlinePaymentIntent>;

    async fn find_intent(&self, intent_id: Uuid) -> StoreResult<Option<OnlinePaymentIntent>>;

    async fn find_intent_by_provider_id(
        &self,
        provider: &str,
        provider_intent_id: &str,
    ) -> StoreResult<Option<OnlinePaymentIntent>>;

    /// Non-monetary transition (REQUIRES_ACTION, FAILED, CANCELED).
    /// Transitions out of a terminal status are ignored.
    async fn transition_intent(
        &self,
        intent_id: Uuid,
        next: IntentStatus,
    ) -> StoreResult<IntentUpdate>;

    /// Mark an intent SUCCEEDED, and on the first such transition create an
    /// ONLINE payment referencing the provider intent id and apply it, all
    /// in one atomic unit. Repeated calls are no-ops. An ONLINE payment
    /// already holding the reference is linked only when it belongs to the
    /// intent's due; otherwise the call fails with `Integrity`.
    async fn succeed_intent(&self, intent_id: Uuid, today: NaiveDate)
        -> StoreResult<IntentUpdate>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DuplicateReference {
            method: PaymentMethod::Online,
            reference: "pi_123".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Reference 'pi_123' already recorded for payment method ONLINE"
        );
    }

    #[test]
    fn test_check_chargeable() {
        use rust_decimal_macros::dec;

        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut due = Due::issue(
            Uuid::new_v4(),
            "2024-03",
            "COMMON_EXPENSES",
            dec!(100.00),
            false,
            dec!(0),
            dec!(0),
            dec!(0),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            today,
        );
        due.paid = dec!(70.00);

        assert!(check_chargeable(&due, dec!(30.00)).is_ok());
        assert!(matches!(
            check_chargeable(&due, dec!(30.01)),
            Err(StoreError::ExceedsBalance { balance, .. }) if balance == dec!(30.00)
        ));

        due.is_active = false;
        assert!(matches!(
            check_chargeable(&due, dec!(1.00)),
            Err(StoreError::DueInactive(_))
        ));
    }
}
