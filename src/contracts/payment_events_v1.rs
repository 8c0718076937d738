use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Due, DueStatus, Payment, PaymentMethod};

pub const PAYMENT_APPLIED: &str = "ledger.payment.applied";
pub const PAYMENT_REVERTED: &str = "ledger.payment.reverted";

/// Payload for ledger.payment.applied and ledger.payment.reverted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLedgerChangeV1 {
    pub payment_id: Uuid,
    pub due_id: Uuid,
    pub unit_id: Uuid,
    pub period: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Due paid total after the change committed
    pub due_paid: Decimal,
    pub due_total: Decimal,
    pub due_status: DueStatus,
}

impl PaymentLedgerChangeV1 {
    pub fn new(payment: &Payment, due: &Due) -> Self {
        PaymentLedgerChangeV1 {
            payment_id: payment.id,
            due_id: due.id,
            unit_id: due.unit_id,
            period: due.period.clone(),
            amount: payment.amount,
            method: payment.method,
            reference: (!payment.reference.is_empty()).then(|| payment.reference.clone()),
            due_paid: due.paid,
            due_total: due.total,
            due_status: due.status,
        }
    }
}

/// Outbox row as written alongside a ledger change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEvent {
    /// Build the outbox event for a payment moving into `applied` or `reverted`
    pub fn payment_change(
        event_type: &str,
        payment: &Payment,
        due: &Due,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(PaymentLedgerChangeV1::new(payment, due))?;
        Ok(LedgerEvent {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            aggregate_type: "payment".to_string(),
            aggregate_id: payment.id.to_string(),
            payload,
            occurred_at: Utc::now(),
        })
    }
}
