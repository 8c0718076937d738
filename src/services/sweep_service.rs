//! Periodic ledger maintenance
//!
//! One sweep resumes payments left in PENDING_APPLICATION, moves unpaid
//! past-due dues to OVERDUE and, when a fee is configured, charges the
//! monthly late fee on every past-due due with a balance.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{PaymentFilter, PaymentState};
use crate::services::due_service::{self, DueError};
use crate::services::payment_service::{self, PaymentError};
use crate::store::LedgerStore;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Due(#[from] DueError),

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub payments_resumed: u64,
    pub marked_overdue: u64,
    pub late_fees_charged: u64,
}

pub async fn run_sweep(
    store: &dyn LedgerStore,
    late_fee: Decimal,
    today: NaiveDate,
) -> Result<SweepReport, SweepError> {
    let mut report = SweepReport::default();

    let pending = store
        .list_payments(&PaymentFilter {
            state: Some(PaymentState::PendingApplication),
            ..Default::default()
        })
        .await
        .map_err(PaymentError::from)?;
    for payment in pending {
        if payment_service::apply_payment(store, payment.id, today)
            .await?
            .changed
        {
            report.payments_resumed += 1;
        }
    }

    report.marked_overdue = due_service::refresh_overdue(store, today).await?;

    if late_fee > Decimal::ZERO {
        let past_due = store.list_past_due(today).await.map_err(DueError::from)?;
        for due in past_due {
            let (_, charged) = due_service::assess_late_fee(store, due.id, late_fee, today).await?;
            if charged {
                report.late_fees_charged += 1;
            }
        }
    }

    tracing::info!(
        today = %today,
        payments_resumed = report.payments_resumed,
        marked_overdue = report.marked_overdue,
        late_fees_charged = report.late_fees_charged,
        "Ledger sweep complete"
    );

    Ok(report)
}
