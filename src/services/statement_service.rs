//! Account statement for one unit

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Due, DueStatus};
use crate::store::{LedgerStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementLine {
    pub due: Due,
    pub balance: Decimal,
    /// Status as of the statement date
    pub status: DueStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatementSummary {
    pub outstanding: Decimal,
    pub total_billed: Decimal,
    pub total_paid: Decimal,
    pub overdue_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountStatement {
    pub unit_id: Uuid,
    pub as_of: NaiveDate,
    /// Newest period first, cancelled dues included
    pub lines: Vec<StatementLine>,
    /// Active dues only
    pub summary: StatementSummary,
}

pub async fn account_statement(
    store: &dyn LedgerStore,
    unit_id: Uuid,
    today: NaiveDate,
) -> StoreResult<AccountStatement> {
    let dues = store.list_dues_for_unit(unit_id).await?;

    let mut summary = StatementSummary::default();
    let lines: Vec<StatementLine> = dues
        .into_iter()
        .map(|due| {
            let status = due.derive_status(today);
            let balance = due.balance();
            if due.is_active {
                summary.outstanding += balance;
                summary.total_billed += due.total;
                summary.total_paid += due.paid;
                if status == DueStatus::Overdue {
                    summary.overdue_count += 1;
                }
            }
            StatementLine {
                due,
                balance,
                status,
            }
        })
        .collect();

    tracing::debug!(
        unit_id = %unit_id,
        dues = lines.len(),
        outstanding = %summary.outstanding,
        "Account statement built"
    );

    Ok(AccountStatement {
        unit_id,
        as_of: today,
        lines,
        summary,
    })
}
