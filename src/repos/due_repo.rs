//! Dues table access
//!
//! Writes take the caller's transaction; `paid` is only ever changed by
//! `add_paid`, which leaves the arithmetic to PostgreSQL.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Due, DueStatus};

const DUE_COLUMNS: &str = r#"
    id, unit_id, period, concept, base_amount, uses_coefficient,
    coefficient_snapshot, computed_amount, discount, late_fee, total, paid,
    due_date, status, is_active, late_fee_period, created_at, updated_at
"#;

pub async fn insert(tx: &mut Transaction<'_, Postgres>, due: &Due) -> Result<Due, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO dues (
            id, unit_id, period, concept, base_amount, uses_coefficient,
            coefficient_snapshot, computed_amount, discount, late_fee, total, paid,
            due_date, status, is_active, late_fee_period, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        RETURNING {DUE_COLUMNS}
        "#
    );

    sqlx::query_as::<_, Due>(&sql)
        .bind(due.id)
        .bind(due.unit_id)
        .bind(&due.period)
        .bind(&due.concept)
        .bind(due.base_amount)
        .bind(due.uses_coefficient)
        .bind(due.coefficient_snapshot)
        .bind(due.computed_amount)
        .bind(due.discount)
        .bind(due.late_fee)
        .bind(due.total)
        .bind(due.paid)
        .bind(due.due_date)
        .bind(due.status)
        .bind(due.is_active)
        .bind(&due.late_fee_period)
        .bind(due.created_at)
        .bind(due.updated_at)
        .fetch_one(&mut **tx)
        .await
}

pub async fn find_by_id(pool: &PgPool, due_id: Uuid) -> Result<Option<Due>, sqlx::Error> {
    let sql = format!("SELECT {DUE_COLUMNS} FROM dues WHERE id = $1");
    sqlx::query_as::<_, Due>(&sql)
        .bind(due_id)
        .fetch_optional(pool)
        .await
}

/// Load a due and hold its row lock until the transaction ends
pub async fn find_for_update(
    tx: &mut Transaction<'_, Postgres>,
    due_id: Uuid,
) -> Result<Option<Due>, sqlx::Error> {
    let sql = format!("SELECT {DUE_COLUMNS} FROM dues WHERE id = $1 FOR UPDATE");
    sqlx::query_as::<_, Due>(&sql)
        .bind(due_id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn list_for_unit(pool: &PgPool, unit_id: Uuid) -> Result<Vec<Due>, sqlx::Error> {
    let sql = format!(
        "SELECT {DUE_COLUMNS} FROM dues WHERE unit_id = $1 ORDER BY period DESC, created_at DESC"
    );
    sqlx::query_as::<_, Due>(&sql)
        .bind(unit_id)
        .fetch_all(pool)
        .await
}

/// Active dues past their due date with an outstanding balance
pub async fn list_past_due(pool: &PgPool, today: NaiveDate) -> Result<Vec<Due>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {DUE_COLUMNS} FROM dues
        WHERE is_active AND due_date < $1 AND total > paid
        ORDER BY due_date, id
        "#
    );
    sqlx::query_as::<_, Due>(&sql)
        .bind(today)
        .fetch_all(pool)
        .await
}

/// Persist everything except `paid`
pub async fn update_terms(
    tx: &mut Transaction<'_, Postgres>,
    due: &Due,
) -> Result<Due, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE dues SET
            base_amount = $2,
            uses_coefficient = $3,
            coefficient_snapshot = $4,
            computed_amount = $5,
            discount = $6,
            late_fee = $7,
            total = $8,
            due_date = $9,
            status = $10,
            is_active = $11,
            late_fee_period = $12,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {DUE_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Due>(&sql)
        .bind(due.id)
        .bind(due.base_amount)
        .bind(due.uses_coefficient)
        .bind(due.coefficient_snapshot)
        .bind(due.computed_amount)
        .bind(due.discount)
        .bind(due.late_fee)
        .bind(due.total)
        .bind(due.due_date)
        .bind(due.status)
        .bind(due.is_active)
        .bind(&due.late_fee_period)
        .fetch_one(&mut **tx)
        .await
}

/// Atomically add `delta` to the paid total, clamped at zero, and return
/// the freshly committed row. None when the due does not exist.
pub async fn add_paid(
    tx: &mut Transaction<'_, Postgres>,
    due_id: Uuid,
    delta: Decimal,
) -> Result<Option<Due>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE dues SET paid = GREATEST(paid + $2, 0), updated_at = NOW()
        WHERE id = $1
        RETURNING {DUE_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Due>(&sql)
        .bind(due_id)
        .bind(delta)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    due_id: Uuid,
    status: DueStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE dues SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(due_id)
        .bind(status)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// PENDING -> OVERDUE for every active, untouched, past-due due with
/// something to pay. Returns the number of dues moved.
pub async fn mark_overdue(pool: &PgPool, today: NaiveDate) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE dues SET status = 'OVERDUE', updated_at = NOW()
        WHERE is_active
          AND status = 'PENDING'
          AND paid = 0
          AND total > 0
          AND due_date < $1
        "#,
    )
    .bind(today)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
