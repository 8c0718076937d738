use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Payment, PaymentFilter, PaymentMethod, PaymentState};

const PAYMENT_COLUMNS: &str = r#"
    id, due_id, amount, method, reference, state, created_by, paid_on,
    created_at, applied_at, reverted_at
"#;

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
) -> Result<Payment, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO payments (
            id, due_id, amount, method, reference, state, created_by, paid_on, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {PAYMENT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Payment>(&sql)
        .bind(payment.id)
        .bind(payment.due_id)
        .bind(payment.amount)
        .bind(payment.method)
        .bind(&payment.reference)
        .bind(payment.state)
        .bind(&payment.created_by)
        .bind(payment.paid_on)
        .bind(payment.created_at)
        .fetch_one(&mut **tx)
        .await
}

/// Insert unless (method, reference) is already taken; None on conflict
pub async fn insert_if_absent(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
) -> Result<Option<Payment>, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO payments (
            id, due_id, amount, method, reference, state, created_by, paid_on, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (method, reference) WHERE reference <> '' DO NOTHING
        RETURNING {PAYMENT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Payment>(&sql)
        .bind(payment.id)
        .bind(payment.due_id)
        .bind(payment.amount)
        .bind(payment.method)
        .bind(&payment.reference)
        .bind(payment.state)
        .bind(&payment.created_by)
        .bind(payment.paid_on)
        .bind(payment.created_at)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn find_by_id(pool: &PgPool, payment_id: Uuid) -> Result<Option<Payment>, sqlx::Error> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
    sqlx::query_as::<_, Payment>(&sql)
        .bind(payment_id)
        .fetch_optional(pool)
        .await
}

pub async fn find_for_update(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
) -> Result<Option<Payment>, sqlx::Error> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE");
    sqlx::query_as::<_, Payment>(&sql)
        .bind(payment_id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn find_by_reference_for_update(
    tx: &mut Transaction<'_, Postgres>,
    method: PaymentMethod,
    reference: &str,
) -> Result<Option<Payment>, sqlx::Error> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE method = $1 AND reference = $2 FOR UPDATE"
    );
    sqlx::query_as::<_, Payment>(&sql)
        .bind(method)
        .bind(reference)
        .fetch_optional(&mut **tx)
        .await
}

/// Record the payment's new state along with the matching timestamp
pub async fn set_state(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
    state: PaymentState,
) -> Result<Payment, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE payments SET
            state = $2,
            applied_at = CASE WHEN $2 = 'APPLIED'::payment_state THEN NOW() ELSE applied_at END,
            reverted_at = CASE WHEN $2 = 'REVERTED'::payment_state THEN NOW() ELSE reverted_at END
        WHERE id = $1
        RETURNING {PAYMENT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Payment>(&sql)
        .bind(payment_id)
        .bind(state)
        .fetch_one(&mut **tx)
        .await
}

pub async fn list(pool: &PgPool, filter: &PaymentFilter) -> Result<Vec<Payment>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {PAYMENT_COLUMNS} FROM payments
        WHERE ($1::uuid IS NULL OR due_id = $1)
          AND ($2::boolean IS NULL OR (state <> 'REVERTED') = $2)
          AND ($3::payment_method IS NULL OR method = $3)
          AND ($4::payment_state IS NULL OR state = $4)
        ORDER BY created_at DESC
        LIMIT $5
        "#
    );
    sqlx::query_as::<_, Payment>(&sql)
        .bind(filter.due_id)
        .bind(filter.valid)
        .bind(filter.method)
        .bind(filter.state)
        .bind(filter.limit)
        .fetch_all(pool)
        .await
}
