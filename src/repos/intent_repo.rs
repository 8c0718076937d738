use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{IntentStatus, OnlinePaymentIntent};

const INTENT_COLUMNS: &str = r#"
    id, due_id, amount, currency, provider, provider_intent_id, status,
    payment_id, created_by, metadata, created_at, updated_at
"#;

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    intent: &OnlinePaymentIntent,
) -> Result<OnlinePaymentIntent, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO online_payment_intents (
            id, due_id, amount, currency, provider, provider_intent_id, status,
            payment_id, created_by, metadata, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {INTENT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, OnlinePaymentIntent>(&sql)
        .bind(intent.id)
        .bind(intent.due_id)
        .bind(intent.amount)
        .bind(&intent.currency)
        .bind(&intent.provider)
        .bind(&intent.provider_intent_id)
        .bind(intent.status)
        .bind(intent.payment_id)
        .bind(&intent.created_by)
        .bind(&intent.metadata)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .fetch_one(&mut **tx)
        .await
}

pub async fn find_by_id(
    pool: &PgPool,
    intent_id: Uuid,
) -> Result<Option<OnlinePaymentIntent>, sqlx::Error> {
    let sql = format!("SELECT {INTENT_COLUMNS} FROM online_payment_intents WHERE id = $1");
    sqlx::query_as::<_, OnlinePaymentIntent>(&sql)
        .bind(intent_id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_provider_id(
    pool: &PgPool,
    provider: &str,
    provider_intent_id: &str,
) -> Result<Option<OnlinePaymentIntent>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {INTENT_COLUMNS} FROM online_payment_intents
        WHERE provider = $1 AND provider_intent_id = $2
        "#
    );
    sqlx::query_as::<_, OnlinePaymentIntent>(&sql)
        .bind(provider)
        .bind(provider_intent_id)
        .fetch_optional(pool)
        .await
}

/// Lock the intent row so concurrent callbacks for it queue up
pub async fn find_for_update(
    tx: &mut Transaction<'_, Postgres>,
    intent_id: Uuid,
) -> Result<Option<OnlinePaymentIntent>, sqlx::Error> {
    let sql = format!(
        "SELECT {INTENT_COLUMNS} FROM online_payment_intents WHERE id = $1 FOR UPDATE"
    );
    sqlx::query_as::<_, OnlinePaymentIntent>(&sql)
        .bind(intent_id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    intent_id: Uuid,
    status: IntentStatus,
    payment_id: Option<Uuid>,
) -> Result<OnlinePaymentIntent, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE online_payment_intents SET
            status = $2,
            payment_id = COALESCE($3, payment_id),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {INTENT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, OnlinePaymentIntent>(&sql)
        .bind(intent_id)
        .bind(status)
        .bind(payment_id)
        .fetch_one(&mut **tx)
        .await
}
