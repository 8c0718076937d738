//! Ledger outbox
//!
//! Events are written in the same transaction as the balance change they
//! describe and picked up later by a relay.

use sqlx::{Postgres, Transaction};

use crate::contracts::LedgerEvent;

pub async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &LedgerEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO ledger_outbox
            (event_id, event_type, aggregate_type, aggregate_id, payload, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(event.event_id)
    .bind(&event.event_type)
    .bind(&event.aggregate_type)
    .bind(&event.aggregate_id)
    .bind(&event.payload)
    .bind(event.occurred_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
