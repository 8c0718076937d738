//! Common test utilities for ledger integration tests
//!
//! ## Singleton Pool Pattern
//! PostgreSQL tests in one binary share a single pool, migrated once.
//! When `DATABASE_URL` is not set the pool is `None` and those tests return
//! early.

#![allow(dead_code)]

use chrono::NaiveDate;
use dues_ledger::db::{init_pool, run_migrations};
use dues_ledger::models::{Due, Unit};
use dues_ledger::services::due_service::{self, NewDueRequest};
use dues_ledger::{InMemoryLedgerStore, InMemoryUnitRegistry};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use uuid::Uuid;

static TEST_POOL: OnceCell<Option<PgPool>> = OnceCell::const_new();

/// Shared migrated pool, or None when no database is configured
pub async fn get_test_pool() -> Option<PgPool> {
    if std::env::var("DB_MAX_CONNECTIONS").is_err() {
        std::env::set_var("DB_MAX_CONNECTIONS", "5");
    }
    if std::env::var("DB_ACQUIRE_TIMEOUT_SECS").is_err() {
        std::env::set_var("DB_ACQUIRE_TIMEOUT_SECS", "10");
    }

    TEST_POOL
        .get_or_init(|| async {
            let database_url = std::env::var("DATABASE_URL").ok()?;
            let pool = init_pool(&database_url)
                .await
                .expect("Failed to initialize test pool");
            run_migrations(&pool)
                .await
                .expect("Failed to run migrations");
            Some(pool)
        })
        .await
        .clone()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn unit(label: &str, coefficient: Decimal) -> Unit {
    Unit {
        id: Uuid::new_v4(),
        label: label.to_string(),
        coefficient,
        is_active: true,
    }
}

/// Empty in-memory ledger with one registered unit
pub async fn memory_ledger(coefficient: Decimal) -> (InMemoryUnitRegistry, InMemoryLedgerStore, Unit) {
    let registry = InMemoryUnitRegistry::new();
    let unit = unit("A-101", coefficient);
    registry.upsert(unit.clone()).await;
    (registry, InMemoryLedgerStore::new(), unit)
}

/// Request for a flat (no coefficient) due of `amount`
pub fn flat_due_request(unit_id: Uuid, period: &str, amount: Decimal, due_date: NaiveDate) -> NewDueRequest {
    NewDueRequest {
        unit_id,
        period: period.to_string(),
        concept: None,
        base_amount: amount,
        uses_coefficient: false,
        discount: Decimal::ZERO,
        late_fee: Decimal::ZERO,
        due_date,
    }
}

/// Issue a flat due of `amount` against an in-memory ledger
pub async fn issue_flat_due(
    registry: &InMemoryUnitRegistry,
    store: &InMemoryLedgerStore,
    unit_id: Uuid,
    amount: Decimal,
    due_date: NaiveDate,
    today: NaiveDate,
) -> Due {
    due_service::create_due(
        registry,
        store,
        flat_due_request(unit_id, "2024-03", amount, due_date),
        today,
    )
    .await
    .expect("Failed to issue due")
}
