use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Unit;

pub async fn find_by_id(pool: &PgPool, unit_id: Uuid) -> Result<Option<Unit>, sqlx::Error> {
    sqlx::query_as::<_, Unit>(
        "SELECT id, label, coefficient, is_active FROM units WHERE id = $1",
    )
    .bind(unit_id)
    .fetch_optional(pool)
    .await
}

pub async fn list_active(pool: &PgPool) -> Result<Vec<Unit>, sqlx::Error> {
    sqlx::query_as::<_, Unit>(
        "SELECT id, label, coefficient, is_active FROM units WHERE is_active ORDER BY label",
    )
    .fetch_all(pool)
    .await
}
