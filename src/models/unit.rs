use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Residential unit as supplied by the unit registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Unit {
    pub id: Uuid,
    pub label: String,
    /// Share of common expenses, in percent (0-100)
    pub coefficient: Decimal,
    pub is_active: bool,
}
