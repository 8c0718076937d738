//! Unit registry seam
//!
//! Units are owned by the administrative side of the system; the ledger only
//! reads them to snapshot coefficients and to enumerate who gets billed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::Unit;
use crate::repos::unit_repo;
use crate::store::StoreResult;

#[async_trait]
pub trait UnitRegistry: Send + Sync {
    async fn find_unit(&self, unit_id: Uuid) -> StoreResult<Option<Unit>>;

    /// Units that take part in billing cycles
    async fn list_active_units(&self) -> StoreResult<Vec<Unit>>;
}

/// Registry reading the `units` table
#[derive(Clone)]
pub struct PgUnitRegistry {
    pool: PgPool,
}

impl PgUnitRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitRegistry for PgUnitRegistry {
    async fn find_unit(&self, unit_id: Uuid) -> StoreResult<Option<Unit>> {
        Ok(unit_repo::find_by_id(&self.pool, unit_id).await?)
    }

    async fn list_active_units(&self) -> StoreResult<Vec<Unit>> {
        Ok(unit_repo::list_active(&self.pool).await?)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUnitRegistry {
    units: Arc<RwLock<HashMap<Uuid, Unit>>>,
}

impl InMemoryUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, unit: Unit) {
        self.units.write().await.insert(unit.id, unit);
    }
}

#[async_trait]
impl UnitRegistry for InMemoryUnitRegistry {
    async fn find_unit(&self, unit_id: Uuid) -> StoreResult<Option<Unit>> {
        Ok(self.units.read().await.get(&unit_id).cloned())
    }

    async fn list_active_units(&self) -> StoreResult<Vec<Unit>> {
        let mut units: Vec<Unit> = self
            .units
            .read()
            .await
            .values()
            .filter(|u| u.is_active)
            .cloned()
            .collect();
        units.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_in_memory_lists_only_active_units() {
        let registry = InMemoryUnitRegistry::new();
        let a = Unit {
            id: Uuid::new_v4(),
            label: "A-101".to_string(),
            coefficient: dec!(2.50),
            is_active: true,
        };
        let b = Unit {
            id: Uuid::new_v4(),
            label: "B-202".to_string(),
            coefficient: dec!(3.00),
            is_active: false,
        };
        registry.upsert(a.clone()).await;
        registry.upsert(b.clone()).await;

        let active = registry.list_active_units().await.unwrap();
        assert_eq!(active, vec![a]);
        assert_eq!(registry.find_unit(b.id).await.unwrap(), Some(b));
    }
}
