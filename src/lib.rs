pub mod config;
pub mod contracts;
pub mod db;
pub mod models;
pub mod money;
pub mod provider;
pub mod registry;
pub mod repos;
pub mod services;
pub mod store;
pub mod validation;

pub use registry::{InMemoryUnitRegistry, PgUnitRegistry, UnitRegistry};
pub use store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore, StoreError};
