pub mod due_repo;
pub mod intent_repo;
pub mod outbox_repo;
pub mod payment_repo;
pub mod unit_repo;
