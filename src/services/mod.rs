pub mod due_service;
pub mod intent_service;
pub mod payment_service;
pub mod statement_service;
pub mod sweep_service;
