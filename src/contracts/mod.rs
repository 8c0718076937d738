//! Contract types for events emitted by the ledger
//!
//! Payloads are written to the ledger outbox in the same transaction as the
//! balance change they describe.

pub mod payment_events_v1;

pub use payment_events_v1::*;
