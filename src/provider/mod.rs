//! Payment provider callbacks
//!
//! The provider notifies intent status changes through signed webhook
//! deliveries. This module only knows how to authenticate and decode them;
//! reconciliation lives in the intent service.

pub mod webhook;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::models::DEFAULT_PROVIDER;

#[derive(Error, Debug, PartialEq)]
pub enum ProviderError {
    #[error("Webhook signature header is malformed")]
    MalformedSignature,

    #[error("Webhook timestamp is outside the tolerance window")]
    StaleTimestamp,

    #[error("Webhook signature verification failed")]
    SignatureMismatch,

    #[error("Webhook secret is not configured")]
    MissingSecret,

    #[error("Webhook payload could not be parsed: {0}")]
    Parse(String),
}

/// What a provider event means for an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventKind {
    Succeeded,
    PaymentFailed,
    Canceled,
    RequiresAction,
    /// Anything the ledger does not react to
    Other,
}

/// Webhook event as delivered by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    pub data: JsonValue,
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

impl ProviderEvent {
    pub fn kind(&self) -> ProviderEventKind {
        match self.event_type.as_str() {
            "payment_intent.succeeded" => ProviderEventKind::Succeeded,
            "payment_intent.payment_failed" => ProviderEventKind::PaymentFailed,
            "payment_intent.canceled" => ProviderEventKind::Canceled,
            "payment_intent.requires_action" => ProviderEventKind::RequiresAction,
            _ => ProviderEventKind::Other,
        }
    }

    /// Provider-side intent id carried by the event object
    pub fn intent_id(&self) -> Option<&str> {
        self.data
            .get("object")
            .and_then(|o| o.get("id"))
            .or_else(|| self.data.get("id"))
            .and_then(JsonValue::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_and_intent_id() {
        let event: ProviderEvent = serde_json::from_str(
            r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_123","amount":4000}}}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), ProviderEventKind::Succeeded);
        assert_eq!(event.intent_id(), Some("pi_123"));
        assert_eq!(event.provider, "STRIPE");

        let flat: ProviderEvent = serde_json::from_str(
            r#"{"id":"evt_2","type":"charge.refunded","provider":"STRIPE","data":{"id":"pi_9"}}"#,
        )
        .unwrap();
        assert_eq!(flat.kind(), ProviderEventKind::Other);
        assert_eq!(flat.intent_id(), Some("pi_9"));
    }
}
