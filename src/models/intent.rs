use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Provider used when a request does not name one
pub const DEFAULT_PROVIDER: &str = "STRIPE";

/// Currency used when a request does not name one
pub const DEFAULT_CURRENCY: &str = "USD";

/// Status of an online payment intent as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "intent_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Created,
    RequiresAction,
    Succeeded,
    Failed,
    Canceled,
}

impl IntentStatus {
    /// SUCCEEDED, FAILED and CANCELED absorb every later event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Succeeded | IntentStatus::Failed | IntentStatus::Canceled
        )
    }

    pub fn can_transition_to(&self, next: IntentStatus) -> bool {
        match self {
            IntentStatus::Created => next != IntentStatus::Created,
            IntentStatus::RequiresAction => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Created => "CREATED",
            IntentStatus::RequiresAction => "REQUIRES_ACTION",
            IntentStatus::Succeeded => "SUCCEEDED",
            IntentStatus::Failed => "FAILED",
            IntentStatus::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Online payment intent record from the online_payment_intents table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OnlinePaymentIntent {
    pub id: Uuid,
    pub due_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub provider: String,
    pub provider_intent_id: String,
    pub status: IntentStatus,
    /// Payment produced when the intent succeeded
    pub payment_id: Option<Uuid>,
    pub created_by: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OnlinePaymentIntent {
    pub fn new(
        due_id: Uuid,
        amount: Decimal,
        currency: impl Into<String>,
        provider: impl Into<String>,
        provider_intent_id: impl Into<String>,
        created_by: Option<String>,
        metadata: JsonValue,
    ) -> Self {
        let now = Utc::now();
        OnlinePaymentIntent {
            id: Uuid::new_v4(),
            due_id,
            amount,
            currency: currency.into(),
            provider: provider.into(),
            provider_intent_id: provider_intent_id.into(),
            status: IntentStatus::Created,
            payment_id: None,
            created_by,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}
