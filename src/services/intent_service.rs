//! Online payment intent service
//!
//! Intents are created when a resident starts an online payment and are
//! driven to a terminal status by provider callbacks. Reaching SUCCEEDED
//! credits the due through an ONLINE payment whose reference is the
//! provider intent id, so duplicate deliveries cannot credit twice.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::{IntentStatus, OnlinePaymentIntent, DEFAULT_PROVIDER};
use crate::provider::webhook::WebhookSettings;
use crate::provider::{ProviderError, ProviderEvent, ProviderEventKind};
use crate::store::{IntentUpdate, LedgerStore, StoreError};
use crate::validation::{
    validate_currency, validate_positive_amount, validate_provider_intent_id, ValidationError,
};

#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Due not found: {0}")]
    DueNotFound(Uuid),

    #[error("Due is inactive: {0}")]
    Inactive(Uuid),

    #[error("Intent amount {amount} exceeds the outstanding balance of {balance}")]
    ExceedsBalance { amount: Decimal, balance: Decimal },

    #[error("Online payment intent not found: {0}")]
    NotFound(Uuid),

    #[error("Provider event {0} carries no intent id")]
    MissingIntentId(String),

    #[error("Webhook rejected: {0}")]
    Provider(#[from] ProviderError),
}

pub type IntentResult<T> = Result<T, IntentError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIntentRequest {
    pub due_id: Uuid,
    /// Defaults to the due's outstanding balance
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    pub provider_intent_id: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

/// Outcome of a provider webhook delivery
#[derive(Debug, Clone)]
pub enum EventDisposition {
    /// The event was routed to its intent (the update may still be a no-op)
    Handled(IntentUpdate),
    /// No intent is registered under the event's provider intent id
    UnknownIntent(String),
    /// Event type the ledger does not react to
    Ignored(String),
}

fn map_store_error(err: StoreError) -> IntentError {
    match err {
        StoreError::IntentNotFound(id) => IntentError::NotFound(id),
        StoreError::DueNotFound(id) => IntentError::DueNotFound(id),
        StoreError::DueInactive(id) => IntentError::Inactive(id),
        StoreError::ExceedsBalance { amount, balance, .. } => {
            IntentError::ExceedsBalance { amount, balance }
        }
        other => IntentError::Store(other),
    }
}

/// Register an intent for part or all of a due's balance. `default_currency`
/// (the configured billing currency) applies when the request names none.
///
/// The balance read here only supplies the default amount; the store
/// re-checks the amount against the locked due when inserting.
pub async fn create_intent(
    store: &dyn LedgerStore,
    req: NewIntentRequest,
    default_currency: &str,
) -> IntentResult<OnlinePaymentIntent> {
    let provider_intent_id = req.provider_intent_id.trim().to_string();
    validate_provider_intent_id(&provider_intent_id)?;
    let currency = req
        .currency
        .as_deref()
        .map(str::trim)
        .map(str::to_uppercase)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| default_currency.trim().to_uppercase());
    validate_currency(&currency)?;
    let provider = req
        .provider
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_uppercase)
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());

    let due = store
        .find_due(req.due_id)
        .await?
        .ok_or(IntentError::DueNotFound(req.due_id))?;
    if !due.is_active {
        return Err(IntentError::Inactive(due.id));
    }

    let balance = due.balance();
    let amount = req.amount.unwrap_or(balance);
    validate_positive_amount("amount", amount)?;
    if amount > balance {
        return Err(IntentError::ExceedsBalance { amount, balance });
    }

    let intent = OnlinePaymentIntent::new(
        due.id,
        amount,
        currency,
        provider,
        provider_intent_id,
        req.created_by,
        req.metadata.unwrap_or_else(|| JsonValue::Object(Default::default())),
    );
    let intent = store.insert_intent(&intent).await.map_err(map_store_error)?;

    tracing::info!(
        intent_id = %intent.id,
        due_id = %intent.due_id,
        provider = %intent.provider,
        provider_intent_id = %intent.provider_intent_id,
        amount = %intent.amount,
        "Online payment intent created"
    );

    Ok(intent)
}

async fn transition(
    store: &dyn LedgerStore,
    intent_id: Uuid,
    next: IntentStatus,
) -> IntentResult<IntentUpdate> {
    let update = store
        .transition_intent(intent_id, next)
        .await
        .map_err(map_store_error)?;

    if update.changed {
        tracing::info!(intent_id = %intent_id, status = %next, "Intent status updated");
    } else {
        tracing::warn!(
            intent_id = %intent_id,
            current = %update.intent.status,
            requested = %next,
            "Intent transition not applicable, ignoring"
        );
    }
    Ok(update)
}

pub async fn mark_requires_action(
    store: &dyn LedgerStore,
    intent_id: Uuid,
) -> IntentResult<IntentUpdate> {
    transition(store, intent_id, IntentStatus::RequiresAction).await
}

pub async fn mark_failed(store: &dyn LedgerStore, intent_id: Uuid) -> IntentResult<IntentUpdate> {
    transition(store, intent_id, IntentStatus::Failed).await
}

pub async fn mark_canceled(store: &dyn LedgerStore, intent_id: Uuid) -> IntentResult<IntentUpdate> {
    transition(store, intent_id, IntentStatus::Canceled).await
}

/// Move the intent to SUCCEEDED and credit its due exactly once
pub async fn mark_succeeded(
    store: &dyn LedgerStore,
    intent_id: Uuid,
    today: NaiveDate,
) -> IntentResult<IntentUpdate> {
    let update = store
        .succeed_intent(intent_id, today)
        .await
        .map_err(map_store_error)?;

    if update.changed {
        tracing::info!(
            intent_id = %intent_id,
            payment_id = ?update.payment.as_ref().map(|p| p.id),
            paid = ?update.due.as_ref().map(|d| d.paid),
            "Intent succeeded, due credited"
        );
    } else {
        tracing::warn!(
            intent_id = %intent_id,
            status = %update.intent.status,
            "Duplicate or late success callback, ignoring"
        );
    }
    Ok(update)
}

/// Route a verified provider event to its intent
pub async fn handle_provider_event(
    store: &dyn LedgerStore,
    event: &ProviderEvent,
    today: NaiveDate,
) -> IntentResult<EventDisposition> {
    let kind = event.kind();
    if kind == ProviderEventKind::Other {
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring provider event");
        return Ok(EventDisposition::Ignored(event.event_type.clone()));
    }

    let Some(provider_intent_id) = event.intent_id() else {
        tracing::warn!(event_id = %event.id, event_type = %event.event_type, "Provider event without intent id");
        return Err(IntentError::MissingIntentId(event.id.clone()));
    };

    let Some(intent) = store
        .find_intent_by_provider_id(&event.provider, provider_intent_id)
        .await?
    else {
        tracing::warn!(
            event_id = %event.id,
            provider = %event.provider,
            provider_intent_id = %provider_intent_id,
            "Provider event for unknown intent"
        );
        return Ok(EventDisposition::UnknownIntent(provider_intent_id.to_string()));
    };

    let update = match kind {
        ProviderEventKind::Succeeded => mark_succeeded(store, intent.id, today).await?,
        ProviderEventKind::PaymentFailed => mark_failed(store, intent.id).await?,
        ProviderEventKind::Canceled => mark_canceled(store, intent.id).await?,
        ProviderEventKind::RequiresAction => mark_requires_action(store, intent.id).await?,
        ProviderEventKind::Other => return Ok(EventDisposition::Ignored(event.event_type.clone())),
    };

    Ok(EventDisposition::Handled(update))
}

/// Authenticate a raw webhook delivery with the configured secret and
/// tolerance, then route it. Deliveries are dated by `now`.
pub async fn handle_webhook(
    store: &dyn LedgerStore,
    settings: &WebhookSettings,
    raw_body: &str,
    signature_header: &str,
    now: DateTime<Utc>,
) -> IntentResult<EventDisposition> {
    let event = settings.parse(raw_body, signature_header, now).map_err(|e| {
        tracing::warn!(error = %e, "Webhook delivery rejected");
        e
    })?;
    handle_provider_event(store, &event, now.date_naive()).await
}
