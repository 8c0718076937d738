use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a payment was collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Card,
    Online,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Transfer => "TRANSFER",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Online => "ONLINE",
            PaymentMethod::Other => "OTHER",
        }
    }

    /// Gateway methods must carry the provider reference used for dedup
    pub fn requires_reference(&self) -> bool {
        matches!(self, PaymentMethod::Online)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application state of a payment.
///
/// PENDING_APPLICATION -> APPLIED -> REVERTED, or PENDING_APPLICATION -> REVERTED.
/// REVERTED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_state", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    PendingApplication,
    Applied,
    Reverted,
}

impl PaymentState {
    pub fn can_apply(&self) -> bool {
        matches!(self, PaymentState::PendingApplication)
    }

    pub fn can_revert(&self) -> bool {
        !matches!(self, PaymentState::Reverted)
    }
}

/// Payment record from the payments table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub due_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    /// External reference; empty when none was given
    pub reference: String,
    pub state: PaymentState,
    pub created_by: Option<String>,
    pub paid_on: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub reverted_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// New payment, not yet applied to its due
    pub fn new(
        due_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
        reference: impl Into<String>,
        created_by: Option<String>,
        paid_on: NaiveDate,
    ) -> Self {
        Payment {
            id: Uuid::new_v4(),
            due_id,
            amount,
            method,
            reference: reference.into(),
            state: PaymentState::PendingApplication,
            created_by,
            paid_on,
            created_at: Utc::now(),
            applied_at: None,
            reverted_at: None,
        }
    }

    /// A payment stays valid until it is reverted
    pub fn is_valid(&self) -> bool {
        self.state != PaymentState::Reverted
    }

    pub fn is_applied(&self) -> bool {
        self.state == PaymentState::Applied
    }

    /// Signed change this payment contributes to its due's paid total
    /// when moving into `next`.
    pub fn paid_delta(&self, next: PaymentState) -> Decimal {
        match (self.state, next) {
            (PaymentState::PendingApplication, PaymentState::Applied) => self.amount,
            (PaymentState::Applied, PaymentState::Reverted) => -self.amount,
            _ => Decimal::ZERO,
        }
    }
}

/// Filters for listing payments
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub due_id: Option<Uuid>,
    pub valid: Option<bool>,
    pub method: Option<PaymentMethod>,
    pub state: Option<PaymentState>,
    pub limit: Option<i64>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.due_id.map_or(true, |id| payment.due_id == id)
            && self.valid.map_or(true, |v| payment.is_valid() == v)
            && self.method.map_or(true, |m| payment.method == m)
            && self.state.map_or(true, |s| payment.state == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payment(state: PaymentState) -> Payment {
        let mut p = Payment::new(
            Uuid::new_v4(),
            dec!(25.00),
            PaymentMethod::Cash,
            "",
            None,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        );
        p.state = state;
        p
    }

    #[test]
    fn test_state_guards() {
        assert!(PaymentState::PendingApplication.can_apply());
        assert!(!PaymentState::Applied.can_apply());
        assert!(!PaymentState::Reverted.can_apply());
        assert!(PaymentState::PendingApplication.can_revert());
        assert!(PaymentState::Applied.can_revert());
        assert!(!PaymentState::Reverted.can_revert());
    }

    #[test]
    fn test_paid_delta() {
        assert_eq!(payment(PaymentState::PendingApplication).paid_delta(PaymentState::Applied), dec!(25.00));
        assert_eq!(payment(PaymentState::Applied).paid_delta(PaymentState::Reverted), dec!(-25.00));
        // never applied: reverting removes nothing
        assert_eq!(payment(PaymentState::PendingApplication).paid_delta(PaymentState::Reverted), dec!(0));
        assert_eq!(payment(PaymentState::Reverted).paid_delta(PaymentState::Reverted), dec!(0));
    }

    #[test]
    fn test_validity_and_filter() {
        let applied = payment(PaymentState::Applied);
        let reverted = payment(PaymentState::Reverted);
        assert!(applied.is_valid());
        assert!(!reverted.is_valid());

        let filter = PaymentFilter {
            valid: Some(true),
            method: Some(PaymentMethod::Cash),
            ..Default::default()
        };
        assert!(filter.matches(&applied));
        assert!(!filter.matches(&reverted));
    }

    #[test]
    fn test_reference_requirement() {
        assert!(PaymentMethod::Online.requires_reference());
        assert!(!PaymentMethod::Cash.requires_reference());
        assert_eq!(PaymentMethod::Transfer.to_string(), "TRANSFER");
    }
}
