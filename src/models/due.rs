//! Due (one billing-period obligation for one unit)
//!
//! A due owns its amount computation and its status derivation. Both are
//! pure: they read the due's own fields and never touch storage. The `paid`
//! field is only ever written by the storage layer while applying or
//! reverting a payment.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::{floor_zero, percent_of, round2};

/// Lifecycle status of a due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "due_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DueStatus {
    Pending,
    Partial,
    Overdue,
    Paid,
    Cancelled,
}

impl DueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DueStatus::Pending => "PENDING",
            DueStatus::Partial => "PARTIAL",
            DueStatus::Overdue => "OVERDUE",
            DueStatus::Paid => "PAID",
            DueStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for DueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Due record from the dues table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Due {
    pub id: Uuid,
    pub unit_id: Uuid,
    /// Billing period, `YYYY-MM`
    pub period: String,
    pub concept: String,
    pub base_amount: Decimal,
    pub uses_coefficient: bool,
    /// Unit coefficient (percent) captured when the due was issued
    pub coefficient_snapshot: Decimal,
    pub computed_amount: Decimal,
    pub discount: Decimal,
    pub late_fee: Decimal,
    pub total: Decimal,
    pub paid: Decimal,
    pub due_date: NaiveDate,
    pub status: DueStatus,
    pub is_active: bool,
    /// Calendar month (`YYYY-MM`) in which a late fee was last assessed
    pub late_fee_period: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editable billing terms of a due; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DueTerms {
    pub base_amount: Option<Decimal>,
    pub uses_coefficient: Option<bool>,
    pub coefficient_snapshot: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub late_fee: Option<Decimal>,
}

impl DueTerms {
    pub fn is_empty(&self) -> bool {
        self.base_amount.is_none()
            && self.uses_coefficient.is_none()
            && self.coefficient_snapshot.is_none()
            && self.discount.is_none()
            && self.late_fee.is_none()
    }
}

impl Due {
    /// Build a freshly issued due with amounts computed and status derived
    pub fn issue(
        unit_id: Uuid,
        period: impl Into<String>,
        concept: impl Into<String>,
        base_amount: Decimal,
        uses_coefficient: bool,
        coefficient_snapshot: Decimal,
        discount: Decimal,
        late_fee: Decimal,
        due_date: NaiveDate,
        today: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        let mut due = Due {
            id: Uuid::new_v4(),
            unit_id,
            period: period.into(),
            concept: concept.into(),
            base_amount,
            uses_coefficient,
            coefficient_snapshot,
            computed_amount: Decimal::ZERO,
            discount,
            late_fee,
            total: Decimal::ZERO,
            paid: Decimal::ZERO,
            due_date,
            status: DueStatus::Pending,
            is_active: true,
            late_fee_period: None,
            created_at: now,
            updated_at: now,
        };
        due.recompute_amounts();
        due.refresh_status(today);
        due
    }

    /// Outstanding amount, never negative
    pub fn balance(&self) -> Decimal {
        floor_zero(self.total - self.paid)
    }

    /// Recompute `computed_amount` and `total` from the billing terms.
    ///
    /// Must run after any edit to base, coefficient flag, snapshot, discount
    /// or late fee, and before the status is trusted again.
    pub fn recompute_amounts(&mut self) {
        self.computed_amount = if self.uses_coefficient {
            percent_of(self.base_amount, self.coefficient_snapshot)
        } else {
            round2(self.base_amount)
        };
        self.total = round2(floor_zero(
            self.computed_amount - self.discount + self.late_fee,
        ));
    }

    /// Status as a pure function of activity, paid, total and the date.
    ///
    /// First match wins: inactive, fully paid, partially paid, then unpaid
    /// (overdue only when something is actually owed).
    pub fn derive_status(&self, today: NaiveDate) -> DueStatus {
        let paid = round2(self.paid);

        if !self.is_active {
            return DueStatus::Cancelled;
        }
        if self.total > Decimal::ZERO && paid >= self.total {
            return DueStatus::Paid;
        }
        if paid > Decimal::ZERO && paid < self.total {
            return DueStatus::Partial;
        }
        if today > self.due_date && self.total > Decimal::ZERO && paid.is_zero() {
            DueStatus::Overdue
        } else {
            DueStatus::Pending
        }
    }

    /// Store the derived status; returns true when it changed
    pub fn refresh_status(&mut self, today: NaiveDate) -> bool {
        let next = self.derive_status(today);
        let changed = next != self.status;
        self.status = next;
        changed
    }

    /// Replace the billing terms given in `terms`, then recompute and re-derive.
    /// Returns true when any amount field changed.
    pub fn apply_terms(&mut self, terms: &DueTerms, today: NaiveDate) -> bool {
        let before = (
            self.base_amount,
            self.uses_coefficient,
            self.coefficient_snapshot,
            self.discount,
            self.late_fee,
        );

        if let Some(base) = terms.base_amount {
            self.base_amount = base;
        }
        if let Some(flag) = terms.uses_coefficient {
            self.uses_coefficient = flag;
        }
        if let Some(snapshot) = terms.coefficient_snapshot {
            self.coefficient_snapshot = snapshot;
        }
        if let Some(discount) = terms.discount {
            self.discount = discount;
        }
        if let Some(late_fee) = terms.late_fee {
            self.late_fee = late_fee;
        }

        self.recompute_amounts();
        self.refresh_status(today);

        before
            != (
                self.base_amount,
                self.uses_coefficient,
                self.coefficient_snapshot,
                self.discount,
                self.late_fee,
            )
    }

    /// Add a flat late fee when the due is past its date and still owes money.
    ///
    /// No guard against repeated calls: every call that passes the checks adds
    /// the fee again. Callers that run on a schedule track `late_fee_period`.
    pub fn apply_flat_late_fee(&mut self, fee: Decimal, today: NaiveDate) -> bool {
        if today <= self.due_date || self.balance() <= Decimal::ZERO || fee <= Decimal::ZERO {
            return false;
        }
        self.late_fee = round2(self.late_fee + fee);
        self.recompute_amounts();
        self.refresh_status(today);
        true
    }

    /// Soft delete. Status becomes CANCELLED regardless of amounts.
    pub fn deactivate(&mut self, today: NaiveDate) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.refresh_status(today);
        true
    }
}
