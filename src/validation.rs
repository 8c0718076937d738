//! Input validation for ledger operations
//!
//! Every check here runs before any state is touched, so a rejected request
//! never leaves a partial write behind.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::money::{has_cent_precision, MAX_AMOUNT};

/// Longest concept label a due may carry
pub const MAX_CONCEPT_LEN: usize = 50;

/// Longest external payment reference accepted
pub const MAX_REFERENCE_LEN: usize = 150;

/// Longest provider-side intent id accepted
pub const MAX_PROVIDER_INTENT_ID_LEN: usize = 128;

/// Validation errors for ledger inputs
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: Decimal },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: Decimal },

    #[error("{field} exceeds the maximum of {max}, got {value}")]
    TooLarge {
        field: &'static str,
        value: Decimal,
        max: Decimal,
    },

    #[error("{field} must have at most two decimal places, got {value}")]
    TooPrecise { field: &'static str, value: Decimal },

    #[error("Coefficient must be between 0 and 100, got {0}")]
    CoefficientOutOfRange(Decimal),

    #[error("Period must be formatted as YYYY-MM, got '{0}'")]
    InvalidPeriod(String),

    #[error("Concept must be between 1 and {max} characters, got {0} characters", max = MAX_CONCEPT_LEN)]
    InvalidConceptLength(usize),

    #[error("Reference exceeds {max} characters, got {0}", max = MAX_REFERENCE_LEN)]
    ReferenceTooLong(usize),

    #[error("Payment method {0} requires an external reference")]
    MissingReference(String),

    #[error("Provider intent id must be between 1 and {max} characters, got {0}", max = MAX_PROVIDER_INTENT_ID_LEN)]
    InvalidProviderIntentId(usize),

    #[error("Currency must be a 3-letter uppercase code, got '{0}'")]
    InvalidCurrency(String),
}

/// Validate a strictly positive monetary amount (payments, intents, fees)
pub fn validate_positive_amount(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value <= Decimal::ZERO {
        return Err(ValidationError::NotPositive { field, value });
    }
    validate_bounds(field, value)
}

/// Validate a non-negative monetary amount (base amounts, discounts, late fees)
pub fn validate_non_negative_amount(
    field: &'static str,
    value: Decimal,
) -> Result<(), ValidationError> {
    if value < Decimal::ZERO {
        return Err(ValidationError::Negative { field, value });
    }
    validate_bounds(field, value)
}

fn validate_bounds(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value > MAX_AMOUNT {
        return Err(ValidationError::TooLarge {
            field,
            value,
            max: MAX_AMOUNT,
        });
    }
    if !has_cent_precision(value) {
        return Err(ValidationError::TooPrecise { field, value });
    }
    Ok(())
}

/// Validate a unit coefficient (percentage share, 0-100, cents precision)
pub fn validate_coefficient(value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED || !has_cent_precision(value) {
        return Err(ValidationError::CoefficientOutOfRange(value));
    }
    Ok(())
}

/// Validate a billing period in `YYYY-MM` form
pub fn validate_period(period: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidPeriod(period.to_string());

    let (year, month) = period.split_once('-').ok_or_else(invalid)?;
    if year.len() != 4 || month.len() != 2 {
        return Err(invalid());
    }
    if !year.bytes().all(|b| b.is_ascii_digit()) || !month.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let month: u32 = month.parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) {
        return Err(invalid());
    }
    Ok(())
}

/// Validate a due concept label
pub fn validate_concept(concept: &str) -> Result<(), ValidationError> {
    let len = concept.trim().chars().count();
    if len == 0 || len > MAX_CONCEPT_LEN {
        return Err(ValidationError::InvalidConceptLength(len));
    }
    Ok(())
}

/// Validate an external payment reference
pub fn validate_reference(reference: &str) -> Result<(), ValidationError> {
    let len = reference.chars().count();
    if len > MAX_REFERENCE_LEN {
        return Err(ValidationError::ReferenceTooLong(len));
    }
    Ok(())
}

/// Validate a provider-side intent id
pub fn validate_provider_intent_id(id: &str) -> Result<(), ValidationError> {
    let len = id.trim().chars().count();
    if len == 0 || len > MAX_PROVIDER_INTENT_ID_LEN {
        return Err(ValidationError::InvalidProviderIntentId(len));
    }
    Ok(())
}

/// Validate an ISO 4217 style currency code
pub fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidCurrency(currency.to_string()))
    }
}
