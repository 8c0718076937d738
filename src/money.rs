//! Fixed-point money helpers
//!
//! All ledger amounts are `rust_decimal::Decimal` values. Rounding to cents
//! happens only where the ledger defines it (the computed amount and the
//! total payable); paid totals accumulate exactly.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places carried by every persisted amount
pub const DECIMAL_PLACES: u32 = 2;

/// Largest amount a single due or payment may carry (NUMERIC(10,2))
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Round to cents using half-to-even, the rounding the ledger has always used
#[inline]
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointNearestEven)
}

/// Apply a percentage (0-100) to an amount, rounded to cents
#[inline]
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    round2(amount * percent / Decimal::ONE_HUNDRED)
}

/// `max(0, value)`
#[inline]
pub fn floor_zero(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

/// True when the value has no more than two decimal places of precision
pub fn has_cent_precision(value: Decimal) -> bool {
    value.normalize().scale() <= DECIMAL_PLACES
}
