//! Due service: issuing dues, billing cycles and term revisions
//!
//! Dues are issued from unit data supplied by the registry. Every change
//! after issuance goes through `LedgerStore::revise_due`, which keeps the
//! committed paid total and re-derives status before persisting.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Due, DueTerms, Unit};
use crate::registry::UnitRegistry;
use crate::store::{LedgerStore, RevisedDue, StoreError};
use crate::validation::{
    validate_coefficient, validate_concept, validate_non_negative_amount, validate_period,
    validate_positive_amount, ValidationError,
};

/// Concept used when a request does not name one
pub const DEFAULT_CONCEPT: &str = "COMMON_EXPENSES";

#[derive(Debug, thiserror::Error)]
pub enum DueError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unit not found: {0}")]
    UnitNotFound(Uuid),

    #[error("Unit is inactive: {0}")]
    UnitInactive(Uuid),

    #[error("Due not found: {0}")]
    NotFound(Uuid),

    #[error("Due is inactive: {0}")]
    Inactive(Uuid),
}

pub type DueResult<T> = Result<T, DueError>;

fn default_uses_coefficient() -> bool {
    true
}

/// Request to issue one due for one unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDueRequest {
    pub unit_id: Uuid,
    pub period: String,
    #[serde(default)]
    pub concept: Option<String>,
    pub base_amount: Decimal,
    #[serde(default = "default_uses_coefficient")]
    pub uses_coefficient: bool,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub late_fee: Decimal,
    pub due_date: NaiveDate,
}

/// Request to bill every active unit for one period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRequest {
    pub period: String,
    #[serde(default)]
    pub concept: Option<String>,
    pub base_amount: Decimal,
    #[serde(default = "default_uses_coefficient")]
    pub uses_coefficient: bool,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub created: Vec<Due>,
    /// Units that already had an active due for the period and concept
    pub skipped: Vec<Uuid>,
    /// Units left unbilled because their registry data failed validation
    pub invalid: Vec<Uuid>,
}

fn resolve_concept(concept: Option<&str>) -> DueResult<String> {
    let concept = concept.map(str::trim).unwrap_or(DEFAULT_CONCEPT);
    validate_concept(concept)?;
    Ok(concept.to_string())
}

fn issue_for_unit(
    unit: &Unit,
    period: &str,
    concept: &str,
    base_amount: Decimal,
    uses_coefficient: bool,
    discount: Decimal,
    late_fee: Decimal,
    due_date: NaiveDate,
    today: NaiveDate,
) -> DueResult<Due> {
    validate_coefficient(unit.coefficient)?;
    Ok(Due::issue(
        unit.id,
        period,
        concept,
        base_amount,
        uses_coefficient,
        unit.coefficient,
        discount,
        late_fee,
        due_date,
        today,
    ))
}

async fn active_unit(registry: &dyn UnitRegistry, unit_id: Uuid) -> DueResult<Unit> {
    let unit = registry
        .find_unit(unit_id)
        .await?
        .ok_or(DueError::UnitNotFound(unit_id))?;
    if !unit.is_active {
        return Err(DueError::UnitInactive(unit_id));
    }
    Ok(unit)
}

/// Issue a due for one unit, snapshotting the unit's current coefficient
pub async fn create_due(
    registry: &dyn UnitRegistry,
    store: &dyn LedgerStore,
    req: NewDueRequest,
    today: NaiveDate,
) -> DueResult<Due> {
    validate_period(&req.period)?;
    let concept = resolve_concept(req.concept.as_deref())?;
    validate_non_negative_amount("base_amount", req.base_amount)?;
    validate_non_negative_amount("discount", req.discount)?;
    validate_non_negative_amount("late_fee", req.late_fee)?;

    let unit = active_unit(registry, req.unit_id).await?;
    let due = issue_for_unit(
        &unit,
        &req.period,
        &concept,
        req.base_amount,
        req.uses_coefficient,
        req.discount,
        req.late_fee,
        req.due_date,
        today,
    )?;

    let due = store.insert_due(&due).await?;

    tracing::info!(
        due_id = %due.id,
        unit_id = %due.unit_id,
        period = %due.period,
        concept = %due.concept,
        total = %due.total,
        status = %due.status,
        "Due issued"
    );

    Ok(due)
}

/// Issue one due per active unit. Units already billed for the period and
/// concept are reported in `skipped` and left untouched; units whose
/// coefficient fails validation are reported in `invalid` and the cycle
/// carries on with the rest.
pub async fn generate_billing_cycle(
    registry: &dyn UnitRegistry,
    store: &dyn LedgerStore,
    req: CycleRequest,
    today: NaiveDate,
) -> DueResult<CycleSummary> {
    validate_period(&req.period)?;
    let concept = resolve_concept(req.concept.as_deref())?;
    validate_non_negative_amount("base_amount", req.base_amount)?;

    let mut summary = CycleSummary::default();
    for unit in registry.list_active_units().await? {
        let due = match issue_for_unit(
            &unit,
            &req.period,
            &concept,
            req.base_amount,
            req.uses_coefficient,
            Decimal::ZERO,
            Decimal::ZERO,
            req.due_date,
            today,
        ) {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(unit_id = %unit.id, label = %unit.label, error = %e, "Unit not billable, skipping");
                summary.invalid.push(unit.id);
                continue;
            }
        };

        match store.insert_due(&due).await {
            Ok(due) => summary.created.push(due),
            Err(StoreError::DuplicateDue { unit_id, .. }) => {
                tracing::debug!(unit_id = %unit_id, period = %req.period, "Unit already billed, skipping");
                summary.skipped.push(unit_id);
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(
        period = %req.period,
        concept = %concept,
        created = summary.created.len(),
        skipped = summary.skipped.len(),
        invalid = summary.invalid.len(),
        "Billing cycle generated"
    );

    Ok(summary)
}

async fn active_due(store: &dyn LedgerStore, due_id: Uuid) -> DueResult<Due> {
    let due = store
        .find_due(due_id)
        .await?
        .ok_or(DueError::NotFound(due_id))?;
    if !due.is_active {
        return Err(DueError::Inactive(due_id));
    }
    Ok(due)
}

fn revise_result(result: Result<RevisedDue, StoreError>, due_id: Uuid) -> DueResult<RevisedDue> {
    result.map_err(|e| match e {
        StoreError::DueNotFound(_) => DueError::NotFound(due_id),
        other => other.into(),
    })
}

/// Replace billing terms; amounts are recomputed and status re-derived
/// against the currently committed paid total.
pub async fn revise_terms(
    store: &dyn LedgerStore,
    due_id: Uuid,
    terms: DueTerms,
    today: NaiveDate,
) -> DueResult<Due> {
    if let Some(base) = terms.base_amount {
        validate_non_negative_amount("base_amount", base)?;
    }
    if let Some(snapshot) = terms.coefficient_snapshot {
        validate_coefficient(snapshot)?;
    }
    if let Some(discount) = terms.discount {
        validate_non_negative_amount("discount", discount)?;
    }
    if let Some(late_fee) = terms.late_fee {
        validate_non_negative_amount("late_fee", late_fee)?;
    }
    active_due(store, due_id).await?;

    let revised = revise_result(
        store
            .revise_due(due_id, today, &|due: &mut Due| {
                due.is_active && due.apply_terms(&terms, today)
            })
            .await,
        due_id,
    )?;

    if revised.changed {
        tracing::info!(
            due_id = %due_id,
            total = %revised.due.total,
            status = %revised.due.status,
            "Due terms revised"
        );
    }
    Ok(revised.due)
}

/// Soft delete; the due stays on record as CANCELLED. Repeated calls are no-ops.
pub async fn deactivate_due(store: &dyn LedgerStore, due_id: Uuid, today: NaiveDate) -> DueResult<Due> {
    let revised = revise_result(
        store
            .revise_due(due_id, today, &|due: &mut Due| due.deactivate(today))
            .await,
        due_id,
    )?;

    if revised.changed {
        tracing::info!(due_id = %due_id, "Due deactivated");
    } else {
        tracing::debug!(due_id = %due_id, "Due already inactive");
    }
    Ok(revised.due)
}

fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Charge a flat late fee at most once per calendar month of `today`.
///
/// Returns the due and whether a fee was added.
pub async fn assess_late_fee(
    store: &dyn LedgerStore,
    due_id: Uuid,
    fee: Decimal,
    today: NaiveDate,
) -> DueResult<(Due, bool)> {
    validate_positive_amount("late_fee", fee)?;
    let month = month_key(today);
    let charged = AtomicBool::new(false);

    let revised = revise_result(
        store
            .revise_due(due_id, today, &|due: &mut Due| {
                if !due.is_active || due.late_fee_period.as_deref() == Some(month.as_str()) {
                    return false;
                }
                if !due.apply_flat_late_fee(fee, today) {
                    return false;
                }
                due.late_fee_period = Some(month.clone());
                charged.store(true, Ordering::Relaxed);
                true
            })
            .await,
        due_id,
    )?;

    let charged = charged.load(Ordering::Relaxed);
    if charged {
        tracing::info!(
            due_id = %due_id,
            fee = %fee,
            late_fee = %revised.due.late_fee,
            total = %revised.due.total,
            "Late fee assessed"
        );
    } else {
        tracing::debug!(due_id = %due_id, month = %month, "No late fee assessed");
    }
    Ok((revised.due, charged))
}

/// Move unpaid past-due dues from PENDING to OVERDUE
pub async fn refresh_overdue(store: &dyn LedgerStore, today: NaiveDate) -> DueResult<u64> {
    let moved = store.mark_overdue(today).await?;
    if moved > 0 {
        tracing::info!(count = moved, today = %today, "Dues marked overdue");
    }
    Ok(moved)
}
