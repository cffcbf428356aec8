//! Waybill document and its status state machine.
//!
//! # Responsibility
//! - Define the trip document shape and its allowed status transitions.
//! - Provide fuel and distance arithmetic used by posting.
//!
//! # Invariants
//! - Transitions follow `WaybillStatus::can_transition_to`; CANCELLED is
//!   terminal.
//! - `fuel_consumed = fuel_at_start + fuel_refueled - fuel_at_end`.
//! - Only DRAFT waybills are editable.

use super::quantity::round_quantity;
use super::{require_id, require_text, ModelValidationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WaybillId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaybillStatus {
    Draft,
    Submitted,
    Posted,
    Cancelled,
}

impl WaybillStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::Posted => "POSTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(Self::Draft),
            "SUBMITTED" => Some(Self::Submitted),
            "POSTED" => Some(Self::Posted),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Allowed transition table.
    pub fn can_transition_to(self, next: Self) -> bool {
        use WaybillStatus::{Cancelled, Draft, Posted, Submitted};
        matches!(
            (self, next),
            (Draft, Submitted)
                | (Draft, Cancelled)
                | (Submitted, Posted)
                | (Submitted, Draft)
                | (Submitted, Cancelled)
                | (Posted, Cancelled)
        )
    }

    pub fn allowed_targets(self) -> Vec<Self> {
        [Self::Draft, Self::Submitted, Self::Posted, Self::Cancelled]
            .into_iter()
            .filter(|next| self.can_transition_to(*next))
            .collect()
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waybill {
    pub id: WaybillId,
    pub organization_id: Uuid,
    /// Document number; the blank display number when a blank is attached.
    pub number: String,
    /// Trip date, epoch ms. Stock movements are booked at this instant.
    pub waybill_date: i64,
    pub vehicle_id: Uuid,
    pub driver_id: Uuid,
    pub blank_id: Option<Uuid>,
    pub status: WaybillStatus,
    pub odometer_start: i64,
    pub odometer_end: Option<i64>,
    pub fuel_at_start: Decimal,
    pub fuel_refueled: Decimal,
    pub fuel_at_end: Option<Decimal>,
    /// Location the refuelled volume is taken from (fuel card, warehouse).
    pub refuel_source_location_id: Option<Uuid>,
    pub route: String,
    pub notes: Option<String>,
    pub submitted_at: Option<i64>,
    pub posted_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Waybill {
    pub fn new_draft(
        organization_id: Uuid,
        number: impl Into<String>,
        waybill_date: i64,
        vehicle_id: Uuid,
        driver_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            number: number.into().trim().to_string(),
            waybill_date,
            vehicle_id,
            driver_id,
            blank_id: None,
            status: WaybillStatus::Draft,
            odometer_start: 0,
            odometer_end: None,
            fuel_at_start: Decimal::ZERO,
            fuel_refueled: Decimal::ZERO,
            fuel_at_end: None,
            refuel_source_location_id: None,
            route: String::new(),
            notes: None,
            submitted_at: None,
            posted_at: None,
            cancelled_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Trip distance in km, once the closing odometer is known.
    pub fn distance_km(&self) -> Option<i64> {
        self.odometer_end.map(|end| end - self.odometer_start)
    }

    /// Fuel burned during the trip, once the closing level is known.
    pub fn fuel_consumed(&self) -> Option<Decimal> {
        self.fuel_at_end
            .map(|end| self.fuel_at_start + self.fuel_refueled - end)
    }

    /// Norm consumption for the trip distance at `rate_per_100km`.
    pub fn planned_consumption(&self, rate_per_100km: Decimal) -> Option<Decimal> {
        self.distance_km().map(|distance| {
            round_quantity(Decimal::from(distance) * rate_per_100km / Decimal::ONE_HUNDRED)
        })
    }

    /// Checks invariants that hold in every status.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_id(self.id, "waybill.id")?;
        require_id(self.organization_id, "waybill.organization_id")?;
        require_id(self.vehicle_id, "waybill.vehicle_id")?;
        require_id(self.driver_id, "waybill.driver_id")?;
        require_text(&self.number, "waybill.number")?;
        if self.odometer_start < 0 {
            return Err(ModelValidationError::NegativeValue("waybill.odometer_start"));
        }
        if self.fuel_at_start < Decimal::ZERO {
            return Err(ModelValidationError::NegativeValue("waybill.fuel_at_start"));
        }
        if self.fuel_refueled < Decimal::ZERO {
            return Err(ModelValidationError::NegativeValue("waybill.fuel_refueled"));
        }
        if matches!(self.fuel_at_end, Some(end) if end < Decimal::ZERO) {
            return Err(ModelValidationError::NegativeValue("waybill.fuel_at_end"));
        }
        Ok(())
    }

    /// Checks that the closing readings are complete and consistent.
    pub fn validate_for_submit(&self) -> Result<(), ModelValidationError> {
        self.validate()?;

        let Some(odometer_end) = self.odometer_end else {
            return Err(ModelValidationError::Inconsistent(
                "odometer_end is required before submit".to_string(),
            ));
        };
        if odometer_end < self.odometer_start {
            return Err(ModelValidationError::Inconsistent(format!(
                "odometer_end {odometer_end} is below odometer_start {}",
                self.odometer_start
            )));
        }

        let Some(consumed) = self.fuel_consumed() else {
            return Err(ModelValidationError::Inconsistent(
                "fuel_at_end is required before submit".to_string(),
            ));
        };
        if consumed < Decimal::ZERO {
            return Err(ModelValidationError::Inconsistent(format!(
                "fuel_at_end exceeds fuel available by {}",
                -consumed
            )));
        }

        if self.fuel_refueled > Decimal::ZERO && self.refuel_source_location_id.is_none() {
            return Err(ModelValidationError::Inconsistent(
                "refuelled fuel requires refuel_source_location_id".to_string(),
            ));
        }
        Ok(())
    }

    /// Ledger idempotency key of the refuel transfer.
    pub fn refuel_external_ref(&self) -> String {
        format!("waybill:{}:refuel", self.id)
    }

    /// Ledger idempotency key of the consumption expense.
    pub fn expense_external_ref(&self) -> String {
        format!("waybill:{}:expense", self.id)
    }
}
