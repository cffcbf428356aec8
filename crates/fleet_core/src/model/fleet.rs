//! Organizations, drivers and vehicles.
//!
//! # Invariants
//! - Organization `inn`, when set, is 10 or 12 digits.
//! - Vehicle plate numbers are stored uppercase without whitespace.
//! - Archived records stay readable but cannot be used by new waybills.

use super::{require_id, require_text, ModelValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static INN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{10}(\d{2})?$").expect("valid inn regex"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

pub type OrganizationId = Uuid;
pub type DriverId = Uuid;
pub type VehicleId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Taxpayer identification number.
    pub inn: Option<String>,
    pub is_archived: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Organization {
    pub fn new(name: impl Into<String>, inn: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into().trim().to_string(),
            inn: inn
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            is_archived: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_id(self.id, "organization.id")?;
        require_text(&self.name, "organization.name")?;
        if let Some(inn) = self.inn.as_deref() {
            if !INN_RE.is_match(inn) {
                return Err(ModelValidationError::InvalidFormat {
                    field: "organization.inn",
                    value: inn.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub organization_id: OrganizationId,
    pub full_name: String,
    pub license_number: Option<String>,
    /// FUEL_CARD stock location assigned to this driver.
    pub fuel_card_location_id: Option<Uuid>,
    pub is_archived: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Driver {
    pub fn new(organization_id: OrganizationId, full_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            full_name: full_name.into().trim().to_string(),
            license_number: None,
            fuel_card_location_id: None,
            is_archived: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_id(self.id, "driver.id")?;
        require_id(self.organization_id, "driver.organization_id")?;
        require_text(&self.full_name, "driver.full_name")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub organization_id: OrganizationId,
    pub plate_number: String,
    pub model: String,
    /// Stock item the vehicle burns.
    pub fuel_item_id: Option<Uuid>,
    /// Norm consumption in litres per 100 km.
    pub fuel_rate_per_100km: Option<Decimal>,
    /// VEHICLE_TANK location, created together with the vehicle.
    pub tank_location_id: Option<Uuid>,
    /// Last known odometer reading, km.
    pub odometer: i64,
    pub is_archived: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Vehicle {
    pub fn new(
        organization_id: OrganizationId,
        plate_number: &str,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            plate_number: normalize_plate_number(plate_number),
            model: model.into().trim().to_string(),
            fuel_item_id: None,
            fuel_rate_per_100km: None,
            tank_location_id: None,
            odometer: 0,
            is_archived: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_id(self.id, "vehicle.id")?;
        require_id(self.organization_id, "vehicle.organization_id")?;
        require_text(&self.plate_number, "vehicle.plate_number")?;
        if self.odometer < 0 {
            return Err(ModelValidationError::NegativeValue("vehicle.odometer"));
        }
        if let Some(rate) = self.fuel_rate_per_100km {
            if rate <= Decimal::ZERO {
                return Err(ModelValidationError::NonPositiveValue(
                    "vehicle.fuel_rate_per_100km",
                ));
            }
        }
        Ok(())
    }
}

/// Uppercases a plate number and strips all whitespace.
pub fn normalize_plate_number(value: &str) -> String {
    WHITESPACE_RE.replace_all(value, "").to_uppercase()
}
