//! Strict-accountability forms (blanks) and their batches.
//!
//! # Invariants
//! - A blank is unique by `(organization_id, series, number)`.
//! - ISSUED and RESERVED blanks always carry `issued_to_driver_id`.
//! - RESERVED and USED blanks always carry `waybill_id`.
//! - USED and SPOILED are terminal.

use super::{require_id, require_text, ModelValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type BlankId = Uuid;
pub type BlankBatchId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlankStatus {
    /// In the organization safe, not assigned to anybody.
    Available,
    /// Handed over to a driver.
    Issued,
    /// Bound to a waybill that is not posted yet.
    Reserved,
    /// Consumed by a posted waybill.
    Used,
    /// Damaged or voided.
    Spoiled,
}

impl BlankStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Issued => "ISSUED",
            Self::Reserved => "RESERVED",
            Self::Used => "USED",
            Self::Spoiled => "SPOILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AVAILABLE" => Some(Self::Available),
            "ISSUED" => Some(Self::Issued),
            "RESERVED" => Some(Self::Reserved),
            "USED" => Some(Self::Used),
            "SPOILED" => Some(Self::Spoiled),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use BlankStatus::{Available, Issued, Reserved, Spoiled, Used};
        matches!(
            (self, next),
            (Available, Issued)
                | (Issued, Available)
                | (Issued, Reserved)
                | (Reserved, Issued)
                | (Reserved, Used)
                | (Available | Issued | Reserved, Spoiled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Used | Self::Spoiled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlankBatch {
    pub id: BlankBatchId,
    pub organization_id: Uuid,
    pub series: String,
    pub number_from: i64,
    pub number_to: i64,
    pub created_at: i64,
}

impl BlankBatch {
    pub fn new(organization_id: Uuid, series: &str, number_from: i64, number_to: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            series: normalize_series(series),
            number_from,
            number_to,
            created_at: 0,
        }
    }

    pub fn len(&self) -> u64 {
        range_len(self.number_from, self.number_to)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_id(self.id, "blank_batch.id")?;
        require_id(self.organization_id, "blank_batch.organization_id")?;
        require_text(&self.series, "blank_batch.series")?;
        validate_number_range(self.number_from, self.number_to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blank {
    pub id: BlankId,
    pub organization_id: Uuid,
    pub batch_id: BlankBatchId,
    pub series: String,
    pub number: i64,
    pub status: BlankStatus,
    pub issued_to_driver_id: Option<Uuid>,
    pub waybill_id: Option<Uuid>,
    pub updated_at: i64,
}

impl Blank {
    /// Printed form number, e.g. `AB 000042`.
    pub fn display_number(&self) -> String {
        format!("{} {:06}", self.series, self.number)
    }

    /// Checks the status-dependent ownership invariants.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_id(self.id, "blank.id")?;
        match self.status {
            BlankStatus::Issued | BlankStatus::Reserved if self.issued_to_driver_id.is_none() => {
                Err(ModelValidationError::Inconsistent(format!(
                    "blank {} is {} without a driver",
                    self.display_number(),
                    self.status.as_str()
                )))
            }
            BlankStatus::Reserved | BlankStatus::Used if self.waybill_id.is_none() => {
                Err(ModelValidationError::Inconsistent(format!(
                    "blank {} is {} without a waybill",
                    self.display_number(),
                    self.status.as_str()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Checks an inclusive blank number range: positive and not reversed.
pub fn validate_number_range(
    number_from: i64,
    number_to: i64,
) -> Result<(), ModelValidationError> {
    if number_from <= 0 {
        return Err(ModelValidationError::NonPositiveValue("blank_range.number_from"));
    }
    if number_from > number_to {
        return Err(ModelValidationError::Inconsistent(format!(
            "blank range {number_from}..{number_to} is reversed"
        )));
    }
    Ok(())
}

/// Count of numbers in `number_from..=number_to`; 0 when reversed.
pub fn range_len(number_from: i64, number_to: i64) -> u64 {
    if number_from > number_to {
        return 0;
    }
    number_to.abs_diff(number_from).saturating_add(1)
}

/// Uppercases and trims a blank series.
pub fn normalize_series(value: &str) -> String {
    value.trim().to_uppercase()
}
