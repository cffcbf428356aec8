//! Fleet domain model.
//!
//! # Responsibility
//! - Define canonical records for organizations, vehicles, drivers, stock,
//!   blanks and waybills.
//! - Keep pure business rules (transition tables, fuel math, movement
//!   validation) independent from storage.
//!
//! # Invariants
//! - Every record is identified by a non-nil UUID.
//! - Quantities cross the storage boundary as integer thousandths only.

use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod blank;
pub mod fleet;
pub mod quantity;
pub mod stock;
pub mod waybill;

/// Validation failures raised by model-level `validate()` helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelValidationError {
    /// An identifier was the nil UUID.
    NilId(&'static str),
    /// A required text field is empty after trim.
    BlankField(&'static str),
    /// A numeric field must not be negative.
    NegativeValue(&'static str),
    /// A numeric field must be strictly positive.
    NonPositiveValue(&'static str),
    /// A field carries a value that violates its format.
    InvalidFormat { field: &'static str, value: String },
    /// Two fields contradict each other.
    Inconsistent(String),
}

impl Display for ModelValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId(field) => write!(f, "`{field}` must not be nil"),
            Self::BlankField(field) => write!(f, "`{field}` must not be blank"),
            Self::NegativeValue(field) => write!(f, "`{field}` must not be negative"),
            Self::NonPositiveValue(field) => write!(f, "`{field}` must be greater than zero"),
            Self::InvalidFormat { field, value } => {
                write!(f, "invalid value `{value}` for `{field}`")
            }
            Self::Inconsistent(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ModelValidationError {}

pub(crate) fn require_id(id: Uuid, field: &'static str) -> Result<(), ModelValidationError> {
    if id.is_nil() {
        return Err(ModelValidationError::NilId(field));
    }
    Ok(())
}

pub(crate) fn require_text(value: &str, field: &'static str) -> Result<(), ModelValidationError> {
    if value.trim().is_empty() {
        return Err(ModelValidationError::BlankField(field));
    }
    Ok(())
}

/// Current wall clock in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}
