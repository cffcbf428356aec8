//! Fixed-point conversion between `Decimal` quantities and stored integers.
//!
//! Fuel volumes and rates are persisted as thousandths (`*_milli` columns) so
//! SQLite `SUM` aggregates remain exact.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Number of fractional digits kept in storage.
pub const QUANTITY_SCALE: u32 = 3;

const MILLI: i64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    /// More than three fractional digits were supplied.
    TooPrecise(Decimal),
    /// The scaled value does not fit into `i64`.
    OutOfRange(Decimal),
}

impl Display for QuantityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooPrecise(value) => write!(
                f,
                "quantity {value} has more than {QUANTITY_SCALE} fractional digits"
            ),
            Self::OutOfRange(value) => write!(f, "quantity {value} is out of range"),
        }
    }
}

impl Error for QuantityError {}

/// Converts a decimal quantity into stored thousandths.
pub fn to_milli(value: Decimal) -> Result<i64, QuantityError> {
    let normalized = value.normalize();
    if normalized.scale() > QUANTITY_SCALE {
        return Err(QuantityError::TooPrecise(value));
    }
    normalized
        .checked_mul(Decimal::from(MILLI))
        .and_then(|scaled| scaled.to_i64())
        .ok_or(QuantityError::OutOfRange(value))
}

/// Converts stored thousandths back into a normalized decimal.
pub fn from_milli(value: i64) -> Decimal {
    Decimal::new(value, QUANTITY_SCALE).normalize()
}

/// Rounds a computed quantity to the storage scale.
pub fn round_quantity(value: Decimal) -> Decimal {
    value.round_dp(QUANTITY_SCALE).normalize()
}
