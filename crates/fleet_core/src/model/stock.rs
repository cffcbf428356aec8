//! Stock items, locations and the movement ledger records.
//!
//! # Responsibility
//! - Describe signed quantity changes against stock locations.
//! - Define the chronological order used by balance computation.
//!
//! # Invariants
//! - Movements are totally ordered by `(occurred_at, occurred_seq)`.
//! - INCOME/EXPENSE/TRANSFER quantities are strictly positive; the sign comes
//!   from the movement type. ADJUSTMENT carries its own sign.
//! - A TRANSFER touches exactly two distinct locations.
//! - Voided movements never contribute to balances.

use super::{require_id, require_text, ModelValidationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type StockItemId = Uuid;
pub type StockLocationId = Uuid;
pub type MovementId = Uuid;

/// Document type recorded on movements produced by waybill posting.
pub const WAYBILL_DOCUMENT: &str = "WAYBILL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Stock arrives at a location from outside the organization.
    Income,
    /// Stock leaves a location (consumed, sold, written off).
    Expense,
    /// Stock moves between two locations of one organization.
    Transfer,
    /// Signed correction after an inventory count.
    Adjustment,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
            Self::Transfer => "TRANSFER",
            Self::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INCOME" => Some(Self::Income),
            "EXPENSE" => Some(Self::Expense),
            "TRANSFER" => Some(Self::Transfer),
            "ADJUSTMENT" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationKind {
    Warehouse,
    FuelCard,
    VehicleTank,
}

impl LocationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warehouse => "WAREHOUSE",
            Self::FuelCard => "FUEL_CARD",
            Self::VehicleTank => "VEHICLE_TANK",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WAREHOUSE" => Some(Self::Warehouse),
            "FUEL_CARD" => Some(Self::FuelCard),
            "VEHICLE_TANK" => Some(Self::VehicleTank),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub id: StockItemId,
    pub organization_id: Uuid,
    pub name: String,
    /// Unit of measure label, e.g. `l`.
    pub unit: String,
}

impl StockItem {
    pub fn new(organization_id: Uuid, name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into().trim().to_string(),
            unit: unit.into().trim().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_id(self.id, "stock_item.id")?;
        require_id(self.organization_id, "stock_item.organization_id")?;
        require_text(&self.name, "stock_item.name")?;
        require_text(&self.unit, "stock_item.unit")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLocation {
    pub id: StockLocationId,
    pub organization_id: Uuid,
    pub name: String,
    pub kind: LocationKind,
    pub vehicle_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
}

impl StockLocation {
    pub fn new(organization_id: Uuid, name: impl Into<String>, kind: LocationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into().trim().to_string(),
            kind,
            vehicle_id: None,
            driver_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_id(self.id, "stock_location.id")?;
        require_id(self.organization_id, "stock_location.organization_id")?;
        require_text(&self.name, "stock_location.name")?;
        match self.kind {
            LocationKind::VehicleTank if self.vehicle_id.is_none() => Err(
                ModelValidationError::Inconsistent("vehicle tank location requires vehicle_id".into()),
            ),
            LocationKind::FuelCard if self.driver_id.is_none() => Err(
                ModelValidationError::Inconsistent("fuel card location requires driver_id".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Position of a movement in the ledger.
///
/// Derived `Ord` compares `occurred_at` first, then `occurred_seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerCursor {
    pub occurred_at: i64,
    pub occurred_seq: i64,
}

impl LedgerCursor {
    pub fn new(occurred_at: i64, occurred_seq: i64) -> Self {
        Self {
            occurred_at,
            occurred_seq,
        }
    }

    /// Cursor that includes every movement at or before `occurred_at`.
    pub fn end_of(occurred_at: i64) -> Self {
        Self::new(occurred_at, i64::MAX)
    }

    /// Cursor past every movement.
    pub fn latest() -> Self {
        Self::new(i64::MAX, i64::MAX)
    }
}

/// Source document that produced a movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub doc_type: String,
    pub doc_id: String,
}

impl DocumentRef {
    pub fn waybill(id: Uuid) -> Self {
        Self {
            doc_type: WAYBILL_DOCUMENT.to_string(),
            doc_id: id.to_string(),
        }
    }
}

/// Persisted ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub organization_id: Uuid,
    pub stock_item_id: StockItemId,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub stock_location_id: Option<StockLocationId>,
    pub from_location_id: Option<StockLocationId>,
    pub to_location_id: Option<StockLocationId>,
    pub occurred_at: i64,
    pub occurred_seq: i64,
    pub document: Option<DocumentRef>,
    pub external_ref: Option<String>,
    pub comment: Option<String>,
    pub is_voided: bool,
    pub created_at: i64,
}

impl StockMovement {
    pub fn cursor(&self) -> LedgerCursor {
        LedgerCursor::new(self.occurred_at, self.occurred_seq)
    }

    /// Signed effect of this movement on `location_id`.
    pub fn delta_for(&self, location_id: StockLocationId) -> Decimal {
        if self.is_voided {
            return Decimal::ZERO;
        }
        match self.movement_type {
            MovementType::Income | MovementType::Adjustment
                if self.stock_location_id == Some(location_id) =>
            {
                self.quantity
            }
            MovementType::Expense if self.stock_location_id == Some(location_id) => -self.quantity,
            MovementType::Transfer if self.to_location_id == Some(location_id) => self.quantity,
            MovementType::Transfer if self.from_location_id == Some(location_id) => {
                -self.quantity
            }
            _ => Decimal::ZERO,
        }
    }

    /// Returns whether a replayed draft describes the same movement.
    ///
    /// `occurred_seq` is ignored unless the draft pins it explicitly.
    pub fn matches_draft(&self, draft: &NewMovement) -> bool {
        self.organization_id == draft.organization_id
            && self.stock_item_id == draft.stock_item_id
            && self.movement_type == draft.movement_type
            && self.quantity == draft.quantity
            && self.stock_location_id == draft.stock_location_id
            && self.from_location_id == draft.from_location_id
            && self.to_location_id == draft.to_location_id
            && self.occurred_at == draft.occurred_at
            && draft
                .occurred_seq
                .map_or(true, |seq| seq == self.occurred_seq)
            && self.document == draft.document
    }
}

/// Input for recording one ledger movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub organization_id: Uuid,
    pub stock_item_id: StockItemId,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub stock_location_id: Option<StockLocationId>,
    pub from_location_id: Option<StockLocationId>,
    pub to_location_id: Option<StockLocationId>,
    pub occurred_at: i64,
    /// Assigned by the ledger when `None`.
    pub occurred_seq: Option<i64>,
    pub document: Option<DocumentRef>,
    /// Idempotency key, unique per organization.
    pub external_ref: Option<String>,
    pub comment: Option<String>,
}

impl NewMovement {
    fn base(
        organization_id: Uuid,
        stock_item_id: StockItemId,
        movement_type: MovementType,
        quantity: Decimal,
        occurred_at: i64,
    ) -> Self {
        Self {
            organization_id,
            stock_item_id,
            movement_type,
            quantity,
            stock_location_id: None,
            from_location_id: None,
            to_location_id: None,
            occurred_at,
            occurred_seq: None,
            document: None,
            external_ref: None,
            comment: None,
        }
    }

    pub fn income(
        organization_id: Uuid,
        stock_item_id: StockItemId,
        location_id: StockLocationId,
        quantity: Decimal,
        occurred_at: i64,
    ) -> Self {
        let mut movement = Self::base(
            organization_id,
            stock_item_id,
            MovementType::Income,
            quantity,
            occurred_at,
        );
        movement.stock_location_id = Some(location_id);
        movement
    }

    pub fn expense(
        organization_id: Uuid,
        stock_item_id: StockItemId,
        location_id: StockLocationId,
        quantity: Decimal,
        occurred_at: i64,
    ) -> Self {
        let mut movement = Self::base(
            organization_id,
            stock_item_id,
            MovementType::Expense,
            quantity,
            occurred_at,
        );
        movement.stock_location_id = Some(location_id);
        movement
    }

    pub fn transfer(
        organization_id: Uuid,
        stock_item_id: StockItemId,
        from_location_id: StockLocationId,
        to_location_id: StockLocationId,
        quantity: Decimal,
        occurred_at: i64,
    ) -> Self {
        let mut movement = Self::base(
            organization_id,
            stock_item_id,
            MovementType::Transfer,
            quantity,
            occurred_at,
        );
        movement.from_location_id = Some(from_location_id);
        movement.to_location_id = Some(to_location_id);
        movement
    }

    /// Signed correction; negative quantities reduce the location balance.
    pub fn adjustment(
        organization_id: Uuid,
        stock_item_id: StockItemId,
        location_id: StockLocationId,
        quantity: Decimal,
        occurred_at: i64,
    ) -> Self {
        let mut movement = Self::base(
            organization_id,
            stock_item_id,
            MovementType::Adjustment,
            quantity,
            occurred_at,
        );
        movement.stock_location_id = Some(location_id);
        movement
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn with_document(mut self, document: DocumentRef) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_seq(mut self, occurred_seq: i64) -> Self {
        self.occurred_seq = Some(occurred_seq);
        self
    }

    /// Locations referenced by this draft.
    pub fn locations(&self) -> Vec<StockLocationId> {
        [
            self.stock_location_id,
            self.from_location_id,
            self.to_location_id,
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Location whose balance this movement lowers, if any.
    pub fn decreased_location(&self) -> Option<StockLocationId> {
        match self.movement_type {
            MovementType::Expense => self.stock_location_id,
            MovementType::Transfer => self.from_location_id,
            MovementType::Adjustment if self.quantity < Decimal::ZERO => self.stock_location_id,
            MovementType::Adjustment | MovementType::Income => None,
        }
    }

    /// Trims the idempotency key and comment in place.
    pub fn normalize(&mut self) {
        self.external_ref = self.external_ref.take().map(|value| value.trim().to_string());
        self.comment = self
            .comment
            .take()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_id(self.organization_id, "movement.organization_id")?;
        require_id(self.stock_item_id, "movement.stock_item_id")?;
        if let Some(external_ref) = self.external_ref.as_deref() {
            require_text(external_ref, "movement.external_ref")?;
        }
        if self.occurred_at < 0 {
            return Err(ModelValidationError::NegativeValue("movement.occurred_at"));
        }

        match self.movement_type {
            MovementType::Income | MovementType::Expense | MovementType::Adjustment => {
                if self.stock_location_id.is_none() {
                    return Err(ModelValidationError::Inconsistent(format!(
                        "{} movement requires stock_location_id",
                        self.movement_type.as_str()
                    )));
                }
                if self.from_location_id.is_some() || self.to_location_id.is_some() {
                    return Err(ModelValidationError::Inconsistent(format!(
                        "{} movement must not set from/to locations",
                        self.movement_type.as_str()
                    )));
                }
            }
            MovementType::Transfer => {
                let (Some(from), Some(to)) = (self.from_location_id, self.to_location_id) else {
                    return Err(ModelValidationError::Inconsistent(
                        "TRANSFER movement requires from and to locations".to_string(),
                    ));
                };
                if from == to {
                    return Err(ModelValidationError::Inconsistent(
                        "TRANSFER source and destination must differ".to_string(),
                    ));
                }
                if self.stock_location_id.is_some() {
                    return Err(ModelValidationError::Inconsistent(
                        "TRANSFER movement must not set stock_location_id".to_string(),
                    ));
                }
            }
        }

        match self.movement_type {
            MovementType::Adjustment if self.quantity.is_zero() => Err(
                ModelValidationError::Inconsistent("ADJUSTMENT quantity must not be zero".into()),
            ),
            MovementType::Adjustment => Ok(()),
            _ if self.quantity <= Decimal::ZERO => {
                Err(ModelValidationError::NonPositiveValue("movement.quantity"))
            }
            _ => Ok(()),
        }
    }
}
