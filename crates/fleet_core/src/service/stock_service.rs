//! Stock movement ledger.
//!
//! # Responsibility
//! - Record INCOME/EXPENSE/TRANSFER/ADJUSTMENT movements.
//! - Compute balances as of a point in time.
//!
//! # Invariants
//! - A replayed `external_ref` with an identical payload returns the stored
//!   movement; a different payload is a conflict.
//! - `occurred_seq` is unique per `(organization, occurred_at)` when assigned
//!   by the ledger.
//! - Unless `allow_negative_balance` is set, no movement may drive the
//!   balance of the location it decreases below zero at its own cursor or at
//!   any later cursor.

use crate::config::LedgerConfig;
use crate::model::stock::{
    DocumentRef, LedgerCursor, LocationKind, MovementId, NewMovement, StockItem, StockItemId,
    StockLocation, StockLocationId, StockMovement,
};
use crate::model::{now_epoch_ms, ModelValidationError};
use crate::repo::stock_repo::{
    BalanceComponents, MovementListQuery, SqliteStockRepository, StockRepository,
};
use crate::repo::RepoError;
use crate::service::in_immediate_tx;
use log::{info, warn};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug)]
pub enum LedgerError {
    Validation(ModelValidationError),
    ItemNotFound(StockItemId),
    LocationNotFound(StockLocationId),
    /// Item or location belongs to another organization.
    OrganizationMismatch { entity: &'static str, id: Uuid },
    /// `external_ref` was already used for a different movement.
    ExternalRefConflict {
        external_ref: String,
        existing: MovementId,
    },
    /// The movement would make a location balance negative.
    InsufficientStock {
        location_id: StockLocationId,
        stock_item_id: StockItemId,
        /// Balance the location would have at `at`.
        resulting_balance: Decimal,
        at: LedgerCursor,
    },
    Repo(RepoError),
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::ItemNotFound(id) => write!(f, "stock item not found: {id}"),
            Self::LocationNotFound(id) => write!(f, "stock location not found: {id}"),
            Self::OrganizationMismatch { entity, id } => {
                write!(f, "{entity} {id} belongs to another organization")
            }
            Self::ExternalRefConflict {
                external_ref,
                existing,
            } => write!(
                f,
                "external ref `{external_ref}` already used by movement {existing} with a different payload"
            ),
            Self::InsufficientStock {
                location_id,
                stock_item_id,
                resulting_balance,
                at,
            } => write!(
                f,
                "insufficient stock of item {stock_item_id} at location {location_id}: balance would be {resulting_balance} at {}#{}",
                at.occurred_at, at.occurred_seq
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LedgerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for LedgerError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ModelValidationError> for LedgerError {
    fn from(value: ModelValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Result of `StockService::record_movement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub movement: StockMovement,
    /// True when an identical movement with the same `external_ref` existed.
    pub replayed: bool,
}

/// Balance of one item at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationBalance {
    pub location_id: StockLocationId,
    pub stock_item_id: StockItemId,
    pub balance: Decimal,
}

/// One line of a location statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementLine {
    pub movement: StockMovement,
    /// Signed effect on the statement location.
    pub delta: Decimal,
    pub running_balance: Decimal,
}

/// Location statement over a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub location_id: StockLocationId,
    pub stock_item_id: StockItemId,
    pub opening_balance: Decimal,
    pub lines: Vec<StatementLine>,
    pub closing_balance: Decimal,
}

/// Ledger service over a stock repository.
pub struct StockService<R: StockRepository> {
    repo: R,
    config: LedgerConfig,
}

impl<R: StockRepository> StockService<R> {
    pub fn new(repo: R, config: LedgerConfig) -> Self {
        Self { repo, config }
    }

    pub fn create_item(
        &self,
        organization_id: Uuid,
        name: &str,
        unit: &str,
    ) -> Result<StockItem, LedgerError> {
        let item = StockItem::new(organization_id, name, unit);
        self.repo.create_item(&item)?;
        Ok(item)
    }

    pub fn create_location(&self, location: &StockLocation) -> Result<(), LedgerError> {
        self.repo.create_location(location)?;
        Ok(())
    }

    pub fn list_items(&self, organization_id: Uuid) -> Result<Vec<StockItem>, LedgerError> {
        Ok(self.repo.list_items(organization_id)?)
    }

    pub fn list_locations(
        &self,
        organization_id: Uuid,
        kind: Option<LocationKind>,
    ) -> Result<Vec<StockLocation>, LedgerError> {
        Ok(self.repo.list_locations(organization_id, kind)?)
    }

    pub fn get_location(&self, id: StockLocationId) -> Result<StockLocation, LedgerError> {
        self.repo
            .get_location(id)?
            .ok_or(LedgerError::LocationNotFound(id))
    }

    /// Records one movement; see module invariants.
    ///
    /// Callers must run this inside a transaction so the balance check and
    /// the insert are atomic; `record_movement_atomic` does that.
    pub fn record_movement(&self, draft: NewMovement) -> Result<RecordOutcome, LedgerError> {
        let mut draft = draft;
        draft.normalize();
        draft.validate()?;

        if let Some(external_ref) = draft.external_ref.as_deref() {
            if let Some(existing) = self
                .repo
                .find_by_external_ref(draft.organization_id, external_ref)?
            {
                if existing.matches_draft(&draft) {
                    info!(
                        "event=stock_movement_record module=ledger status=replayed movement_id={}",
                        existing.id
                    );
                    return Ok(RecordOutcome {
                        movement: existing,
                        replayed: true,
                    });
                }
                warn!(
                    "event=stock_movement_record module=ledger status=conflict movement_id={}",
                    existing.id
                );
                return Err(LedgerError::ExternalRefConflict {
                    external_ref: external_ref.to_string(),
                    existing: existing.id,
                });
            }
        }

        self.ensure_references(&draft)?;

        let occurred_seq = match draft.occurred_seq {
            Some(seq) => seq,
            None => match self
                .repo
                .max_seq_at(draft.organization_id, draft.occurred_at)?
            {
                Some(seq) => seq.checked_add(1).ok_or_else(|| {
                    ModelValidationError::Inconsistent(format!(
                        "no sequence number left after {seq} at {}",
                        draft.occurred_at
                    ))
                })?,
                None => 1,
            },
        };

        let movement = StockMovement {
            id: Uuid::new_v4(),
            organization_id: draft.organization_id,
            stock_item_id: draft.stock_item_id,
            movement_type: draft.movement_type,
            quantity: draft.quantity,
            stock_location_id: draft.stock_location_id,
            from_location_id: draft.from_location_id,
            to_location_id: draft.to_location_id,
            occurred_at: draft.occurred_at,
            occurred_seq,
            document: draft.document.clone(),
            external_ref: draft.external_ref.clone(),
            comment: draft.comment.clone(),
            is_voided: false,
            created_at: now_epoch_ms(),
        };

        if !self.config.allow_negative_balance {
            if let Some(location_id) = draft.decreased_location() {
                self.ensure_non_negative(&movement, location_id)?;
            }
        }

        self.repo.insert_movement(&movement)?;
        info!(
            "event=stock_movement_record module=ledger status=ok movement_id={} type={} occurred_at={} seq={}",
            movement.id,
            movement.movement_type.as_str(),
            movement.occurred_at,
            movement.occurred_seq
        );

        Ok(RecordOutcome {
            movement,
            replayed: false,
        })
    }

    /// Balance of `item_id` at `location_id` including every movement with
    /// `occurred_at <= as_of`; all movements when `as_of` is `None`.
    pub fn balance(
        &self,
        location_id: StockLocationId,
        item_id: StockItemId,
        as_of: Option<i64>,
    ) -> Result<Decimal, LedgerError> {
        let cursor = as_of.map_or_else(LedgerCursor::latest, LedgerCursor::end_of);
        self.balance_at_cursor(location_id, item_id, cursor)
    }

    /// Balance including movements up to and including `cursor`.
    pub fn balance_at_cursor(
        &self,
        location_id: StockLocationId,
        item_id: StockItemId,
        cursor: LedgerCursor,
    ) -> Result<Decimal, LedgerError> {
        Ok(self.balance_components(location_id, item_id, cursor)?.total())
    }

    pub fn balance_components(
        &self,
        location_id: StockLocationId,
        item_id: StockItemId,
        cursor: LedgerCursor,
    ) -> Result<BalanceComponents, LedgerError> {
        Ok(self.repo.balance_components(location_id, item_id, cursor)?)
    }

    /// Balances of every `(location, item)` pair the organization has used.
    ///
    /// Pairs whose balance is zero are omitted.
    pub fn location_balances(
        &self,
        organization_id: Uuid,
        as_of: Option<i64>,
    ) -> Result<Vec<LocationBalance>, LedgerError> {
        let mut balances = Vec::new();
        for (location_id, stock_item_id) in self.repo.balance_keys(organization_id)? {
            let balance = self.balance(location_id, stock_item_id, as_of)?;
            if !balance.is_zero() {
                balances.push(LocationBalance {
                    location_id,
                    stock_item_id,
                    balance,
                });
            }
        }
        Ok(balances)
    }

    /// Statement of one location/item between `from` and `to` (inclusive).
    pub fn statement(
        &self,
        location_id: StockLocationId,
        item_id: StockItemId,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Statement, LedgerError> {
        let opening_balance = match from {
            Some(from) => self.balance(location_id, item_id, Some(from.saturating_sub(1)))?,
            None => Decimal::ZERO,
        };
        let movements = self.repo.list_movements(&MovementListQuery {
            stock_item_id: Some(item_id),
            location_id: Some(location_id),
            from,
            to,
            ..MovementListQuery::default()
        })?;

        let mut running_balance = opening_balance;
        let lines = movements
            .into_iter()
            .map(|movement| {
                let delta = movement.delta_for(location_id);
                running_balance += delta;
                StatementLine {
                    movement,
                    delta,
                    running_balance,
                }
            })
            .collect();

        Ok(Statement {
            location_id,
            stock_item_id: item_id,
            opening_balance,
            lines,
            closing_balance: running_balance,
        })
    }

    pub fn list_movements(
        &self,
        query: &MovementListQuery,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        Ok(self.repo.list_movements(query)?)
    }

    /// Voids every movement produced by `document`.
    pub fn void_document(&self, document: &DocumentRef) -> Result<usize, LedgerError> {
        let voided = self.repo.void_document_movements(document)?;
        info!(
            "event=stock_document_void module=ledger status=ok doc_type={} voided={}",
            document.doc_type, voided
        );
        Ok(voided)
    }

    fn ensure_references(&self, draft: &NewMovement) -> Result<(), LedgerError> {
        let item = self
            .repo
            .get_item(draft.stock_item_id)?
            .ok_or(LedgerError::ItemNotFound(draft.stock_item_id))?;
        if item.organization_id != draft.organization_id {
            return Err(LedgerError::OrganizationMismatch {
                entity: "stock item",
                id: item.id,
            });
        }

        for location_id in draft.locations() {
            let location = self
                .repo
                .get_location(location_id)?
                .ok_or(LedgerError::LocationNotFound(location_id))?;
            if location.organization_id != draft.organization_id {
                return Err(LedgerError::OrganizationMismatch {
                    entity: "stock location",
                    id: location.id,
                });
            }
        }
        Ok(())
    }

    // Walks the location forward from the new cursor so a backdated
    // movement cannot break a later balance.
    fn ensure_non_negative(
        &self,
        movement: &StockMovement,
        location_id: StockLocationId,
    ) -> Result<(), LedgerError> {
        let cursor = movement.cursor();
        let insufficient = |resulting_balance: Decimal, at: LedgerCursor| {
            LedgerError::InsufficientStock {
                location_id,
                stock_item_id: movement.stock_item_id,
                resulting_balance,
                at,
            }
        };

        let mut running = self
            .repo
            .balance_components(location_id, movement.stock_item_id, cursor)?
            .total()
            + movement.delta_for(location_id);
        if running < Decimal::ZERO {
            return Err(insufficient(running, cursor));
        }

        for later in self
            .repo
            .movements_after(location_id, movement.stock_item_id, cursor)?
        {
            running += later.delta_for(location_id);
            if running < Decimal::ZERO {
                return Err(insufficient(running, later.cursor()));
            }
        }
        Ok(())
    }
}

/// Records one movement inside its own immediate transaction.
pub fn record_movement_atomic(
    conn: &mut Connection,
    config: LedgerConfig,
    draft: NewMovement,
) -> Result<RecordOutcome, LedgerError> {
    in_immediate_tx(conn, |tx| {
        StockService::new(SqliteStockRepository::new(tx), config).record_movement(draft)
    })
}
