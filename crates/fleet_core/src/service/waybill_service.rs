//! Waybill lifecycle.
//!
//! # Responsibility
//! - Create and edit DRAFT waybills.
//! - Drive the DRAFT/SUBMITTED/POSTED/CANCELLED state machine and apply its
//!   stock and blank side effects.
//!
//! # Invariants
//! - Every status change is checked against `WaybillStatus::can_transition_to`
//!   and runs in one immediate transaction with its side effects.
//! - Posting books the refuel transfer and the consumption expense at
//!   `waybill_date` under the waybill document; cancelling a posted waybill
//!   voids exactly those movements.
//! - A waybill holds at most one blank; it is RESERVED while the waybill is
//!   open, USED once posted and released back to the driver on cancel before
//!   posting. A blank spoiled while reserved is never released.

use crate::config::{BlankConfig, LedgerConfig};
use crate::model::blank::{BlankId, BlankStatus};
use crate::model::fleet::{Driver, Vehicle};
use crate::model::stock::{DocumentRef, LocationKind, NewMovement, StockMovement};
use crate::model::waybill::{Waybill, WaybillId, WaybillStatus};
use crate::model::{now_epoch_ms, ModelValidationError};
use crate::repo::blank_repo::SqliteBlankRepository;
use crate::repo::fleet_repo::{FleetRepository, SqliteFleetRepository};
use crate::repo::stock_repo::{MovementListQuery, SqliteStockRepository};
use crate::repo::waybill_repo::{SqliteWaybillRepository, WaybillListQuery, WaybillRepository};
use crate::repo::RepoError;
use crate::service::blank_service::{BlankService, BlankServiceError};
use crate::service::in_immediate_tx;
use crate::service::stock_service::{LedgerError, StockService};
use log::{info, warn};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug)]
pub enum WaybillServiceError {
    Validation(ModelValidationError),
    WaybillNotFound(WaybillId),
    VehicleNotFound(Uuid),
    DriverNotFound(Uuid),
    VehicleArchived(Uuid),
    DriverArchived(Uuid),
    /// Vehicle, driver or location belongs to another organization.
    OrganizationMismatch {
        entity: &'static str,
        id: Uuid,
    },
    InvalidTransition {
        from: WaybillStatus,
        to: WaybillStatus,
    },
    /// Only DRAFT waybills can be edited.
    NotEditable {
        id: WaybillId,
        status: WaybillStatus,
    },
    /// Fuel moves but the vehicle has no fuel item.
    MissingFuelItem(Uuid),
    MissingTankLocation(Uuid),
    /// Refuel source is unusable for this waybill.
    InvalidRefuelSource {
        location_id: Uuid,
        reason: &'static str,
    },
    Ledger(LedgerError),
    Blank(BlankServiceError),
    Repo(RepoError),
    InconsistentState(&'static str),
}

impl Display for WaybillServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::WaybillNotFound(id) => write!(f, "waybill not found: {id}"),
            Self::VehicleNotFound(id) => write!(f, "vehicle not found: {id}"),
            Self::DriverNotFound(id) => write!(f, "driver not found: {id}"),
            Self::VehicleArchived(id) => write!(f, "vehicle is archived: {id}"),
            Self::DriverArchived(id) => write!(f, "driver is archived: {id}"),
            Self::OrganizationMismatch { entity, id } => {
                write!(f, "{entity} {id} belongs to another organization")
            }
            Self::InvalidTransition { from, to } => write!(
                f,
                "waybill cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            Self::NotEditable { id, status } => write!(
                f,
                "waybill {id} is {} and can no longer be edited",
                status.as_str()
            ),
            Self::MissingFuelItem(id) => write!(f, "vehicle {id} has no fuel item"),
            Self::MissingTankLocation(id) => write!(f, "vehicle {id} has no tank location"),
            Self::InvalidRefuelSource {
                location_id,
                reason,
            } => write!(f, "refuel source {location_id} {reason}"),
            Self::Ledger(err) => write!(f, "{err}"),
            Self::Blank(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => {
                write!(f, "inconsistent waybill state: {details}")
            }
        }
    }
}

impl WaybillServiceError {
    /// Stable machine-readable code, safe to log.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::WaybillNotFound(_) => "waybill_not_found",
            Self::VehicleNotFound(_) => "vehicle_not_found",
            Self::DriverNotFound(_) => "driver_not_found",
            Self::VehicleArchived(_) => "vehicle_archived",
            Self::DriverArchived(_) => "driver_archived",
            Self::OrganizationMismatch { .. } => "organization_mismatch",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotEditable { .. } => "not_editable",
            Self::MissingFuelItem(_) => "missing_fuel_item",
            Self::MissingTankLocation(_) => "missing_tank_location",
            Self::InvalidRefuelSource { .. } => "invalid_refuel_source",
            Self::Ledger(LedgerError::InsufficientStock { .. }) => "insufficient_stock",
            Self::Ledger(LedgerError::ExternalRefConflict { .. }) => "external_ref_conflict",
            Self::Ledger(_) => "ledger_failed",
            Self::Blank(BlankServiceError::InvalidBlankTransition { .. }) => {
                "invalid_blank_transition"
            }
            Self::Blank(_) => "blank_failed",
            Self::Repo(_) => "storage_failed",
            Self::InconsistentState(_) => "inconsistent_state",
        }
    }
}

impl Error for WaybillServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Ledger(err) => Some(err),
            Self::Blank(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for WaybillServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::NotFound {
                entity: "waybill",
                id,
            } => Self::WaybillNotFound(id),
            RepoError::NotFound {
                entity: "vehicle",
                id,
            } => Self::VehicleNotFound(id),
            RepoError::NotFound {
                entity: "driver",
                id,
            } => Self::DriverNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<ModelValidationError> for WaybillServiceError {
    fn from(value: ModelValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<LedgerError> for WaybillServiceError {
    fn from(value: LedgerError) -> Self {
        Self::Ledger(value)
    }
}

impl From<BlankServiceError> for WaybillServiceError {
    fn from(value: BlankServiceError) -> Self {
        Self::Blank(value)
    }
}

/// Input of `WaybillService::create_draft`.
#[derive(Debug, Clone, Default)]
pub struct CreateWaybillRequest {
    pub organization_id: Uuid,
    pub vehicle_id: Uuid,
    pub driver_id: Uuid,
    pub waybill_date: i64,
    /// Required unless a blank is reserved; the blank number wins otherwise.
    pub number: Option<String>,
    /// Reserve a blank from the driver's pool.
    pub reserve_blank: bool,
    /// Specific blank to reserve; implies `reserve_blank`.
    pub blank_id: Option<BlankId>,
    /// Defaults to the vehicle odometer.
    pub odometer_start: Option<i64>,
    /// Defaults to the tank balance as of `waybill_date`.
    pub fuel_at_start: Option<Decimal>,
    pub refuel_source_location_id: Option<Uuid>,
    pub route: String,
    pub notes: Option<String>,
}

/// Partial edit of a DRAFT waybill; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct UpdateWaybillRequest {
    pub number: Option<String>,
    pub waybill_date: Option<i64>,
    pub odometer_start: Option<i64>,
    pub odometer_end: Option<i64>,
    pub fuel_at_start: Option<Decimal>,
    pub fuel_refueled: Option<Decimal>,
    pub fuel_at_end: Option<Decimal>,
    pub refuel_source_location_id: Option<Uuid>,
    pub route: Option<String>,
    pub notes: Option<String>,
}

/// Fuel figures of one waybill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaybillFuelSummary {
    pub waybill_id: WaybillId,
    pub distance_km: Option<i64>,
    pub fuel_consumed: Option<Decimal>,
    /// Norm consumption from the vehicle rate.
    pub planned_consumption: Option<Decimal>,
    /// `fuel_consumed - planned_consumption`; positive means overspend.
    pub deviation: Option<Decimal>,
    /// Ledger movements booked by this waybill, voided ones included.
    pub movements: Vec<StockMovement>,
}

// Repositories and sub-services bound to one transaction.
struct Scope<'tx> {
    waybills: SqliteWaybillRepository<'tx>,
    fleet: SqliteFleetRepository<'tx>,
    stock: StockService<SqliteStockRepository<'tx>>,
    blanks: BlankService<SqliteBlankRepository<'tx>>,
}

impl<'tx> Scope<'tx> {
    fn new(conn: &'tx Connection, ledger: LedgerConfig, blanks: BlankConfig) -> Self {
        Self {
            waybills: SqliteWaybillRepository::new(conn),
            fleet: SqliteFleetRepository::new(conn),
            stock: StockService::new(SqliteStockRepository::new(conn), ledger),
            blanks: BlankService::new(SqliteBlankRepository::new(conn), blanks.max_batch_size),
        }
    }

    fn load(&self, id: WaybillId) -> Result<Waybill, WaybillServiceError> {
        self.waybills
            .get_waybill(id)?
            .ok_or(WaybillServiceError::WaybillNotFound(id))
    }

    fn active_vehicle(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Vehicle, WaybillServiceError> {
        let vehicle = self
            .fleet
            .get_vehicle(id)?
            .ok_or(WaybillServiceError::VehicleNotFound(id))?;
        if vehicle.organization_id != organization_id {
            return Err(WaybillServiceError::OrganizationMismatch {
                entity: "vehicle",
                id,
            });
        }
        if vehicle.is_archived {
            return Err(WaybillServiceError::VehicleArchived(id));
        }
        Ok(vehicle)
    }

    fn active_driver(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Driver, WaybillServiceError> {
        let driver = self
            .fleet
            .get_driver(id)?
            .ok_or(WaybillServiceError::DriverNotFound(id))?;
        if driver.organization_id != organization_id {
            return Err(WaybillServiceError::OrganizationMismatch {
                entity: "driver",
                id,
            });
        }
        if driver.is_archived {
            return Err(WaybillServiceError::DriverArchived(id));
        }
        Ok(driver)
    }

    fn vehicle_of(&self, waybill: &Waybill) -> Result<Vehicle, WaybillServiceError> {
        self.fleet
            .get_vehicle(waybill.vehicle_id)?
            .ok_or(WaybillServiceError::VehicleNotFound(waybill.vehicle_id))
    }

    fn ensure_refuel_source(
        &self,
        waybill: &Waybill,
        vehicle: &Vehicle,
    ) -> Result<(), WaybillServiceError> {
        let Some(location_id) = waybill.refuel_source_location_id else {
            return Ok(());
        };
        let location = self.stock.get_location(location_id)?;
        if location.organization_id != waybill.organization_id {
            return Err(WaybillServiceError::OrganizationMismatch {
                entity: "stock location",
                id: location_id,
            });
        }
        if Some(location_id) == vehicle.tank_location_id {
            return Err(WaybillServiceError::InvalidRefuelSource {
                location_id,
                reason: "is the tank of the waybill vehicle",
            });
        }
        if location.kind == LocationKind::VehicleTank {
            return Err(WaybillServiceError::InvalidRefuelSource {
                location_id,
                reason: "is another vehicle tank",
            });
        }
        Ok(())
    }
}

/// Waybill use-case service.
pub struct WaybillService<'conn> {
    conn: &'conn mut Connection,
    ledger: LedgerConfig,
    blanks: BlankConfig,
}

impl<'conn> WaybillService<'conn> {
    pub fn new(conn: &'conn mut Connection, ledger: LedgerConfig, blanks: BlankConfig) -> Self {
        Self {
            conn,
            ledger,
            blanks,
        }
    }

    fn run<T>(
        &mut self,
        op: impl FnOnce(&Scope<'_>) -> Result<T, WaybillServiceError>,
    ) -> Result<T, WaybillServiceError> {
        let ledger = self.ledger;
        let blanks = self.blanks;
        in_immediate_tx(self.conn, |tx| op(&Scope::new(tx, ledger, blanks)))
    }

    fn read_scope(&self) -> Scope<'_> {
        Scope::new(&*self.conn, self.ledger, self.blanks)
    }

    /// Creates a DRAFT waybill, optionally reserving a blank for it.
    pub fn create_draft(
        &mut self,
        request: CreateWaybillRequest,
    ) -> Result<Waybill, WaybillServiceError> {
        let waybill = self.run(|scope| {
            let organization_id = request.organization_id;
            let vehicle = scope.active_vehicle(organization_id, request.vehicle_id)?;
            let driver = scope.active_driver(organization_id, request.driver_id)?;

            let mut waybill = Waybill::new_draft(
                organization_id,
                request.number.clone().unwrap_or_default(),
                request.waybill_date,
                vehicle.id,
                driver.id,
            );
            waybill.odometer_start = request.odometer_start.unwrap_or(vehicle.odometer);
            waybill.fuel_at_start = match request.fuel_at_start {
                Some(fuel) => fuel,
                None => match (vehicle.tank_location_id, vehicle.fuel_item_id) {
                    (Some(tank), Some(item)) => scope
                        .stock
                        .balance(tank, item, Some(request.waybill_date))?
                        .max(Decimal::ZERO),
                    _ => Decimal::ZERO,
                },
            };
            waybill.refuel_source_location_id = request.refuel_source_location_id;
            waybill.route = request.route.trim().to_string();
            waybill.notes = request.notes.clone();
            scope.ensure_refuel_source(&waybill, &vehicle)?;

            let blank = if request.reserve_blank || request.blank_id.is_some() {
                let blank = scope.blanks.pick_for_driver(driver.id, request.blank_id)?;
                waybill.number = blank.display_number();
                waybill.blank_id = Some(blank.id);
                Some(blank)
            } else {
                None
            };

            scope.waybills.create_waybill(&waybill)?;
            if let Some(blank) = blank {
                scope.blanks.reserve_for_waybill(
                    organization_id,
                    driver.id,
                    waybill.id,
                    Some(blank.id),
                )?;
            }
            scope.load(waybill.id)
        })?;

        info!(
            "event=waybill_create module=waybill status=ok waybill_id={} blank={}",
            waybill.id,
            waybill.blank_id.is_some()
        );
        Ok(waybill)
    }

    /// Applies `request` to a DRAFT waybill.
    pub fn update_draft(
        &mut self,
        id: WaybillId,
        request: UpdateWaybillRequest,
    ) -> Result<Waybill, WaybillServiceError> {
        self.run(|scope| {
            let mut waybill = scope.load(id)?;
            if waybill.status != WaybillStatus::Draft {
                return Err(WaybillServiceError::NotEditable {
                    id,
                    status: waybill.status,
                });
            }

            // A waybill with a blank keeps the blank number.
            if let Some(number) = request.number {
                if waybill.blank_id.is_none() {
                    waybill.number = number.trim().to_string();
                }
            }
            if let Some(date) = request.waybill_date {
                waybill.waybill_date = date;
            }
            if let Some(odometer) = request.odometer_start {
                waybill.odometer_start = odometer;
            }
            if let Some(odometer) = request.odometer_end {
                waybill.odometer_end = Some(odometer);
            }
            if let Some(fuel) = request.fuel_at_start {
                waybill.fuel_at_start = fuel;
            }
            if let Some(fuel) = request.fuel_refueled {
                waybill.fuel_refueled = fuel;
            }
            if let Some(fuel) = request.fuel_at_end {
                waybill.fuel_at_end = Some(fuel);
            }
            if let Some(location_id) = request.refuel_source_location_id {
                waybill.refuel_source_location_id = Some(location_id);
            }
            if let Some(route) = request.route {
                waybill.route = route.trim().to_string();
            }
            if let Some(notes) = request.notes {
                waybill.notes = Some(notes).filter(|value| !value.trim().is_empty());
            }

            let vehicle = scope.vehicle_of(&waybill)?;
            scope.ensure_refuel_source(&waybill, &vehicle)?;
            scope.waybills.update_waybill(&waybill)?;
            scope.load(id)
        })
    }

    /// DRAFT -> SUBMITTED once the closing readings are complete.
    pub fn submit(&mut self, id: WaybillId) -> Result<Waybill, WaybillServiceError> {
        self.change_status(id, WaybillStatus::Submitted, |scope, waybill| {
            waybill.validate_for_submit()?;
            let vehicle = scope.vehicle_of(waybill)?;
            scope.ensure_refuel_source(waybill, &vehicle)?;
            waybill.submitted_at = Some(now_epoch_ms());
            Ok(())
        })
    }

    /// SUBMITTED -> DRAFT for correction.
    pub fn return_to_draft(&mut self, id: WaybillId) -> Result<Waybill, WaybillServiceError> {
        self.change_status(id, WaybillStatus::Draft, |_, waybill| {
            waybill.submitted_at = None;
            Ok(())
        })
    }

    /// SUBMITTED -> POSTED, booking fuel movements and consuming the blank.
    pub fn post(&mut self, id: WaybillId) -> Result<Waybill, WaybillServiceError> {
        self.change_status(id, WaybillStatus::Posted, |scope, waybill| {
            waybill.validate_for_submit()?;
            let vehicle = scope.vehicle_of(waybill)?;
            let consumed = waybill
                .fuel_consumed()
                .ok_or(WaybillServiceError::InconsistentState(
                    "posted waybill without closing fuel level",
                ))?;
            let refueled = waybill.fuel_refueled;

            if refueled > Decimal::ZERO || consumed > Decimal::ZERO {
                let item_id = vehicle
                    .fuel_item_id
                    .ok_or(WaybillServiceError::MissingFuelItem(vehicle.id))?;
                let tank_id = vehicle
                    .tank_location_id
                    .ok_or(WaybillServiceError::MissingTankLocation(vehicle.id))?;
                let document = DocumentRef::waybill(waybill.id);

                if refueled > Decimal::ZERO {
                    let source_id = waybill.refuel_source_location_id.ok_or(
                        WaybillServiceError::InconsistentState("refuel without source location"),
                    )?;
                    scope.ensure_refuel_source(waybill, &vehicle)?;
                    scope.stock.record_movement(
                        NewMovement::transfer(
                            waybill.organization_id,
                            item_id,
                            source_id,
                            tank_id,
                            refueled,
                            waybill.waybill_date,
                        )
                        .with_external_ref(waybill.refuel_external_ref())
                        .with_document(document.clone())
                        .with_comment(format!("refuel by waybill {}", waybill.number)),
                    )?;
                }
                if consumed > Decimal::ZERO {
                    scope.stock.record_movement(
                        NewMovement::expense(
                            waybill.organization_id,
                            item_id,
                            tank_id,
                            consumed,
                            waybill.waybill_date,
                        )
                        .with_external_ref(waybill.expense_external_ref())
                        .with_document(document)
                        .with_comment(format!("consumption by waybill {}", waybill.number)),
                    )?;
                }
            }

            if let Some(blank_id) = waybill.blank_id {
                scope.blanks.consume(blank_id)?;
            }
            if let Some(odometer_end) = waybill.odometer_end {
                scope
                    .fleet
                    .advance_vehicle_odometer(vehicle.id, odometer_end)?;
            }
            waybill.posted_at = Some(now_epoch_ms());
            Ok(())
        })
    }

    /// Any open status -> CANCELLED.
    ///
    /// A posted waybill has its movements voided; an unposted one gives its
    /// reserved blank back to the driver unless the blank was spoiled.
    pub fn cancel(&mut self, id: WaybillId) -> Result<Waybill, WaybillServiceError> {
        self.change_status(id, WaybillStatus::Cancelled, |scope, waybill| {
            if waybill.status == WaybillStatus::Posted {
                let voided = scope
                    .stock
                    .void_document(&DocumentRef::waybill(waybill.id))?;
                if voided == 0 {
                    warn!(
                        "event=waybill_cancel module=waybill status=no_movements waybill_id={}",
                        waybill.id
                    );
                }
            } else if let Some(blank_id) = waybill.blank_id.take() {
                // A blank spoiled while reserved stays spoiled.
                if scope.blanks.get(blank_id)?.status != BlankStatus::Spoiled {
                    scope.blanks.release(blank_id)?;
                }
            }
            waybill.cancelled_at = Some(now_epoch_ms());
            Ok(())
        })
    }

    /// Moves the waybill to `next`, running that transition's side effects.
    pub fn transition(
        &mut self,
        id: WaybillId,
        next: WaybillStatus,
    ) -> Result<Waybill, WaybillServiceError> {
        match next {
            WaybillStatus::Draft => self.return_to_draft(id),
            WaybillStatus::Submitted => self.submit(id),
            WaybillStatus::Posted => self.post(id),
            WaybillStatus::Cancelled => self.cancel(id),
        }
    }

    pub fn get(&self, id: WaybillId) -> Result<Waybill, WaybillServiceError> {
        self.read_scope().load(id)
    }

    pub fn list(&self, query: &WaybillListQuery) -> Result<Vec<Waybill>, WaybillServiceError> {
        Ok(self.read_scope().waybills.list_waybills(query)?)
    }

    /// Distance, consumption against the vehicle norm and booked movements.
    pub fn fuel_summary(&self, id: WaybillId) -> Result<WaybillFuelSummary, WaybillServiceError> {
        let scope = self.read_scope();
        let waybill = scope.load(id)?;
        let vehicle = scope.vehicle_of(&waybill)?;
        let fuel_consumed = waybill.fuel_consumed();
        let planned_consumption = vehicle
            .fuel_rate_per_100km
            .and_then(|rate| waybill.planned_consumption(rate));
        let deviation = fuel_consumed
            .zip(planned_consumption)
            .map(|(actual, planned)| actual - planned);
        let movements = scope.stock.list_movements(&MovementListQuery {
            organization_id: Some(waybill.organization_id),
            document: Some(DocumentRef::waybill(waybill.id)),
            include_voided: true,
            ..MovementListQuery::default()
        })?;

        Ok(WaybillFuelSummary {
            waybill_id: waybill.id,
            distance_km: waybill.distance_km(),
            fuel_consumed,
            planned_consumption,
            deviation,
            movements,
        })
    }

    fn change_status(
        &mut self,
        id: WaybillId,
        next: WaybillStatus,
        apply: impl FnOnce(&Scope<'_>, &mut Waybill) -> Result<(), WaybillServiceError>,
    ) -> Result<Waybill, WaybillServiceError> {
        let (from, waybill) = self.run(|scope| {
            let mut waybill = scope.load(id)?;
            let from = waybill.status;
            if !from.can_transition_to(next) {
                return Err(WaybillServiceError::InvalidTransition { from, to: next });
            }
            apply(scope, &mut waybill)?;
            waybill.status = next;
            scope.waybills.update_waybill(&waybill)?;
            Ok((from, scope.load(id)?))
        })
        .inspect_err(|err| {
            warn!(
                "event=waybill_transition module=waybill status=rejected waybill_id={} to={} error_code={}",
                id,
                next.as_str(),
                err.code()
            );
        })?;

        info!(
            "event=waybill_transition module=waybill status=ok waybill_id={} from={} to={}",
            id,
            from.as_str(),
            next.as_str()
        );
        Ok(waybill)
    }
}
