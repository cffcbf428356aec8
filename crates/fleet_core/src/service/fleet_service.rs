//! Organization, driver and vehicle use-cases.
//!
//! # Responsibility
//! - Create, update, read, list and archive fleet master data.
//! - Create the stock locations owned by vehicles and drivers.
//!
//! # Invariants
//! - New drivers and vehicles require an active organization.
//! - Every vehicle owns exactly one VEHICLE_TANK location, created in the
//!   same transaction as the vehicle.
//! - `organization_id` and `tank_location_id` never change after creation.

use crate::model::fleet::{
    normalize_plate_number, Driver, DriverId, Organization, OrganizationId, Vehicle, VehicleId,
};
use crate::model::stock::{LocationKind, StockLocation};
use crate::model::ModelValidationError;
use crate::repo::fleet_repo::{FleetListQuery, FleetRepository, SqliteFleetRepository};
use crate::repo::stock_repo::{SqliteStockRepository, StockRepository};
use crate::repo::RepoError;
use crate::service::in_immediate_tx;
use log::info;
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug)]
pub enum FleetServiceError {
    Validation(ModelValidationError),
    OrganizationNotFound(OrganizationId),
    DriverNotFound(DriverId),
    VehicleNotFound(VehicleId),
    StockItemNotFound(Uuid),
    OrganizationArchived(OrganizationId),
    /// Referenced record belongs to another organization.
    OrganizationMismatch {
        entity: &'static str,
        id: Uuid,
    },
    /// An update tried to change a field fixed at creation.
    ImmutableField(&'static str),
    FuelCardAlreadyAttached(DriverId),
    Repo(RepoError),
    /// Write succeeded but the read-back did not find the record.
    InconsistentState(&'static str),
}

impl Display for FleetServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::OrganizationNotFound(id) => write!(f, "organization not found: {id}"),
            Self::DriverNotFound(id) => write!(f, "driver not found: {id}"),
            Self::VehicleNotFound(id) => write!(f, "vehicle not found: {id}"),
            Self::StockItemNotFound(id) => write!(f, "stock item not found: {id}"),
            Self::OrganizationArchived(id) => write!(f, "organization is archived: {id}"),
            Self::OrganizationMismatch { entity, id } => {
                write!(f, "{entity} {id} belongs to another organization")
            }
            Self::ImmutableField(field) => write!(f, "`{field}` cannot be changed"),
            Self::FuelCardAlreadyAttached(id) => {
                write!(f, "driver {id} already has a fuel card location")
            }
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent fleet state: {details}"),
        }
    }
}

impl Error for FleetServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for FleetServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::NotFound {
                entity: "organization",
                id,
            } => Self::OrganizationNotFound(id),
            RepoError::NotFound {
                entity: "driver",
                id,
            } => Self::DriverNotFound(id),
            RepoError::NotFound {
                entity: "vehicle",
                id,
            } => Self::VehicleNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<ModelValidationError> for FleetServiceError {
    fn from(value: ModelValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Input of `FleetService::create_vehicle`.
#[derive(Debug, Clone, Default)]
pub struct CreateVehicleRequest {
    pub organization_id: OrganizationId,
    pub plate_number: String,
    pub model: String,
    pub fuel_item_id: Option<Uuid>,
    pub fuel_rate_per_100km: Option<Decimal>,
    pub odometer: i64,
}

/// Fleet master-data service.
///
/// Holds the connection mutably because vehicle and fuel card creation open
/// their own transactions.
pub struct FleetService<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> FleetService<'conn> {
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }

    fn repo(&self) -> SqliteFleetRepository<'_> {
        SqliteFleetRepository::new(&*self.conn)
    }

    pub fn create_organization(
        &self,
        name: &str,
        inn: Option<String>,
    ) -> Result<Organization, FleetServiceError> {
        let organization = Organization::new(name, inn);
        let id = self.repo().create_organization(&organization)?;
        info!(
            "event=organization_create module=fleet status=ok organization_id={}",
            id
        );
        self.repo()
            .get_organization(id)?
            .ok_or(FleetServiceError::InconsistentState(
                "created organization not found in read-back",
            ))
    }

    pub fn update_organization(
        &self,
        organization: &Organization,
    ) -> Result<Organization, FleetServiceError> {
        self.repo().update_organization(organization)?;
        self.get_organization(organization.id)
    }

    pub fn get_organization(&self, id: OrganizationId) -> Result<Organization, FleetServiceError> {
        self.repo()
            .get_organization(id)?
            .ok_or(FleetServiceError::OrganizationNotFound(id))
    }

    pub fn list_organizations(
        &self,
        include_archived: bool,
    ) -> Result<Vec<Organization>, FleetServiceError> {
        Ok(self.repo().list_organizations(include_archived)?)
    }

    pub fn archive_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Organization, FleetServiceError> {
        let mut organization = self.get_organization(id)?;
        organization.is_archived = true;
        self.update_organization(&organization)
    }

    pub fn create_driver(
        &self,
        organization_id: OrganizationId,
        full_name: &str,
        license_number: Option<String>,
    ) -> Result<Driver, FleetServiceError> {
        self.active_organization(organization_id)?;
        let mut driver = Driver::new(organization_id, full_name);
        driver.license_number = license_number
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let id = self.repo().create_driver(&driver)?;
        info!(
            "event=driver_create module=fleet status=ok driver_id={}",
            id
        );
        self.repo()
            .get_driver(id)?
            .ok_or(FleetServiceError::InconsistentState(
                "created driver not found in read-back",
            ))
    }

    pub fn update_driver(&self, driver: &Driver) -> Result<Driver, FleetServiceError> {
        let current = self.get_driver(driver.id)?;
        if current.organization_id != driver.organization_id {
            return Err(FleetServiceError::ImmutableField("driver.organization_id"));
        }
        if current.fuel_card_location_id != driver.fuel_card_location_id {
            return Err(FleetServiceError::ImmutableField(
                "driver.fuel_card_location_id",
            ));
        }
        self.repo().update_driver(driver)?;
        self.get_driver(driver.id)
    }

    pub fn get_driver(&self, id: DriverId) -> Result<Driver, FleetServiceError> {
        self.repo()
            .get_driver(id)?
            .ok_or(FleetServiceError::DriverNotFound(id))
    }

    pub fn list_drivers(&self, query: &FleetListQuery) -> Result<Vec<Driver>, FleetServiceError> {
        Ok(self.repo().list_drivers(query)?)
    }

    pub fn archive_driver(&self, id: DriverId) -> Result<Driver, FleetServiceError> {
        let mut driver = self.get_driver(id)?;
        driver.is_archived = true;
        self.repo().update_driver(&driver)?;
        self.get_driver(id)
    }

    /// Creates a FUEL_CARD location owned by the driver and links it.
    pub fn attach_fuel_card(
        &mut self,
        driver_id: DriverId,
        name: &str,
    ) -> Result<StockLocation, FleetServiceError> {
        let location = in_immediate_tx(self.conn, |tx| -> Result<_, FleetServiceError> {
            let fleet = SqliteFleetRepository::new(tx);
            let mut driver = fleet
                .get_driver(driver_id)?
                .ok_or(FleetServiceError::DriverNotFound(driver_id))?;
            if driver.fuel_card_location_id.is_some() {
                return Err(FleetServiceError::FuelCardAlreadyAttached(driver_id));
            }

            let mut location =
                StockLocation::new(driver.organization_id, name, LocationKind::FuelCard);
            location.driver_id = Some(driver.id);
            SqliteStockRepository::new(tx).create_location(&location)?;

            driver.fuel_card_location_id = Some(location.id);
            fleet.update_driver(&driver)?;
            Ok(location)
        })?;
        info!(
            "event=fuel_card_attach module=fleet status=ok driver_id={} location_id={}",
            driver_id, location.id
        );
        Ok(location)
    }

    /// Creates a vehicle together with its VEHICLE_TANK location.
    pub fn create_vehicle(
        &mut self,
        request: CreateVehicleRequest,
    ) -> Result<Vehicle, FleetServiceError> {
        let organization = self.active_organization(request.organization_id)?;
        let mut vehicle = Vehicle::new(organization.id, &request.plate_number, request.model);
        vehicle.fuel_item_id = request.fuel_item_id;
        vehicle.fuel_rate_per_100km = request.fuel_rate_per_100km;
        vehicle.odometer = request.odometer;
        vehicle.validate()?;

        let vehicle_id = in_immediate_tx(self.conn, |tx| -> Result<_, FleetServiceError> {
            let stock = SqliteStockRepository::new(tx);
            ensure_fuel_item(&stock, &vehicle)?;

            let fleet = SqliteFleetRepository::new(tx);
            fleet.create_vehicle(&vehicle)?;

            let mut tank = StockLocation::new(
                vehicle.organization_id,
                format!("Tank {}", vehicle.plate_number),
                LocationKind::VehicleTank,
            );
            tank.vehicle_id = Some(vehicle.id);
            stock.create_location(&tank)?;

            vehicle.tank_location_id = Some(tank.id);
            fleet.update_vehicle(&vehicle)?;
            Ok(vehicle.id)
        })?;

        info!(
            "event=vehicle_create module=fleet status=ok vehicle_id={}",
            vehicle_id
        );
        self.get_vehicle(vehicle_id)
    }

    pub fn update_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle, FleetServiceError> {
        let current = self.get_vehicle(vehicle.id)?;
        if current.organization_id != vehicle.organization_id {
            return Err(FleetServiceError::ImmutableField("vehicle.organization_id"));
        }
        if current.tank_location_id != vehicle.tank_location_id {
            return Err(FleetServiceError::ImmutableField("vehicle.tank_location_id"));
        }
        let mut vehicle = vehicle.clone();
        vehicle.plate_number = normalize_plate_number(&vehicle.plate_number);
        ensure_fuel_item(&SqliteStockRepository::new(&*self.conn), &vehicle)?;
        self.repo().update_vehicle(&vehicle)?;
        self.get_vehicle(vehicle.id)
    }

    pub fn get_vehicle(&self, id: VehicleId) -> Result<Vehicle, FleetServiceError> {
        self.repo()
            .get_vehicle(id)?
            .ok_or(FleetServiceError::VehicleNotFound(id))
    }

    pub fn list_vehicles(
        &self,
        query: &FleetListQuery,
    ) -> Result<Vec<Vehicle>, FleetServiceError> {
        Ok(self.repo().list_vehicles(query)?)
    }

    pub fn archive_vehicle(&self, id: VehicleId) -> Result<Vehicle, FleetServiceError> {
        let mut vehicle = self.get_vehicle(id)?;
        vehicle.is_archived = true;
        self.repo().update_vehicle(&vehicle)?;
        self.get_vehicle(id)
    }

    fn active_organization(&self, id: OrganizationId) -> Result<Organization, FleetServiceError> {
        let organization = self.get_organization(id)?;
        if organization.is_archived {
            return Err(FleetServiceError::OrganizationArchived(id));
        }
        Ok(organization)
    }
}

fn ensure_fuel_item<S: StockRepository>(
    stock: &S,
    vehicle: &Vehicle,
) -> Result<(), FleetServiceError> {
    let Some(item_id) = vehicle.fuel_item_id else {
        return Ok(());
    };
    let item = stock
        .get_item(item_id)?
        .ok_or(FleetServiceError::StockItemNotFound(item_id))?;
    if item.organization_id != vehicle.organization_id {
        return Err(FleetServiceError::OrganizationMismatch {
            entity: "stock item",
            id: item_id,
        });
    }
    Ok(())
}
