//! Organization, driver and vehicle persistence.
//!
//! # Invariants
//! - Plate numbers are unique per organization.
//! - `updated_at` is refreshed by every update statement.

use super::{
    bool_to_int, get_bool, get_opt_uuid, get_uuid, map_conflict, opt_id, push_pagination,
    RepoError, RepoResult,
};
use crate::model::fleet::{Driver, DriverId, Organization, OrganizationId, Vehicle, VehicleId};
use crate::model::quantity::{from_milli, to_milli};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const ORGANIZATION_SELECT_SQL: &str = "SELECT
    id, name, inn, is_archived, created_at, updated_at
FROM organizations";

const DRIVER_SELECT_SQL: &str = "SELECT
    id, organization_id, full_name, license_number, fuel_card_location_id,
    is_archived, created_at, updated_at
FROM drivers";

const VEHICLE_SELECT_SQL: &str = "SELECT
    id, organization_id, plate_number, model, fuel_item_id, fuel_rate_milli,
    tank_location_id, odometer, is_archived, created_at, updated_at
FROM vehicles";

/// Filter for driver and vehicle listings.
#[derive(Debug, Clone, Default)]
pub struct FleetListQuery {
    pub organization_id: Option<OrganizationId>,
    pub include_archived: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

pub trait FleetRepository {
    fn create_organization(&self, organization: &Organization) -> RepoResult<OrganizationId>;
    fn update_organization(&self, organization: &Organization) -> RepoResult<()>;
    fn get_organization(&self, id: OrganizationId) -> RepoResult<Option<Organization>>;
    fn list_organizations(&self, include_archived: bool) -> RepoResult<Vec<Organization>>;

    fn create_driver(&self, driver: &Driver) -> RepoResult<DriverId>;
    fn update_driver(&self, driver: &Driver) -> RepoResult<()>;
    fn get_driver(&self, id: DriverId) -> RepoResult<Option<Driver>>;
    fn list_drivers(&self, query: &FleetListQuery) -> RepoResult<Vec<Driver>>;

    fn create_vehicle(&self, vehicle: &Vehicle) -> RepoResult<VehicleId>;
    fn update_vehicle(&self, vehicle: &Vehicle) -> RepoResult<()>;
    fn get_vehicle(&self, id: VehicleId) -> RepoResult<Option<Vehicle>>;
    fn list_vehicles(&self, query: &FleetListQuery) -> RepoResult<Vec<Vehicle>>;
    /// Moves the odometer forward; lower readings are ignored.
    fn advance_vehicle_odometer(&self, id: VehicleId, odometer: i64) -> RepoResult<()>;
}

/// SQLite-backed fleet repository. Also usable on a `Transaction`.
pub struct SqliteFleetRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteFleetRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl FleetRepository for SqliteFleetRepository<'_> {
    fn create_organization(&self, organization: &Organization) -> RepoResult<OrganizationId> {
        organization.validate()?;
        self.conn
            .execute(
                "INSERT INTO organizations (id, name, inn, is_archived)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    organization.id.to_string(),
                    organization.name.as_str(),
                    organization.inn.as_deref(),
                    bool_to_int(organization.is_archived),
                ],
            )
            .map_err(|err| {
                map_conflict(err, || {
                    format!(
                        "organization with inn `{}` already exists",
                        organization.inn.as_deref().unwrap_or_default()
                    )
                })
            })?;
        Ok(organization.id)
    }

    fn update_organization(&self, organization: &Organization) -> RepoResult<()> {
        organization.validate()?;
        let changed = self
            .conn
            .execute(
                "UPDATE organizations
                 SET
                    name = ?2,
                    inn = ?3,
                    is_archived = ?4,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                params![
                    organization.id.to_string(),
                    organization.name.as_str(),
                    organization.inn.as_deref(),
                    bool_to_int(organization.is_archived),
                ],
            )
            .map_err(|err| map_conflict(err, || "organization inn already in use".to_string()))?;
        if changed == 0 {
            return Err(RepoError::not_found("organization", organization.id));
        }
        Ok(())
    }

    fn get_organization(&self, id: OrganizationId) -> RepoResult<Option<Organization>> {
        self.conn
            .query_row(
                &format!("{ORGANIZATION_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_organization_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_organizations(&self, include_archived: bool) -> RepoResult<Vec<Organization>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ORGANIZATION_SELECT_SQL}
             WHERE (?1 = 1 OR is_archived = 0)
             ORDER BY name COLLATE NOCASE ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([bool_to_int(include_archived)])?;
        let mut organizations = Vec::new();
        while let Some(row) = rows.next()? {
            organizations.push(parse_organization_row(row)?);
        }
        Ok(organizations)
    }

    fn create_driver(&self, driver: &Driver) -> RepoResult<DriverId> {
        driver.validate()?;
        self.conn.execute(
            "INSERT INTO drivers (
                id, organization_id, full_name, license_number,
                fuel_card_location_id, is_archived
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                driver.id.to_string(),
                driver.organization_id.to_string(),
                driver.full_name.as_str(),
                driver.license_number.as_deref(),
                opt_id(driver.fuel_card_location_id),
                bool_to_int(driver.is_archived),
            ],
        )?;
        Ok(driver.id)
    }

    fn update_driver(&self, driver: &Driver) -> RepoResult<()> {
        driver.validate()?;
        let changed = self.conn.execute(
            "UPDATE drivers
             SET
                full_name = ?2,
                license_number = ?3,
                fuel_card_location_id = ?4,
                is_archived = ?5,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                driver.id.to_string(),
                driver.full_name.as_str(),
                driver.license_number.as_deref(),
                opt_id(driver.fuel_card_location_id),
                bool_to_int(driver.is_archived),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("driver", driver.id));
        }
        Ok(())
    }

    fn get_driver(&self, id: DriverId) -> RepoResult<Option<Driver>> {
        self.conn
            .query_row(
                &format!("{DRIVER_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_driver_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_drivers(&self, query: &FleetListQuery) -> RepoResult<Vec<Driver>> {
        let (sql, binds) = list_sql(DRIVER_SELECT_SQL, "full_name", query);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut drivers = Vec::new();
        while let Some(row) = rows.next()? {
            drivers.push(parse_driver_row(row)?);
        }
        Ok(drivers)
    }

    fn create_vehicle(&self, vehicle: &Vehicle) -> RepoResult<VehicleId> {
        vehicle.validate()?;
        let rate_milli = vehicle.fuel_rate_per_100km.map(to_milli).transpose()?;
        self.conn
            .execute(
                "INSERT INTO vehicles (
                    id, organization_id, plate_number, model, fuel_item_id,
                    fuel_rate_milli, tank_location_id, odometer, is_archived
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
                params![
                    vehicle.id.to_string(),
                    vehicle.organization_id.to_string(),
                    vehicle.plate_number.as_str(),
                    vehicle.model.as_str(),
                    opt_id(vehicle.fuel_item_id),
                    rate_milli,
                    opt_id(vehicle.tank_location_id),
                    vehicle.odometer,
                    bool_to_int(vehicle.is_archived),
                ],
            )
            .map_err(|err| {
                map_conflict(err, || {
                    format!("vehicle `{}` already exists", vehicle.plate_number)
                })
            })?;
        Ok(vehicle.id)
    }

    fn update_vehicle(&self, vehicle: &Vehicle) -> RepoResult<()> {
        vehicle.validate()?;
        let rate_milli = vehicle.fuel_rate_per_100km.map(to_milli).transpose()?;
        let changed = self
            .conn
            .execute(
                "UPDATE vehicles
                 SET
                    plate_number = ?2,
                    model = ?3,
                    fuel_item_id = ?4,
                    fuel_rate_milli = ?5,
                    tank_location_id = ?6,
                    odometer = ?7,
                    is_archived = ?8,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                params![
                    vehicle.id.to_string(),
                    vehicle.plate_number.as_str(),
                    vehicle.model.as_str(),
                    opt_id(vehicle.fuel_item_id),
                    rate_milli,
                    opt_id(vehicle.tank_location_id),
                    vehicle.odometer,
                    bool_to_int(vehicle.is_archived),
                ],
            )
            .map_err(|err| {
                map_conflict(err, || {
                    format!("vehicle `{}` already exists", vehicle.plate_number)
                })
            })?;
        if changed == 0 {
            return Err(RepoError::not_found("vehicle", vehicle.id));
        }
        Ok(())
    }

    fn get_vehicle(&self, id: VehicleId) -> RepoResult<Option<Vehicle>> {
        self.conn
            .query_row(
                &format!("{VEHICLE_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_vehicle_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_vehicles(&self, query: &FleetListQuery) -> RepoResult<Vec<Vehicle>> {
        let (sql, binds) = list_sql(VEHICLE_SELECT_SQL, "plate_number", query);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut vehicles = Vec::new();
        while let Some(row) = rows.next()? {
            vehicles.push(parse_vehicle_row(row)?);
        }
        Ok(vehicles)
    }

    fn advance_vehicle_odometer(&self, id: VehicleId, odometer: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE vehicles
             SET
                odometer = MAX(odometer, ?2),
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id.to_string(), odometer],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("vehicle", id));
        }
        Ok(())
    }
}

fn list_sql(select_sql: &str, order_column: &str, query: &FleetListQuery) -> (String, Vec<Value>) {
    let mut sql = format!("{select_sql} WHERE 1 = 1");
    let mut binds = Vec::new();
    if !query.include_archived {
        sql.push_str(" AND is_archived = 0");
    }
    if let Some(organization_id) = query.organization_id {
        sql.push_str(" AND organization_id = ?");
        binds.push(Value::Text(organization_id.to_string()));
    }
    sql.push_str(&format!(" ORDER BY {order_column} COLLATE NOCASE ASC, id ASC"));
    push_pagination(&mut sql, &mut binds, query.limit, query.offset);
    (sql, binds)
}

fn parse_organization_row(row: &Row<'_>) -> RepoResult<Organization> {
    let organization = Organization {
        id: get_uuid(row, "id")?,
        name: row.get("name")?,
        inn: row.get("inn")?,
        is_archived: get_bool(row, "is_archived")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    organization.validate()?;
    Ok(organization)
}

fn parse_driver_row(row: &Row<'_>) -> RepoResult<Driver> {
    let driver = Driver {
        id: get_uuid(row, "id")?,
        organization_id: get_uuid(row, "organization_id")?,
        full_name: row.get("full_name")?,
        license_number: row.get("license_number")?,
        fuel_card_location_id: get_opt_uuid(row, "fuel_card_location_id")?,
        is_archived: get_bool(row, "is_archived")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    driver.validate()?;
    Ok(driver)
}

fn parse_vehicle_row(row: &Row<'_>) -> RepoResult<Vehicle> {
    let vehicle = Vehicle {
        id: get_uuid(row, "id")?,
        organization_id: get_uuid(row, "organization_id")?,
        plate_number: row.get("plate_number")?,
        model: row.get("model")?,
        fuel_item_id: get_opt_uuid(row, "fuel_item_id")?,
        fuel_rate_per_100km: row.get::<_, Option<i64>>("fuel_rate_milli")?.map(from_milli),
        tank_location_id: get_opt_uuid(row, "tank_location_id")?,
        odometer: row.get("odometer")?,
        is_archived: get_bool(row, "is_archived")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    vehicle.validate()?;
    Ok(vehicle)
}
