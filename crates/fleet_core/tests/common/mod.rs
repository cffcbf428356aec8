#![allow(dead_code)]

use fleet_core::repo::stock_repo::SqliteStockRepository;
use fleet_core::{
    open_db_in_memory, record_movement_atomic, CreateVehicleRequest, Driver, FleetService,
    LedgerConfig, LocationKind, NewMovement, Organization, RecordOutcome, StockItem,
    StockLocation, StockService, Vehicle,
};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::str::FromStr;

/// 2024-01-01T00:00:00Z.
pub const T0: i64 = 1_704_067_200_000;
pub const DAY_MS: i64 = 86_400_000;

/// One organization with a diesel item, a warehouse, a driver and a vehicle.
pub struct Depot {
    pub conn: Connection,
    pub org: Organization,
    pub diesel: StockItem,
    pub warehouse: StockLocation,
    pub driver: Driver,
    pub vehicle: Vehicle,
}

impl Depot {
    pub fn tank(&self) -> uuid::Uuid {
        self.vehicle.tank_location_id.unwrap()
    }

    pub fn ledger(&self) -> StockService<SqliteStockRepository<'_>> {
        StockService::new(
            SqliteStockRepository::new(&self.conn),
            LedgerConfig::default(),
        )
    }

    pub fn record(&mut self, draft: NewMovement) -> RecordOutcome {
        record_movement_atomic(&mut self.conn, LedgerConfig::default(), draft).unwrap()
    }

    pub fn balance(&self, location: uuid::Uuid, as_of: Option<i64>) -> Decimal {
        self.ledger()
            .balance(location, self.diesel.id, as_of)
            .unwrap()
    }

    pub fn income(&self, location: uuid::Uuid, qty: &str, at: i64) -> NewMovement {
        NewMovement::income(self.org.id, self.diesel.id, location, dec(qty), at)
    }

    pub fn expense(&self, location: uuid::Uuid, qty: &str, at: i64) -> NewMovement {
        NewMovement::expense(self.org.id, self.diesel.id, location, dec(qty), at)
    }

    pub fn transfer(
        &self,
        from: uuid::Uuid,
        to: uuid::Uuid,
        qty: &str,
        at: i64,
    ) -> NewMovement {
        NewMovement::transfer(self.org.id, self.diesel.id, from, to, dec(qty), at)
    }
}

pub fn depot() -> Depot {
    let mut conn = open_db_in_memory().unwrap();

    let (org, driver) = {
        let fleet = FleetService::new(&mut conn);
        let org = fleet
            .create_organization("Northern Depot", Some("7701234567".to_string()))
            .unwrap();
        let driver = fleet
            .create_driver(org.id, "Ivan Petrov", Some("77 AB 123456".to_string()))
            .unwrap();
        (org, driver)
    };

    let (diesel, warehouse) = {
        let ledger = StockService::new(SqliteStockRepository::new(&conn), LedgerConfig::default());
        let diesel = ledger.create_item(org.id, "Diesel", "l").unwrap();
        let warehouse = StockLocation::new(org.id, "Main warehouse", LocationKind::Warehouse);
        ledger.create_location(&warehouse).unwrap();
        (diesel, warehouse)
    };

    let vehicle = FleetService::new(&mut conn)
        .create_vehicle(CreateVehicleRequest {
            organization_id: org.id,
            plate_number: "a 123 bc 77".to_string(),
            model: "GAZelle Next".to_string(),
            fuel_item_id: Some(diesel.id),
            fuel_rate_per_100km: Some(dec("12.5")),
            odometer: 10_000,
        })
        .unwrap();

    Depot {
        conn,
        org,
        diesel,
        warehouse,
        driver,
        vehicle,
    }
}

pub fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}
