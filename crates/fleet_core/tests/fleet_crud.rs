mod common;

use common::{dec, depot};
use fleet_core::repo::fleet_repo::FleetListQuery;
use fleet_core::repo::stock_repo::SqliteStockRepository;
use fleet_core::{
    CreateVehicleRequest, FleetService, FleetServiceError, LedgerConfig, LocationKind,
    RepoError, StockService,
};
use pretty_assertions::assert_eq;
use uuid::Uuid;

#[test]
fn vehicle_gets_its_own_tank_location() {
    let depot = depot();
    assert_eq!(depot.vehicle.plate_number, "A123BC77");

    let ledger = StockService::new(
        SqliteStockRepository::new(&depot.conn),
        LedgerConfig::default(),
    );
    let tank = ledger.get_location(depot.tank()).unwrap();
    assert_eq!(tank.kind, LocationKind::VehicleTank);
    assert_eq!(tank.vehicle_id, Some(depot.vehicle.id));
    assert_eq!(tank.name, "Tank A123BC77");

    let tanks = ledger
        .list_locations(depot.org.id, Some(LocationKind::VehicleTank))
        .unwrap();
    assert_eq!(tanks.len(), 1);
}

#[test]
fn duplicate_plate_is_rejected_without_orphan_tank() {
    let mut depot = depot();
    let err = FleetService::new(&mut depot.conn)
        .create_vehicle(CreateVehicleRequest {
            organization_id: depot.org.id,
            plate_number: "A123 BC 77".to_string(),
            model: "Another".to_string(),
            ..CreateVehicleRequest::default()
        })
        .unwrap_err();
    assert!(matches!(err, FleetServiceError::Repo(RepoError::Conflict(_))));

    let tanks = StockService::new(
        SqliteStockRepository::new(&depot.conn),
        LedgerConfig::default(),
    )
    .list_locations(depot.org.id, Some(LocationKind::VehicleTank))
    .unwrap();
    assert_eq!(tanks.len(), 1);
}

#[test]
fn vehicle_fuel_item_must_belong_to_the_organization() {
    let mut depot = depot();
    let mut fleet = FleetService::new(&mut depot.conn);

    let missing = Uuid::new_v4();
    let err = fleet
        .create_vehicle(CreateVehicleRequest {
            organization_id: depot.org.id,
            plate_number: "x 001 xx 99".to_string(),
            fuel_item_id: Some(missing),
            ..CreateVehicleRequest::default()
        })
        .unwrap_err();
    assert!(matches!(err, FleetServiceError::StockItemNotFound(id) if id == missing));

    let bad_rate = fleet
        .create_vehicle(CreateVehicleRequest {
            organization_id: depot.org.id,
            plate_number: "x 002 xx 99".to_string(),
            fuel_rate_per_100km: Some(dec("0")),
            ..CreateVehicleRequest::default()
        })
        .unwrap_err();
    assert!(matches!(bad_rate, FleetServiceError::Validation(_)));
}

#[test]
fn vehicle_ownership_fields_are_immutable() {
    let mut depot = depot();
    let fleet = FleetService::new(&mut depot.conn);

    let mut moved = depot.vehicle.clone();
    moved.tank_location_id = Some(Uuid::new_v4());
    assert!(matches!(
        fleet.update_vehicle(&moved),
        Err(FleetServiceError::ImmutableField("vehicle.tank_location_id"))
    ));

    let mut edited = depot.vehicle.clone();
    edited.model = "GAZelle Next 4x4".to_string();
    edited.plate_number = "a 124 bc 77".to_string();
    edited.fuel_rate_per_100km = Some(dec("13.2"));
    let updated = fleet.update_vehicle(&edited).unwrap();
    assert_eq!(updated.plate_number, "A124BC77");
    assert_eq!(updated.fuel_rate_per_100km, Some(dec("13.2")));
    assert_eq!(updated.tank_location_id, depot.vehicle.tank_location_id);
}

#[test]
fn archived_records_drop_out_of_default_listings() {
    let mut depot = depot();
    let fleet = FleetService::new(&mut depot.conn);
    let second = fleet
        .create_driver(depot.org.id, "Anna Smirnova", None)
        .unwrap();

    let archived = fleet.archive_driver(depot.driver.id).unwrap();
    assert!(archived.is_archived);
    fleet.archive_vehicle(depot.vehicle.id).unwrap();

    let query = FleetListQuery {
        organization_id: Some(depot.org.id),
        ..FleetListQuery::default()
    };
    let active = fleet.list_drivers(&query).unwrap();
    assert_eq!(
        active.iter().map(|driver| driver.id).collect::<Vec<_>>(),
        vec![second.id]
    );
    assert!(fleet.list_vehicles(&query).unwrap().is_empty());

    let everything = FleetListQuery {
        include_archived: true,
        ..query
    };
    let names = fleet
        .list_drivers(&everything)
        .unwrap()
        .into_iter()
        .map(|driver| driver.full_name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Anna Smirnova", "Ivan Petrov"]);
    assert_eq!(fleet.list_vehicles(&everything).unwrap().len(), 1);
}

#[test]
fn archived_organization_rejects_new_records() {
    let mut depot = depot();
    let mut fleet = FleetService::new(&mut depot.conn);
    fleet.archive_organization(depot.org.id).unwrap();

    assert!(fleet.list_organizations(false).unwrap().is_empty());
    assert_eq!(fleet.list_organizations(true).unwrap().len(), 1);

    let driver = fleet.create_driver(depot.org.id, "Late Hire", None);
    assert!(matches!(
        driver,
        Err(FleetServiceError::OrganizationArchived(id)) if id == depot.org.id
    ));
    let vehicle = fleet.create_vehicle(CreateVehicleRequest {
        organization_id: depot.org.id,
        plate_number: "c 777 cc 77".to_string(),
        ..CreateVehicleRequest::default()
    });
    assert!(matches!(
        vehicle,
        Err(FleetServiceError::OrganizationArchived(_))
    ));
}

#[test]
fn organization_inn_is_unique() {
    let mut depot = depot();
    let fleet = FleetService::new(&mut depot.conn);

    let err = fleet
        .create_organization("Copycat", Some("7701234567".to_string()))
        .unwrap_err();
    assert!(matches!(err, FleetServiceError::Repo(RepoError::Conflict(_))));

    let mut renamed = fleet.get_organization(depot.org.id).unwrap();
    renamed.name = "Northern Depot LLC".to_string();
    assert_eq!(
        fleet.update_organization(&renamed).unwrap().name,
        "Northern Depot LLC"
    );
}

#[test]
fn fuel_card_is_attached_once() {
    let mut depot = depot();
    let mut fleet = FleetService::new(&mut depot.conn);

    let card = fleet
        .attach_fuel_card(depot.driver.id, "Card 4455")
        .unwrap();
    assert_eq!(card.kind, LocationKind::FuelCard);
    assert_eq!(card.driver_id, Some(depot.driver.id));

    let driver = fleet.get_driver(depot.driver.id).unwrap();
    assert_eq!(driver.fuel_card_location_id, Some(card.id));

    let again = fleet.attach_fuel_card(depot.driver.id, "Card 9999");
    assert!(matches!(
        again,
        Err(FleetServiceError::FuelCardAlreadyAttached(id)) if id == depot.driver.id
    ));

    let mut detached = driver.clone();
    detached.fuel_card_location_id = None;
    assert!(matches!(
        fleet.update_driver(&detached),
        Err(FleetServiceError::ImmutableField("driver.fuel_card_location_id"))
    ));

    let mut renamed = driver;
    renamed.full_name = "Ivan S. Petrov".to_string();
    assert_eq!(
        fleet.update_driver(&renamed).unwrap().full_name,
        "Ivan S. Petrov"
    );

    let unknown = Uuid::new_v4();
    assert!(matches!(
        fleet.attach_fuel_card(unknown, "Ghost"),
        Err(FleetServiceError::DriverNotFound(id)) if id == unknown
    ));
}
