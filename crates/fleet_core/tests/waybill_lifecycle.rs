mod common;

use common::{dec, depot, Depot, DAY_MS, T0};
use fleet_core::repo::blank_repo::SqliteBlankRepository;
use fleet_core::repo::waybill_repo::WaybillListQuery;
use fleet_core::{
    BlankConfig, BlankService, BlankServiceError, BlankStatus, CreateVehicleRequest,
    CreateWaybillRequest, FleetService, LedgerConfig, LedgerError, ModelValidationError,
    UpdateWaybillRequest, Waybill, WaybillService, WaybillServiceError, WaybillStatus,
};
use pretty_assertions::assert_eq;
use rusqlite::Connection;
use rust_decimal::Decimal;
use uuid::Uuid;

fn waybills(conn: &mut Connection) -> WaybillService<'_> {
    WaybillService::new(conn, LedgerConfig::default(), BlankConfig::default())
}

fn blank_status(depot: &Depot, id: Uuid) -> (BlankStatus, Option<Uuid>) {
    let blank = BlankService::new(SqliteBlankRepository::new(&depot.conn), 100)
        .list(&Default::default())
        .unwrap()
        .into_iter()
        .find(|blank| blank.id == id)
        .unwrap();
    (blank.status, blank.waybill_id)
}

/// Depot with 200 l in the warehouse, 30 l in the tank and blanks AB 1..3
/// issued to the driver.
fn stocked_depot() -> Depot {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    let tank = depot.tank();
    depot.record(depot.income(warehouse, "230", T0));
    depot.record(depot.transfer(warehouse, tank, "30", T0));

    let blanks = BlankService::new(SqliteBlankRepository::new(&depot.conn), 100);
    blanks.create_batch(depot.org.id, "AB", 1, 3).unwrap();
    blanks.issue_to_driver(&depot.driver, "AB", 1, 3).unwrap();
    depot
}

fn draft_request(depot: &Depot) -> CreateWaybillRequest {
    CreateWaybillRequest {
        organization_id: depot.org.id,
        vehicle_id: depot.vehicle.id,
        driver_id: depot.driver.id,
        waybill_date: T0 + DAY_MS,
        reserve_blank: true,
        refuel_source_location_id: Some(depot.warehouse.id),
        route: " Depot - Tver - Depot ".to_string(),
        ..CreateWaybillRequest::default()
    }
}

fn closing_readings() -> UpdateWaybillRequest {
    UpdateWaybillRequest {
        odometer_end: Some(10_320),
        fuel_refueled: Some(dec("60")),
        fuel_at_end: Some(dec("45")),
        ..UpdateWaybillRequest::default()
    }
}

/// Creates, fills in, submits and posts one waybill.
fn posted_waybill(depot: &mut Depot) -> Waybill {
    let request = draft_request(depot);
    let mut service = waybills(&mut depot.conn);
    let draft = service.create_draft(request).unwrap();
    service.update_draft(draft.id, closing_readings()).unwrap();
    service.submit(draft.id).unwrap();
    service.post(draft.id).unwrap()
}

#[test]
fn draft_takes_blank_number_and_tank_fuel() {
    let mut depot = stocked_depot();
    let request = draft_request(&depot);

    let waybill = waybills(&mut depot.conn).create_draft(request).unwrap();

    assert_eq!(waybill.status, WaybillStatus::Draft);
    assert_eq!(waybill.number, "AB 000001");
    assert_eq!(waybill.odometer_start, 10_000);
    assert_eq!(waybill.fuel_at_start, dec("30"));
    assert_eq!(waybill.route, "Depot - Tver - Depot");
    let blank_id = waybill.blank_id.unwrap();
    assert_eq!(
        blank_status(&depot, blank_id),
        (BlankStatus::Reserved, Some(waybill.id))
    );

    let renamed = waybills(&mut depot.conn)
        .update_draft(
            waybill.id,
            UpdateWaybillRequest {
                number: Some("custom".to_string()),
                notes: Some("night shift".to_string()),
                ..UpdateWaybillRequest::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.number, "AB 000001");
    assert_eq!(renamed.notes.as_deref(), Some("night shift"));
}

#[test]
fn draft_without_blank_needs_a_number() {
    let mut depot = stocked_depot();
    let mut request = draft_request(&depot);
    request.reserve_blank = false;

    let err = waybills(&mut depot.conn)
        .create_draft(request.clone())
        .unwrap_err();
    assert!(matches!(
        err,
        WaybillServiceError::Validation(ModelValidationError::BlankField("waybill.number"))
    ));

    request.number = Some(" 17 ".to_string());
    request.fuel_at_start = Some(dec("12.5"));
    let waybill = waybills(&mut depot.conn).create_draft(request).unwrap();
    assert_eq!(waybill.number, "17");
    assert_eq!(waybill.blank_id, None);
    assert_eq!(waybill.fuel_at_start, dec("12.5"));
}

#[test]
fn refuel_source_must_not_be_a_tank() {
    let mut depot = stocked_depot();
    let mut request = draft_request(&depot);
    request.refuel_source_location_id = Some(depot.tank());

    let err = waybills(&mut depot.conn).create_draft(request).unwrap_err();
    assert!(matches!(
        err,
        WaybillServiceError::InvalidRefuelSource { location_id, .. } if location_id == depot.tank()
    ));
    let (status, waybill_id) = {
        let blanks = BlankService::new(SqliteBlankRepository::new(&depot.conn), 100);
        let blank = blanks.pick_for_driver(depot.driver.id, None).unwrap();
        (blank.status, blank.waybill_id)
    };
    assert_eq!((status, waybill_id), (BlankStatus::Issued, None));
}

#[test]
fn archived_vehicle_cannot_start_a_waybill() {
    let mut depot = stocked_depot();
    FleetService::new(&mut depot.conn)
        .archive_vehicle(depot.vehicle.id)
        .unwrap();
    let request = draft_request(&depot);

    let err = waybills(&mut depot.conn).create_draft(request).unwrap_err();
    assert!(matches!(err, WaybillServiceError::VehicleArchived(id) if id == depot.vehicle.id));
}

#[test]
fn submit_requires_consistent_closing_readings() {
    let mut depot = stocked_depot();
    let request = draft_request(&depot);
    let mut service = waybills(&mut depot.conn);
    let draft = service.create_draft(request).unwrap();

    let missing = service.submit(draft.id).unwrap_err();
    assert!(matches!(
        missing,
        WaybillServiceError::Validation(ModelValidationError::Inconsistent(_))
    ));

    service
        .update_draft(
            draft.id,
            UpdateWaybillRequest {
                odometer_end: Some(9_000),
                fuel_at_end: Some(dec("10")),
                ..UpdateWaybillRequest::default()
            },
        )
        .unwrap();
    assert!(matches!(
        service.submit(draft.id),
        Err(WaybillServiceError::Validation(_))
    ));

    service
        .update_draft(
            draft.id,
            UpdateWaybillRequest {
                odometer_end: Some(10_100),
                fuel_at_end: Some(dec("31")),
                ..UpdateWaybillRequest::default()
            },
        )
        .unwrap();
    assert!(matches!(
        service.submit(draft.id),
        Err(WaybillServiceError::Validation(_))
    ));

    service
        .update_draft(
            draft.id,
            UpdateWaybillRequest {
                fuel_at_end: Some(dec("20")),
                ..UpdateWaybillRequest::default()
            },
        )
        .unwrap();
    let submitted = service.submit(draft.id).unwrap();
    assert_eq!(submitted.status, WaybillStatus::Submitted);
    assert!(submitted.submitted_at.is_some());
}

#[test]
fn posting_books_fuel_and_consumes_the_blank() {
    let mut depot = stocked_depot();
    let posted = posted_waybill(&mut depot);

    assert_eq!(posted.status, WaybillStatus::Posted);
    assert!(posted.posted_at.is_some());
    assert_eq!(depot.balance(depot.warehouse.id, None), dec("140"));
    assert_eq!(depot.balance(depot.tank(), None), dec("45"));
    assert_eq!(depot.balance(depot.tank(), Some(T0)), dec("30"));
    assert_eq!(
        blank_status(&depot, posted.blank_id.unwrap()),
        (BlankStatus::Used, Some(posted.id))
    );

    let vehicle = FleetService::new(&mut depot.conn)
        .get_vehicle(depot.vehicle.id)
        .unwrap();
    assert_eq!(vehicle.odometer, 10_320);

    let summary = waybills(&mut depot.conn).fuel_summary(posted.id).unwrap();
    assert_eq!(summary.distance_km, Some(320));
    assert_eq!(summary.fuel_consumed, Some(dec("45")));
    assert_eq!(summary.planned_consumption, Some(dec("40")));
    assert_eq!(summary.deviation, Some(dec("5")));
    let refs = summary
        .movements
        .iter()
        .map(|movement| movement.external_ref.clone().unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(
        refs,
        vec![posted.refuel_external_ref(), posted.expense_external_ref()]
    );
}

#[test]
fn posted_waybill_is_frozen() {
    let mut depot = stocked_depot();
    let posted = posted_waybill(&mut depot);
    let mut service = waybills(&mut depot.conn);

    let edit = service
        .update_draft(posted.id, closing_readings())
        .unwrap_err();
    assert!(matches!(
        edit,
        WaybillServiceError::NotEditable {
            status: WaybillStatus::Posted,
            ..
        }
    ));

    let again = service.post(posted.id).unwrap_err();
    assert!(matches!(
        again,
        WaybillServiceError::InvalidTransition {
            from: WaybillStatus::Posted,
            to: WaybillStatus::Posted,
        }
    ));
    let back = service.transition(posted.id, WaybillStatus::Draft).unwrap_err();
    assert!(matches!(back, WaybillServiceError::InvalidTransition { .. }));
}

#[test]
fn cancelling_a_posted_waybill_voids_its_movements() {
    let mut depot = stocked_depot();
    let posted = posted_waybill(&mut depot);

    let cancelled = waybills(&mut depot.conn).cancel(posted.id).unwrap();

    assert_eq!(cancelled.status, WaybillStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(cancelled.blank_id, posted.blank_id);
    assert_eq!(depot.balance(depot.warehouse.id, None), dec("200"));
    assert_eq!(depot.balance(depot.tank(), None), dec("30"));
    assert_eq!(
        blank_status(&depot, posted.blank_id.unwrap()).0,
        BlankStatus::Used
    );
    let vehicle = FleetService::new(&mut depot.conn)
        .get_vehicle(depot.vehicle.id)
        .unwrap();
    assert_eq!(vehicle.odometer, 10_320);

    let summary = waybills(&mut depot.conn).fuel_summary(posted.id).unwrap();
    assert_eq!(summary.movements.len(), 2);
    assert!(summary.movements.iter().all(|movement| movement.is_voided));

    let err = waybills(&mut depot.conn).cancel(posted.id).unwrap_err();
    assert!(matches!(
        err,
        WaybillServiceError::InvalidTransition {
            from: WaybillStatus::Cancelled,
            ..
        }
    ));
}

#[test]
fn cancelling_an_open_waybill_gives_the_blank_back() {
    let mut depot = stocked_depot();
    let request = draft_request(&depot);
    let mut service = waybills(&mut depot.conn);
    let draft = service.create_draft(request).unwrap();
    let blank_id = draft.blank_id.unwrap();

    let cancelled = service.cancel(draft.id).unwrap();
    assert_eq!(cancelled.blank_id, None);
    assert_eq!(blank_status(&depot, blank_id), (BlankStatus::Issued, None));

    let request = draft_request(&depot);
    let next = waybills(&mut depot.conn).create_draft(request).unwrap();
    assert_eq!(next.blank_id, Some(blank_id));
}

#[test]
fn spoiled_reserved_blank_blocks_posting_but_not_cancelling() {
    let mut depot = stocked_depot();
    let request = draft_request(&depot);
    let draft = waybills(&mut depot.conn).create_draft(request).unwrap();
    let blank_id = draft.blank_id.unwrap();

    let spoiled = BlankService::new(SqliteBlankRepository::new(&depot.conn), 100)
        .spoil(blank_id)
        .unwrap();
    assert_eq!(spoiled.status, BlankStatus::Spoiled);

    let mut service = waybills(&mut depot.conn);
    service.update_draft(draft.id, closing_readings()).unwrap();
    service.submit(draft.id).unwrap();
    let err = service.post(draft.id).unwrap_err();
    assert!(matches!(
        err,
        WaybillServiceError::Blank(BlankServiceError::InvalidBlankTransition {
            from: BlankStatus::Spoiled,
            to: BlankStatus::Used,
            ..
        })
    ));
    assert_eq!(
        service.get(draft.id).unwrap().status,
        WaybillStatus::Submitted
    );

    let cancelled = service.cancel(draft.id).unwrap();
    assert_eq!(cancelled.status, WaybillStatus::Cancelled);
    assert_eq!(cancelled.blank_id, None);
    assert_eq!(
        blank_status(&depot, blank_id),
        (BlankStatus::Spoiled, Some(draft.id))
    );
    assert_eq!(depot.balance(depot.tank(), None), dec("30"));
    assert_eq!(depot.balance(depot.warehouse.id, None), dec("200"));
}

#[test]
fn spoiled_blank_on_a_draft_is_not_handed_back() {
    let mut depot = stocked_depot();
    let request = draft_request(&depot);
    let draft = waybills(&mut depot.conn).create_draft(request).unwrap();
    let blank_id = draft.blank_id.unwrap();
    BlankService::new(SqliteBlankRepository::new(&depot.conn), 100)
        .spoil(blank_id)
        .unwrap();

    let cancelled = waybills(&mut depot.conn).cancel(draft.id).unwrap();
    assert_eq!(cancelled.blank_id, None);
    assert_eq!(blank_status(&depot, blank_id).0, BlankStatus::Spoiled);

    let request = draft_request(&depot);
    let next = waybills(&mut depot.conn).create_draft(request).unwrap();
    assert_eq!(next.number, "AB 000002");
}

#[test]
fn submitted_waybill_can_return_to_draft() {
    let mut depot = stocked_depot();
    let request = draft_request(&depot);
    let mut service = waybills(&mut depot.conn);
    let draft = service.create_draft(request).unwrap();

    let skipped = service
        .transition(draft.id, WaybillStatus::Posted)
        .unwrap_err();
    assert!(matches!(
        skipped,
        WaybillServiceError::InvalidTransition {
            from: WaybillStatus::Draft,
            to: WaybillStatus::Posted,
        }
    ));
    assert_eq!(skipped.code(), "invalid_transition");

    service.update_draft(draft.id, closing_readings()).unwrap();
    service.submit(draft.id).unwrap();
    let returned = service
        .transition(draft.id, WaybillStatus::Draft)
        .unwrap();
    assert_eq!(returned.status, WaybillStatus::Draft);
    assert_eq!(returned.submitted_at, None);

    let edited = service
        .update_draft(
            draft.id,
            UpdateWaybillRequest {
                fuel_at_end: Some(dec("40")),
                ..UpdateWaybillRequest::default()
            },
        )
        .unwrap();
    assert_eq!(edited.fuel_consumed(), Some(dec("50")));
}

#[test]
fn failed_posting_leaves_everything_untouched() {
    let mut depot = stocked_depot();
    let mut request = draft_request(&depot);
    request.refuel_source_location_id = None;
    request.fuel_at_start = Some(dec("80"));
    let mut service = waybills(&mut depot.conn);
    let draft = service.create_draft(request).unwrap();
    service
        .update_draft(
            draft.id,
            UpdateWaybillRequest {
                odometer_end: Some(10_400),
                fuel_at_end: Some(dec("30")),
                ..UpdateWaybillRequest::default()
            },
        )
        .unwrap();
    service.submit(draft.id).unwrap();

    let err = service.post(draft.id).unwrap_err();
    assert!(matches!(
        err,
        WaybillServiceError::Ledger(LedgerError::InsufficientStock { resulting_balance, .. })
            if resulting_balance == dec("-20")
    ));

    let current = service.get(draft.id).unwrap();
    assert_eq!(current.status, WaybillStatus::Submitted);
    assert_eq!(current.posted_at, None);
    assert_eq!(
        blank_status(&depot, draft.blank_id.unwrap()).0,
        BlankStatus::Reserved
    );
    assert_eq!(depot.balance(depot.tank(), None), dec("30"));
    let vehicle = FleetService::new(&mut depot.conn)
        .get_vehicle(depot.vehicle.id)
        .unwrap();
    assert_eq!(vehicle.odometer, 10_000);
}

#[test]
fn vehicle_without_fuel_item_cannot_post_consumption() {
    let mut depot = stocked_depot();
    let bare = FleetService::new(&mut depot.conn)
        .create_vehicle(CreateVehicleRequest {
            organization_id: depot.org.id,
            plate_number: "b 456 cd 77".to_string(),
            model: "Trailer tractor".to_string(),
            ..CreateVehicleRequest::default()
        })
        .unwrap();
    let mut request = draft_request(&depot);
    request.vehicle_id = bare.id;
    request.refuel_source_location_id = None;
    request.fuel_at_start = Some(dec("10"));

    let mut service = waybills(&mut depot.conn);
    let draft = service.create_draft(request).unwrap();
    assert_eq!(draft.odometer_start, 0);
    service
        .update_draft(
            draft.id,
            UpdateWaybillRequest {
                odometer_end: Some(50),
                fuel_at_end: Some(dec("4")),
                ..UpdateWaybillRequest::default()
            },
        )
        .unwrap();
    service.submit(draft.id).unwrap();

    let err = service.post(draft.id).unwrap_err();
    assert!(matches!(err, WaybillServiceError::MissingFuelItem(id) if id == bare.id));
    assert_eq!(
        service.fuel_summary(draft.id).unwrap().planned_consumption,
        None
    );
}

#[test]
fn list_filters_by_status_and_date() {
    let mut depot = stocked_depot();
    let posted = posted_waybill(&mut depot);
    let mut request = draft_request(&depot);
    request.waybill_date = T0 + 3 * DAY_MS;
    let mut service = waybills(&mut depot.conn);
    let draft = service.create_draft(request).unwrap();

    let drafts = service
        .list(&WaybillListQuery {
            organization_id: Some(depot.org.id),
            status: Some(WaybillStatus::Draft),
            ..WaybillListQuery::default()
        })
        .unwrap();
    assert_eq!(
        drafts.iter().map(|waybill| waybill.id).collect::<Vec<_>>(),
        vec![draft.id]
    );

    let early = service
        .list(&WaybillListQuery {
            organization_id: Some(depot.org.id),
            date_to: Some(T0 + 2 * DAY_MS),
            ..WaybillListQuery::default()
        })
        .unwrap();
    assert_eq!(
        early.iter().map(|waybill| waybill.id).collect::<Vec<_>>(),
        vec![posted.id]
    );
    assert_eq!(early[0].fuel_at_start, dec("30"));
    assert!(early[0].fuel_refueled > Decimal::ZERO);
}
