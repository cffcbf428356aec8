mod common;

use common::{dec, depot, DAY_MS, T0};
use fleet_core::repo::stock_repo::{MovementListQuery, SqliteStockRepository};
use fleet_core::service::stock_service::LocationBalance;
use fleet_core::{
    record_movement_atomic, DocumentRef, FleetService, LedgerConfig, LedgerCursor, LedgerError,
    ModelValidationError, NewMovement, StockService,
};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use uuid::Uuid;

#[test]
fn balance_as_of_includes_movements_up_to_that_instant() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    let tank = depot.tank();

    depot.record(depot.income(warehouse, "100", T0));
    depot.record(depot.expense(warehouse, "30", T0 + DAY_MS));
    depot.record(depot.transfer(warehouse, tank, "20.5", T0 + 2 * DAY_MS));

    assert_eq!(depot.balance(warehouse, Some(T0 - 1)), Decimal::ZERO);
    assert_eq!(depot.balance(warehouse, Some(T0)), dec("100"));
    assert_eq!(depot.balance(warehouse, Some(T0 + DAY_MS)), dec("70"));
    assert_eq!(depot.balance(warehouse, None), dec("49.5"));
    assert_eq!(depot.balance(tank, None), dec("20.5"));
    assert_eq!(depot.balance(tank, Some(T0 + DAY_MS)), Decimal::ZERO);
}

#[test]
fn balance_components_split_by_movement_kind() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    let tank = depot.tank();

    depot.record(depot.income(warehouse, "100", T0));
    depot.record(depot.transfer(warehouse, tank, "40", T0 + 1));
    depot.record(depot.transfer(tank, warehouse, "5", T0 + 2));
    depot.record(depot.expense(warehouse, "10", T0 + 3));
    depot.record(NewMovement::adjustment(
        depot.org.id,
        depot.diesel.id,
        warehouse,
        dec("-1.25"),
        T0 + 4,
    ));

    let components = depot
        .ledger()
        .balance_components(warehouse, depot.diesel.id, LedgerCursor::latest())
        .unwrap();
    assert_eq!(components.income, dec("100"));
    assert_eq!(components.expense, dec("10"));
    assert_eq!(components.transfer_in, dec("5"));
    assert_eq!(components.transfer_out, dec("40"));
    assert_eq!(components.adjustment, dec("-1.25"));
    assert_eq!(components.total(), dec("53.75"));
}

#[test]
fn replaying_external_ref_returns_stored_movement() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;

    let first = depot.record(depot.income(warehouse, "100", T0).with_external_ref("invoice-17"));
    let replay = depot.record(
        depot
            .income(warehouse, "100.000", T0)
            .with_external_ref("  invoice-17  "),
    );

    assert!(!first.replayed);
    assert!(replay.replayed);
    assert_eq!(replay.movement.id, first.movement.id);
    assert_eq!(depot.balance(warehouse, None), dec("100"));
}

#[test]
fn external_ref_with_different_payload_is_a_conflict() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    let first = depot.record(depot.income(warehouse, "100", T0).with_external_ref("invoice-17"));

    let draft = depot.income(warehouse, "90", T0).with_external_ref("invoice-17");
    let err = record_movement_atomic(&mut depot.conn, LedgerConfig::default(), draft).unwrap_err();

    match err {
        LedgerError::ExternalRefConflict {
            external_ref,
            existing,
        } => {
            assert_eq!(external_ref, "invoice-17");
            assert_eq!(existing, first.movement.id);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn sequence_orders_movements_sharing_an_instant() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;

    let seqs = ["1", "2", "3"]
        .iter()
        .map(|qty| {
            depot
                .record(depot.income(warehouse, qty, T0))
                .movement
                .occurred_seq
        })
        .collect::<Vec<_>>();
    assert_eq!(seqs, vec![1, 2, 3]);

    let pinned = depot.record(depot.income(warehouse, "4", T0 + 1).with_seq(7));
    assert_eq!(pinned.movement.occurred_seq, 7);
    let next = depot.record(depot.income(warehouse, "5", T0 + 1));
    assert_eq!(next.movement.occurred_seq, 8);

    let listed = depot
        .ledger()
        .list_movements(&MovementListQuery {
            location_id: Some(warehouse),
            ..MovementListQuery::default()
        })
        .unwrap()
        .into_iter()
        .map(|movement| movement.quantity)
        .collect::<Vec<_>>();
    assert_eq!(
        listed,
        vec![dec("1"), dec("2"), dec("3"), dec("4"), dec("5")]
    );
}

#[test]
fn exhausted_sequence_is_a_validation_error() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    depot.record(depot.income(warehouse, "1", T0).with_seq(i64::MAX));

    let draft = depot.income(warehouse, "2", T0);
    let err = record_movement_atomic(&mut depot.conn, LedgerConfig::default(), draft).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Validation(ModelValidationError::Inconsistent(_))
    ));

    let next_instant = depot.record(depot.income(warehouse, "2", T0 + 1));
    assert_eq!(next_instant.movement.occurred_seq, 1);
}

#[test]
fn statement_from_the_earliest_instant_opens_at_zero() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    depot.record(depot.income(warehouse, "7", T0));

    let statement = depot
        .ledger()
        .statement(warehouse, depot.diesel.id, Some(i64::MIN), None)
        .unwrap();
    assert_eq!(statement.opening_balance, Decimal::ZERO);
    assert_eq!(statement.lines.len(), 1);
    assert_eq!(statement.closing_balance, dec("7"));
}

#[test]
fn balance_at_cursor_splits_same_instant_movements() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    depot.record(depot.income(warehouse, "10", T0));
    depot.record(depot.income(warehouse, "20", T0));

    let ledger = depot.ledger();
    let at = |seq| {
        ledger
            .balance_at_cursor(warehouse, depot.diesel.id, LedgerCursor::new(T0, seq))
            .unwrap()
    };
    assert_eq!(at(0), Decimal::ZERO);
    assert_eq!(at(1), dec("10"));
    assert_eq!(at(2), dec("30"));
}

#[test]
fn expense_beyond_balance_is_rejected() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    depot.record(depot.income(warehouse, "10", T0));

    let draft = depot.expense(warehouse, "15", T0 + 1);
    let err = record_movement_atomic(&mut depot.conn, LedgerConfig::default(), draft).unwrap_err();

    assert!(matches!(
        err,
        LedgerError::InsufficientStock {
            resulting_balance,
            location_id,
            ..
        } if resulting_balance == dec("-5") && location_id == warehouse
    ));
    assert_eq!(depot.balance(warehouse, None), dec("10"));
}

#[test]
fn backdated_expense_cannot_break_a_later_balance() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    depot.record(depot.income(warehouse, "50", T0));
    let later = depot.record(depot.expense(warehouse, "40", T0 + 2 * DAY_MS));

    let draft = depot.expense(warehouse, "20", T0 + DAY_MS);
    let err = record_movement_atomic(&mut depot.conn, LedgerConfig::default(), draft).unwrap_err();

    match err {
        LedgerError::InsufficientStock {
            resulting_balance,
            at,
            ..
        } => {
            assert_eq!(resulting_balance, dec("-10"));
            assert_eq!(at, later.movement.cursor());
        }
        other => panic!("unexpected error: {other}"),
    }

    depot.record(depot.expense(warehouse, "10", T0 + DAY_MS));
    assert_eq!(depot.balance(warehouse, None), Decimal::ZERO);
}

#[test]
fn transfer_out_and_negative_adjustment_are_checked() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    let tank = depot.tank();
    depot.record(depot.income(warehouse, "5", T0));

    let draft = depot.transfer(warehouse, tank, "6", T0 + 1);
    let transfer = record_movement_atomic(&mut depot.conn, LedgerConfig::default(), draft);
    assert!(matches!(
        transfer,
        Err(LedgerError::InsufficientStock { .. })
    ));

    let adjustment = record_movement_atomic(
        &mut depot.conn,
        LedgerConfig::default(),
        NewMovement::adjustment(depot.org.id, depot.diesel.id, tank, dec("-1"), T0 + 1),
    );
    assert!(matches!(
        adjustment,
        Err(LedgerError::InsufficientStock { .. })
    ));

    let positive = depot.record(NewMovement::adjustment(
        depot.org.id,
        depot.diesel.id,
        tank,
        dec("2"),
        T0 + 1,
    ));
    assert!(!positive.replayed);
    assert_eq!(depot.balance(tank, None), dec("2"));
}

#[test]
fn allow_negative_balance_skips_the_check() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;

    let draft = depot.expense(warehouse, "5", T0);
    let outcome = record_movement_atomic(
        &mut depot.conn,
        LedgerConfig {
            allow_negative_balance: true,
        },
        draft,
    )
    .unwrap();

    assert!(!outcome.replayed);
    assert_eq!(depot.balance(warehouse, None), dec("-5"));
}

#[test]
fn invalid_movements_are_rejected_before_storage() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;

    let draft = depot.transfer(warehouse, warehouse, "1", T0);
    let same_location = record_movement_atomic(&mut depot.conn, LedgerConfig::default(), draft);
    assert!(matches!(
        same_location,
        Err(LedgerError::Validation(ModelValidationError::Inconsistent(_)))
    ));

    let draft = depot.income(warehouse, "0", T0);
    let zero = record_movement_atomic(&mut depot.conn, LedgerConfig::default(), draft);
    assert!(matches!(zero, Err(LedgerError::Validation(_))));

    let draft = depot.income(Uuid::new_v4(), "1", T0);
    let unknown_location = record_movement_atomic(&mut depot.conn, LedgerConfig::default(), draft);
    assert!(matches!(
        unknown_location,
        Err(LedgerError::LocationNotFound(_))
    ));

    assert!(depot
        .ledger()
        .list_movements(&MovementListQuery::default())
        .unwrap()
        .is_empty());
}

#[test]
fn foreign_item_is_an_organization_mismatch() {
    let mut depot = depot();
    let other_org = FleetService::new(&mut depot.conn)
        .create_organization("Other", None)
        .unwrap();
    let foreign_item = StockService::new(
        SqliteStockRepository::new(&depot.conn),
        LedgerConfig::default(),
    )
    .create_item(other_org.id, "Petrol", "l")
    .unwrap();

    let err = record_movement_atomic(
        &mut depot.conn,
        LedgerConfig::default(),
        NewMovement::income(depot.org.id, foreign_item.id, depot.warehouse.id, dec("1"), T0),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::OrganizationMismatch {
            entity: "stock item",
            ..
        }
    ));
}

#[test]
fn statement_carries_opening_and_running_balance() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    let tank = depot.tank();
    depot.record(depot.income(warehouse, "100", T0));
    depot.record(depot.transfer(warehouse, tank, "30", T0 + DAY_MS));
    depot.record(depot.expense(warehouse, "20", T0 + 2 * DAY_MS));

    let statement = depot
        .ledger()
        .statement(warehouse, depot.diesel.id, Some(T0 + DAY_MS), None)
        .unwrap();

    assert_eq!(statement.opening_balance, dec("100"));
    let lines = statement
        .lines
        .iter()
        .map(|line| (line.delta, line.running_balance))
        .collect::<Vec<_>>();
    assert_eq!(
        lines,
        vec![(dec("-30"), dec("70")), (dec("-20"), dec("50"))]
    );
    assert_eq!(statement.closing_balance, dec("50"));
}

#[test]
fn location_balances_skip_zero_pairs() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    let tank = depot.tank();
    depot.record(depot.income(warehouse, "40", T0));
    depot.record(depot.transfer(warehouse, tank, "40", T0 + 1));

    let balances = depot
        .ledger()
        .location_balances(depot.org.id, None)
        .unwrap();
    assert_eq!(
        balances,
        vec![LocationBalance {
            location_id: tank,
            stock_item_id: depot.diesel.id,
            balance: dec("40"),
        }]
    );

    let before_transfer = depot
        .ledger()
        .location_balances(depot.org.id, Some(T0))
        .unwrap();
    assert_eq!(before_transfer.len(), 1);
    assert_eq!(before_transfer[0].location_id, warehouse);
}

#[test]
fn voided_document_movements_leave_balances() {
    let mut depot = depot();
    let warehouse = depot.warehouse.id;
    let document = DocumentRef {
        doc_type: "INVOICE".to_string(),
        doc_id: "17".to_string(),
    };
    depot.record(depot.income(warehouse, "100", T0).with_document(document.clone()));
    depot.record(depot.income(warehouse, "5", T0 + 1));

    let voided = depot.ledger().void_document(&document).unwrap();
    assert_eq!(voided, 1);
    assert_eq!(depot.balance(warehouse, None), dec("5"));

    let all = depot
        .ledger()
        .list_movements(&MovementListQuery {
            include_voided: true,
            ..MovementListQuery::default()
        })
        .unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].is_voided);
}
