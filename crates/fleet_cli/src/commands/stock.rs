use super::AppContext;
use crate::cli::{LocationKindArg, MovementArgs, MovementMeta, StockCommands};
use crate::output::output;
use fleet_core::model::now_epoch_ms;
use fleet_core::repo::stock_repo::SqliteStockRepository;
use fleet_core::service::stock_service::LocationBalance;
use fleet_core::{record_movement_atomic, LocationKind, NewMovement, StockLocation, StockService};
use rust_decimal::Decimal;
use uuid::Uuid;

pub fn handle(action: StockCommands, ctx: &mut AppContext) -> anyhow::Result<()> {
    let ledger = ctx.config.ledger;
    match action {
        StockCommands::ItemAdd { org, name, unit } => {
            let service = StockService::new(SqliteStockRepository::new(&ctx.conn), ledger);
            output(&service.create_item(org, &name, &unit)?, ctx.format)
        }
        StockCommands::LocationAdd {
            org,
            name,
            kind,
            vehicle,
            driver,
        } => {
            let mut location = StockLocation::new(org, name, location_kind(kind));
            location.vehicle_id = vehicle;
            location.driver_id = driver;
            let service = StockService::new(SqliteStockRepository::new(&ctx.conn), ledger);
            service.create_location(&location)?;
            output(&location, ctx.format)
        }
        StockCommands::Income(args) => record(ctx, single(args, NewMovement::income)),
        StockCommands::Expense(args) => record(ctx, single(args, NewMovement::expense)),
        StockCommands::Adjust(args) => record(ctx, single(args, NewMovement::adjustment)),
        StockCommands::Transfer {
            org,
            item,
            from,
            to,
            qty,
            meta,
        } => {
            let at = meta.at.unwrap_or_else(now_epoch_ms);
            let draft = with_meta(NewMovement::transfer(org, item, from, to, qty, at), meta);
            record(ctx, draft)
        }
        StockCommands::Balance {
            org,
            location,
            item,
            at,
        } => {
            let service = StockService::new(SqliteStockRepository::new(&ctx.conn), ledger);
            match location.zip(item) {
                Some((location_id, stock_item_id)) => output(
                    &LocationBalance {
                        location_id,
                        stock_item_id,
                        balance: service.balance(location_id, stock_item_id, at)?,
                    },
                    ctx.format,
                ),
                None => output(&service.location_balances(org, at)?, ctx.format),
            }
        }
        StockCommands::History {
            location,
            item,
            from,
            to,
        } => {
            let service = StockService::new(SqliteStockRepository::new(&ctx.conn), ledger);
            output(&service.statement(location, item, from, to)?, ctx.format)
        }
    }
}

type SingleLocationCtor = fn(Uuid, Uuid, Uuid, Decimal, i64) -> NewMovement;

fn single(args: MovementArgs, ctor: SingleLocationCtor) -> NewMovement {
    let at = args.meta.at.unwrap_or_else(now_epoch_ms);
    with_meta(
        ctor(args.org, args.item, args.location, args.qty, at),
        args.meta,
    )
}

fn with_meta(mut draft: NewMovement, meta: MovementMeta) -> NewMovement {
    if let Some(external_ref) = meta.external_ref {
        draft = draft.with_external_ref(external_ref);
    }
    if let Some(comment) = meta.comment {
        draft = draft.with_comment(comment);
    }
    draft
}

fn record(ctx: &mut AppContext, draft: NewMovement) -> anyhow::Result<()> {
    let outcome = record_movement_atomic(&mut ctx.conn, ctx.config.ledger, draft)?;
    output(&outcome, ctx.format)
}

fn location_kind(kind: LocationKindArg) -> LocationKind {
    match kind {
        LocationKindArg::Warehouse => LocationKind::Warehouse,
        LocationKindArg::FuelCard => LocationKind::FuelCard,
        LocationKindArg::VehicleTank => LocationKind::VehicleTank,
    }
}
