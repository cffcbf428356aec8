use super::AppContext;
use crate::cli::WaybillCommands;
use crate::output::output;
use anyhow::bail;
use fleet_core::repo::waybill_repo::WaybillListQuery;
use fleet_core::service::waybill_service::WaybillFuelSummary;
use fleet_core::{
    CreateWaybillRequest, UpdateWaybillRequest, Waybill, WaybillService, WaybillStatus,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct WaybillDetails {
    waybill: Waybill,
    fuel: WaybillFuelSummary,
}

pub fn handle(action: WaybillCommands, ctx: &mut AppContext) -> anyhow::Result<()> {
    let mut service = WaybillService::new(&mut ctx.conn, ctx.config.ledger, ctx.config.blanks);
    match action {
        WaybillCommands::Create {
            org,
            vehicle,
            driver,
            date,
            number,
            reserve_blank,
            blank,
            odometer_start,
            fuel_start,
            refuel_source,
            route,
            notes,
        } => output(
            &service.create_draft(CreateWaybillRequest {
                organization_id: org,
                vehicle_id: vehicle,
                driver_id: driver,
                waybill_date: date,
                number,
                reserve_blank,
                blank_id: blank,
                odometer_start,
                fuel_at_start: fuel_start,
                refuel_source_location_id: refuel_source,
                route,
                notes,
            })?,
            ctx.format,
        ),
        WaybillCommands::Update {
            id,
            number,
            date,
            odometer_start,
            odometer_end,
            fuel_start,
            refueled,
            fuel_end,
            refuel_source,
            route,
            notes,
        } => output(
            &service.update_draft(
                id,
                UpdateWaybillRequest {
                    number,
                    waybill_date: date,
                    odometer_start,
                    odometer_end,
                    fuel_at_start: fuel_start,
                    fuel_refueled: refueled,
                    fuel_at_end: fuel_end,
                    refuel_source_location_id: refuel_source,
                    route,
                    notes,
                },
            )?,
            ctx.format,
        ),
        WaybillCommands::Submit { id } => output(&service.submit(id)?, ctx.format),
        WaybillCommands::Return { id } => output(&service.return_to_draft(id)?, ctx.format),
        WaybillCommands::Post { id } => output(&service.post(id)?, ctx.format),
        WaybillCommands::Cancel { id } => output(&service.cancel(id)?, ctx.format),
        WaybillCommands::Show { id } => output(
            &WaybillDetails {
                waybill: service.get(id)?,
                fuel: service.fuel_summary(id)?,
            },
            ctx.format,
        ),
        WaybillCommands::List {
            org,
            status,
            vehicle,
            driver,
            from,
            to,
            limit,
        } => {
            let status = match status {
                Some(value) => match WaybillStatus::parse(&value) {
                    Some(status) => Some(status),
                    None => bail!("unknown waybill status `{value}`"),
                },
                None => None,
            };
            output(
                &service.list(&WaybillListQuery {
                    organization_id: org,
                    status,
                    vehicle_id: vehicle,
                    driver_id: driver,
                    date_from: from,
                    date_to: to,
                    limit,
                    offset: 0,
                })?,
                ctx.format,
            )
        }
    }
}
