use super::AppContext;
use crate::cli::{DriverCommands, OrgCommands, VehicleCommands};
use crate::output::output;
use fleet_core::repo::fleet_repo::FleetListQuery;
use fleet_core::{CreateVehicleRequest, FleetService};

pub fn handle_org(action: OrgCommands, ctx: &mut AppContext) -> anyhow::Result<()> {
    let service = FleetService::new(&mut ctx.conn);
    match action {
        OrgCommands::Add { name, inn } => {
            output(&service.create_organization(&name, inn)?, ctx.format)
        }
        OrgCommands::List { all } => output(&service.list_organizations(all)?, ctx.format),
        OrgCommands::Archive { id } => output(&service.archive_organization(id)?, ctx.format),
    }
}

pub fn handle_driver(action: DriverCommands, ctx: &mut AppContext) -> anyhow::Result<()> {
    let mut service = FleetService::new(&mut ctx.conn);
    match action {
        DriverCommands::Add {
            org,
            full_name,
            license,
        } => output(&service.create_driver(org, &full_name, license)?, ctx.format),
        DriverCommands::List { org, all } => output(
            &service.list_drivers(&FleetListQuery {
                organization_id: org,
                include_archived: all,
                ..FleetListQuery::default()
            })?,
            ctx.format,
        ),
        DriverCommands::FuelCard { driver, name } => {
            output(&service.attach_fuel_card(driver, &name)?, ctx.format)
        }
        DriverCommands::Archive { id } => output(&service.archive_driver(id)?, ctx.format),
    }
}

pub fn handle_vehicle(action: VehicleCommands, ctx: &mut AppContext) -> anyhow::Result<()> {
    let mut service = FleetService::new(&mut ctx.conn);
    match action {
        VehicleCommands::Add {
            org,
            plate_number,
            model,
            fuel_item,
            rate,
            odometer,
        } => output(
            &service.create_vehicle(CreateVehicleRequest {
                organization_id: org,
                plate_number,
                model,
                fuel_item_id: fuel_item,
                fuel_rate_per_100km: rate,
                odometer,
            })?,
            ctx.format,
        ),
        VehicleCommands::List { org, all } => output(
            &service.list_vehicles(&FleetListQuery {
                organization_id: org,
                include_archived: all,
                ..FleetListQuery::default()
            })?,
            ctx.format,
        ),
        VehicleCommands::Archive { id } => output(&service.archive_vehicle(id)?, ctx.format),
    }
}
