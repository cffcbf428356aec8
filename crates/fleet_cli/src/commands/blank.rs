use super::AppContext;
use crate::cli::BlankCommands;
use crate::output::output;
use anyhow::Context;
use fleet_core::repo::blank_repo::SqliteBlankRepository;
use fleet_core::repo::fleet_repo::{FleetRepository, SqliteFleetRepository};
use fleet_core::service::in_immediate_tx;
use fleet_core::BlankService;

pub fn handle(action: BlankCommands, ctx: &mut AppContext) -> anyhow::Result<()> {
    let max_batch_size = ctx.config.blanks.max_batch_size;
    match action {
        BlankCommands::Batch {
            org,
            series,
            from,
            to,
        } => {
            let batch = in_immediate_tx(&mut ctx.conn, |tx| {
                BlankService::new(SqliteBlankRepository::new(tx), max_batch_size)
                    .create_batch(org, &series, from, to)
            })?;
            output(&batch, ctx.format)
        }
        BlankCommands::Issue {
            driver,
            series,
            from,
            to,
        } => {
            let driver = SqliteFleetRepository::new(&ctx.conn)
                .get_driver(driver)?
                .with_context(|| format!("driver not found: {driver}"))?;
            let issued = in_immediate_tx(&mut ctx.conn, |tx| {
                BlankService::new(SqliteBlankRepository::new(tx), max_batch_size)
                    .issue_to_driver(&driver, &series, from, to)
            })?;
            output(&issued, ctx.format)
        }
        BlankCommands::Return { ids } => {
            let returned = in_immediate_tx(&mut ctx.conn, |tx| {
                BlankService::new(SqliteBlankRepository::new(tx), max_batch_size)
                    .return_from_driver(&ids)
            })?;
            output(&returned, ctx.format)
        }
        BlankCommands::Spoil { id } => {
            let service = BlankService::new(SqliteBlankRepository::new(&ctx.conn), max_batch_size);
            output(&service.spoil(id)?, ctx.format)
        }
        BlankCommands::Pool { driver } => {
            let service = BlankService::new(SqliteBlankRepository::new(&ctx.conn), max_batch_size);
            output(&service.driver_pool(driver)?, ctx.format)
        }
        BlankCommands::Summary { org } => {
            let service = BlankService::new(SqliteBlankRepository::new(&ctx.conn), max_batch_size);
            output(&service.summary(org)?, ctx.format)
        }
    }
}
