//! Command handlers; each maps one subcommand group onto a core service.

use crate::cli::{Commands, OutputFormat};
use crate::output::output;
use fleet_core::db::migrations::schema_version;
use fleet_core::FleetConfig;
use rusqlite::Connection;
use serde::Serialize;

pub mod blank;
pub mod fleet;
pub mod stock;
pub mod waybill;

/// Shared state of one CLI invocation.
pub struct AppContext {
    pub conn: Connection,
    pub config: FleetConfig,
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct InitReport {
    database: String,
    schema_version: u32,
}

pub fn dispatch(command: Commands, ctx: &mut AppContext) -> anyhow::Result<()> {
    match command {
        Commands::Init => output(
            &InitReport {
                database: ctx.config.database.path.display().to_string(),
                schema_version: schema_version(&ctx.conn)?,
            },
            ctx.format,
        ),
        Commands::Org { action } => fleet::handle_org(action, ctx),
        Commands::Driver { action } => fleet::handle_driver(action, ctx),
        Commands::Vehicle { action } => fleet::handle_vehicle(action, ctx),
        Commands::Stock { action } => stock::handle(action, ctx),
        Commands::Blank { action } => blank::handle(action, ctx),
        Commands::Waybill { action } => waybill::handle(action, ctx),
    }
}
