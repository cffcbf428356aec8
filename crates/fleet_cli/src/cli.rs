//! Command-line grammar for the `fleet` binary.

use chrono::{DateTime, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;
use uuid::Uuid;

/// Top-level CLI parser for the `fleet` binary.
#[derive(Debug, Parser)]
#[command(name = "fleet", version, about = "Fleet waybills, fuel stock and blanks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// SQLite database file (overrides `database.path`)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Configuration file (defaults to ./fleet.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format: json, table
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose mode (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create or migrate the database.
    Init,
    /// Organizations.
    Org {
        #[command(subcommand)]
        action: OrgCommands,
    },
    /// Drivers.
    Driver {
        #[command(subcommand)]
        action: DriverCommands,
    },
    /// Vehicles.
    Vehicle {
        #[command(subcommand)]
        action: VehicleCommands,
    },
    /// Fuel stock ledger.
    Stock {
        #[command(subcommand)]
        action: StockCommands,
    },
    /// Strict-accountability blanks.
    Blank {
        #[command(subcommand)]
        action: BlankCommands,
    },
    /// Waybill documents.
    Waybill {
        #[command(subcommand)]
        action: WaybillCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum OrgCommands {
    /// Register an organization.
    Add {
        name: String,
        #[arg(long)]
        inn: Option<String>,
    },
    /// List organizations.
    List {
        /// Include archived organizations
        #[arg(long)]
        all: bool,
    },
    /// Archive an organization.
    Archive { id: Uuid },
}

#[derive(Debug, Subcommand)]
pub enum DriverCommands {
    /// Register a driver.
    Add {
        #[arg(long)]
        org: Uuid,
        full_name: String,
        #[arg(long)]
        license: Option<String>,
    },
    /// List drivers.
    List {
        #[arg(long)]
        org: Option<Uuid>,
        #[arg(long)]
        all: bool,
    },
    /// Create the driver's fuel card location.
    FuelCard {
        driver: Uuid,
        #[arg(long)]
        name: String,
    },
    /// Archive a driver.
    Archive { id: Uuid },
}

#[derive(Debug, Subcommand)]
pub enum VehicleCommands {
    /// Register a vehicle and its tank location.
    Add {
        #[arg(long)]
        org: Uuid,
        plate_number: String,
        #[arg(long, default_value = "")]
        model: String,
        /// Stock item the vehicle burns
        #[arg(long)]
        fuel_item: Option<Uuid>,
        /// Norm consumption, litres per 100 km
        #[arg(long)]
        rate: Option<Decimal>,
        #[arg(long, default_value_t = 0)]
        odometer: i64,
    },
    /// List vehicles.
    List {
        #[arg(long)]
        org: Option<Uuid>,
        #[arg(long)]
        all: bool,
    },
    /// Archive a vehicle.
    Archive { id: Uuid },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum LocationKindArg {
    Warehouse,
    FuelCard,
    VehicleTank,
}

/// Arguments shared by single-location movements.
#[derive(Debug, clap::Args)]
pub struct MovementArgs {
    #[arg(long)]
    pub org: Uuid,
    #[arg(long)]
    pub item: Uuid,
    #[arg(long)]
    pub location: Uuid,
    #[arg(long, allow_hyphen_values = true)]
    pub qty: Decimal,
    #[command(flatten)]
    pub meta: MovementMeta,
}

#[derive(Debug, clap::Args)]
pub struct MovementMeta {
    /// When the movement happened (epoch ms, YYYY-MM-DD or RFC 3339); now by default
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<i64>,
    /// Idempotency key
    #[arg(long = "ref")]
    pub external_ref: Option<String>,
    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum StockCommands {
    /// Register a stock item.
    ItemAdd {
        #[arg(long)]
        org: Uuid,
        name: String,
        #[arg(long, default_value = "l")]
        unit: String,
    },
    /// Register a stock location.
    LocationAdd {
        #[arg(long)]
        org: Uuid,
        name: String,
        #[arg(long, value_enum, default_value = "warehouse")]
        kind: LocationKindArg,
        #[arg(long)]
        vehicle: Option<Uuid>,
        #[arg(long)]
        driver: Option<Uuid>,
    },
    /// Record an INCOME movement.
    Income(MovementArgs),
    /// Record an EXPENSE movement.
    Expense(MovementArgs),
    /// Record a signed ADJUSTMENT movement.
    Adjust(MovementArgs),
    /// Record a TRANSFER between two locations.
    Transfer {
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        item: Uuid,
        #[arg(long)]
        from: Uuid,
        #[arg(long)]
        to: Uuid,
        #[arg(long)]
        qty: Decimal,
        #[command(flatten)]
        meta: MovementMeta,
    },
    /// Balance of one location/item, or every non-zero balance of an organization.
    Balance {
        #[arg(long)]
        org: Uuid,
        #[arg(long, requires = "item")]
        location: Option<Uuid>,
        #[arg(long, requires = "location")]
        item: Option<Uuid>,
        /// Balance as of this instant
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<i64>,
    },
    /// Statement with running balance for one location/item.
    History {
        #[arg(long)]
        location: Uuid,
        #[arg(long)]
        item: Uuid,
        #[arg(long, value_parser = parse_timestamp)]
        from: Option<i64>,
        #[arg(long, value_parser = parse_timestamp)]
        to: Option<i64>,
    },
}

#[derive(Debug, Subcommand)]
pub enum BlankCommands {
    /// Register a numbered batch of blanks.
    Batch {
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        series: String,
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },
    /// Hand a range of blanks to a driver.
    Issue {
        #[arg(long)]
        driver: Uuid,
        #[arg(long)]
        series: String,
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },
    /// Take issued blanks back from their driver.
    Return {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    /// Mark a blank as spoiled.
    Spoil { id: Uuid },
    /// Blanks currently held by a driver.
    Pool {
        #[arg(long)]
        driver: Uuid,
    },
    /// Blank counts per status.
    Summary {
        #[arg(long)]
        org: Uuid,
    },
}

#[derive(Debug, Subcommand)]
pub enum WaybillCommands {
    /// Create a DRAFT waybill.
    Create {
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        vehicle: Uuid,
        #[arg(long)]
        driver: Uuid,
        #[arg(long, value_parser = parse_timestamp)]
        date: i64,
        #[arg(long)]
        number: Option<String>,
        /// Reserve the driver's next issued blank
        #[arg(long)]
        reserve_blank: bool,
        /// Reserve this specific blank
        #[arg(long)]
        blank: Option<Uuid>,
        #[arg(long)]
        odometer_start: Option<i64>,
        #[arg(long)]
        fuel_start: Option<Decimal>,
        #[arg(long)]
        refuel_source: Option<Uuid>,
        #[arg(long, default_value = "")]
        route: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Edit a DRAFT waybill.
    Update {
        id: Uuid,
        #[arg(long)]
        number: Option<String>,
        #[arg(long, value_parser = parse_timestamp)]
        date: Option<i64>,
        #[arg(long)]
        odometer_start: Option<i64>,
        #[arg(long)]
        odometer_end: Option<i64>,
        #[arg(long)]
        fuel_start: Option<Decimal>,
        #[arg(long)]
        refueled: Option<Decimal>,
        #[arg(long)]
        fuel_end: Option<Decimal>,
        #[arg(long)]
        refuel_source: Option<Uuid>,
        #[arg(long)]
        route: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// DRAFT -> SUBMITTED.
    Submit { id: Uuid },
    /// SUBMITTED -> DRAFT.
    Return { id: Uuid },
    /// SUBMITTED -> POSTED.
    Post { id: Uuid },
    /// Cancel a waybill.
    Cancel { id: Uuid },
    /// Show a waybill with its fuel figures.
    Show { id: Uuid },
    /// List waybills.
    List {
        #[arg(long)]
        org: Option<Uuid>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        vehicle: Option<Uuid>,
        #[arg(long)]
        driver: Option<Uuid>,
        #[arg(long, value_parser = parse_timestamp)]
        from: Option<i64>,
        #[arg(long, value_parser = parse_timestamp)]
        to: Option<i64>,
        #[arg(long)]
        limit: Option<u32>,
    },
}

/// Parses epoch milliseconds, `YYYY-MM-DD` (UTC midnight) or RFC 3339.
pub fn parse_timestamp(value: &str) -> Result<i64, String> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<i64>() {
        return Ok(millis);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|datetime| datetime.and_utc().timestamp_millis())
            .ok_or_else(|| format!("invalid date `{value}`"));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|datetime| datetime.timestamp_millis())
        .map_err(|_| format!("expected epoch ms, YYYY-MM-DD or RFC 3339, got `{value}`"))
}
