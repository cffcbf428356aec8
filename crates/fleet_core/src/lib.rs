//! Core domain logic for fleet waybill accounting.
//! This crate is the single source of truth for business invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{BlankConfig, ConfigError, FleetConfig, LedgerConfig, LoggingConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{
    default_log_level, init_from_config, init_logging, logging_status, LoggingError,
};
pub use model::blank::{Blank, BlankBatch, BlankId, BlankStatus};
pub use model::fleet::{Driver, Organization, Vehicle};
pub use model::stock::{
    DocumentRef, LedgerCursor, LocationKind, MovementType, NewMovement, StockItem, StockLocation,
    StockMovement,
};
pub use model::waybill::{Waybill, WaybillId, WaybillStatus};
pub use model::ModelValidationError;
pub use repo::{RepoError, RepoResult};
pub use service::blank_service::{BlankService, BlankServiceError, BlankSummary};
pub use service::fleet_service::{CreateVehicleRequest, FleetService, FleetServiceError};
pub use service::stock_service::{
    record_movement_atomic, LedgerError, RecordOutcome, StockService,
};
pub use service::waybill_service::{
    CreateWaybillRequest, UpdateWaybillRequest, WaybillService, WaybillServiceError,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
