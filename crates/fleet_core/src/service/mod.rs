//! Use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into fleet use-cases.
//! - Own multi-table transactions so callers never see partial writes.
//!
//! # Invariants
//! - Every write touching more than one table runs inside one
//!   `BEGIN IMMEDIATE` transaction.

use crate::repo::RepoError;
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod blank_service;
pub mod fleet_service;
pub mod stock_service;
pub mod waybill_service;

/// Runs `op` inside an immediate transaction and commits on success.
///
/// The transaction is rolled back when `op` fails.
pub fn in_immediate_tx<T, E>(
    conn: &mut Connection,
    op: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<RepoError>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| E::from(RepoError::from(err)))?;
    let value = op(&tx)?;
    tx.commit().map_err(|err| E::from(RepoError::from(err)))?;
    Ok(value)
}
