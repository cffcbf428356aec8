//! Waybill persistence.
//!
//! # Invariants
//! - Listing order is `waybill_date DESC, number ASC, id ASC`.
//! - Persisted rows must satisfy `Waybill::validate()` on read.

use super::{get_opt_uuid, get_uuid, opt_id, push_pagination, RepoError, RepoResult};
use crate::model::quantity::{from_milli, to_milli};
use crate::model::waybill::{Waybill, WaybillId, WaybillStatus};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

const WAYBILL_SELECT_SQL: &str = "SELECT
    id, organization_id, number, waybill_date, vehicle_id, driver_id, blank_id,
    status, odometer_start, odometer_end, fuel_at_start_milli,
    fuel_refueled_milli, fuel_at_end_milli, refuel_source_location_id, route,
    notes, submitted_at, posted_at, cancelled_at, created_at, updated_at
FROM waybills";

#[derive(Debug, Clone, Default)]
pub struct WaybillListQuery {
    pub organization_id: Option<Uuid>,
    pub status: Option<WaybillStatus>,
    pub vehicle_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    /// Inclusive lower bound on `waybill_date`.
    pub date_from: Option<i64>,
    /// Inclusive upper bound on `waybill_date`.
    pub date_to: Option<i64>,
    pub limit: Option<u32>,
    pub offset: u32,
}

pub trait WaybillRepository {
    fn create_waybill(&self, waybill: &Waybill) -> RepoResult<WaybillId>;
    /// Replaces every mutable column, status timestamps included.
    fn update_waybill(&self, waybill: &Waybill) -> RepoResult<()>;
    fn get_waybill(&self, id: WaybillId) -> RepoResult<Option<Waybill>>;
    fn list_waybills(&self, query: &WaybillListQuery) -> RepoResult<Vec<Waybill>>;
}

pub struct SqliteWaybillRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteWaybillRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl WaybillRepository for SqliteWaybillRepository<'_> {
    fn create_waybill(&self, waybill: &Waybill) -> RepoResult<WaybillId> {
        waybill.validate()?;
        self.conn.execute(
            "INSERT INTO waybills (
                id, organization_id, number, waybill_date, vehicle_id, driver_id,
                blank_id, status, odometer_start, odometer_end, fuel_at_start_milli,
                fuel_refueled_milli, fuel_at_end_milli, refuel_source_location_id,
                route, notes, submitted_at, posted_at, cancelled_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19
            );",
            params![
                waybill.id.to_string(),
                waybill.organization_id.to_string(),
                waybill.number.as_str(),
                waybill.waybill_date,
                waybill.vehicle_id.to_string(),
                waybill.driver_id.to_string(),
                opt_id(waybill.blank_id),
                waybill.status.as_str(),
                waybill.odometer_start,
                waybill.odometer_end,
                to_milli(waybill.fuel_at_start)?,
                to_milli(waybill.fuel_refueled)?,
                waybill.fuel_at_end.map(to_milli).transpose()?,
                opt_id(waybill.refuel_source_location_id),
                waybill.route.as_str(),
                waybill.notes.as_deref(),
                waybill.submitted_at,
                waybill.posted_at,
                waybill.cancelled_at,
            ],
        )?;
        Ok(waybill.id)
    }

    fn update_waybill(&self, waybill: &Waybill) -> RepoResult<()> {
        waybill.validate()?;
        let changed = self.conn.execute(
            "UPDATE waybills
             SET
                number = ?2,
                waybill_date = ?3,
                vehicle_id = ?4,
                driver_id = ?5,
                blank_id = ?6,
                status = ?7,
                odometer_start = ?8,
                odometer_end = ?9,
                fuel_at_start_milli = ?10,
                fuel_refueled_milli = ?11,
                fuel_at_end_milli = ?12,
                refuel_source_location_id = ?13,
                route = ?14,
                notes = ?15,
                submitted_at = ?16,
                posted_at = ?17,
                cancelled_at = ?18,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                waybill.id.to_string(),
                waybill.number.as_str(),
                waybill.waybill_date,
                waybill.vehicle_id.to_string(),
                waybill.driver_id.to_string(),
                opt_id(waybill.blank_id),
                waybill.status.as_str(),
                waybill.odometer_start,
                waybill.odometer_end,
                to_milli(waybill.fuel_at_start)?,
                to_milli(waybill.fuel_refueled)?,
                waybill.fuel_at_end.map(to_milli).transpose()?,
                opt_id(waybill.refuel_source_location_id),
                waybill.route.as_str(),
                waybill.notes.as_deref(),
                waybill.submitted_at,
                waybill.posted_at,
                waybill.cancelled_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("waybill", waybill.id));
        }
        Ok(())
    }

    fn get_waybill(&self, id: WaybillId) -> RepoResult<Option<Waybill>> {
        self.conn
            .query_row(
                &format!("{WAYBILL_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_waybill_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_waybills(&self, query: &WaybillListQuery) -> RepoResult<Vec<Waybill>> {
        let mut sql = format!("{WAYBILL_SELECT_SQL} WHERE 1 = 1");
        let mut binds: Vec<Value> = Vec::new();

        let id_filters = [
            ("organization_id", query.organization_id),
            ("vehicle_id", query.vehicle_id),
            ("driver_id", query.driver_id),
        ];
        for (column, value) in id_filters {
            if let Some(id) = value {
                sql.push_str(&format!(" AND {column} = ?"));
                binds.push(Value::Text(id.to_string()));
            }
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            binds.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(date_from) = query.date_from {
            sql.push_str(" AND waybill_date >= ?");
            binds.push(Value::Integer(date_from));
        }
        if let Some(date_to) = query.date_to {
            sql.push_str(" AND waybill_date <= ?");
            binds.push(Value::Integer(date_to));
        }

        sql.push_str(" ORDER BY waybill_date DESC, number ASC, id ASC");
        push_pagination(&mut sql, &mut binds, query.limit, query.offset);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut waybills = Vec::new();
        while let Some(row) = rows.next()? {
            waybills.push(parse_waybill_row(row)?);
        }
        Ok(waybills)
    }
}

fn parse_waybill_row(row: &Row<'_>) -> RepoResult<Waybill> {
    let status_text: String = row.get("status")?;
    let status = WaybillStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid waybill status `{status_text}`"))
    })?;

    let waybill = Waybill {
        id: get_uuid(row, "id")?,
        organization_id: get_uuid(row, "organization_id")?,
        number: row.get("number")?,
        waybill_date: row.get("waybill_date")?,
        vehicle_id: get_uuid(row, "vehicle_id")?,
        driver_id: get_uuid(row, "driver_id")?,
        blank_id: get_opt_uuid(row, "blank_id")?,
        status,
        odometer_start: row.get("odometer_start")?,
        odometer_end: row.get("odometer_end")?,
        fuel_at_start: from_milli(row.get("fuel_at_start_milli")?),
        fuel_refueled: from_milli(row.get("fuel_refueled_milli")?),
        fuel_at_end: row
            .get::<_, Option<i64>>("fuel_at_end_milli")?
            .map(from_milli),
        refuel_source_location_id: get_opt_uuid(row, "refuel_source_location_id")?,
        route: row.get("route")?,
        notes: row.get("notes")?,
        submitted_at: row.get("submitted_at")?,
        posted_at: row.get("posted_at")?,
        cancelled_at: row.get("cancelled_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    waybill.validate()?;
    Ok(waybill)
}
