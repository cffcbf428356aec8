//! Blank batch and blank persistence.
//!
//! # Invariants
//! - Batches of one series never overlap.
//! - Blank listing order is `series ASC, number ASC`.

use super::{get_opt_uuid, get_uuid, map_conflict, opt_id, push_pagination, RepoError, RepoResult};
use crate::model::blank::{Blank, BlankBatch, BlankBatchId, BlankId, BlankStatus};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

const BLANK_SELECT_SQL: &str = "SELECT
    id, organization_id, batch_id, series, number, status,
    issued_to_driver_id, waybill_id, updated_at
FROM blanks";

const BATCH_SELECT_SQL: &str = "SELECT
    id, organization_id, series, number_from, number_to, created_at
FROM blank_batches";

#[derive(Debug, Clone, Default)]
pub struct BlankListQuery {
    pub organization_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub status: Option<BlankStatus>,
    pub series: Option<String>,
    pub limit: Option<u32>,
    pub offset: u32,
}

pub trait BlankRepository {
    /// Inserts the batch row and one AVAILABLE blank per number.
    fn create_batch(&self, batch: &BlankBatch) -> RepoResult<BlankBatchId>;
    fn get_batch(&self, id: BlankBatchId) -> RepoResult<Option<BlankBatch>>;
    fn list_batches(&self, organization_id: Uuid) -> RepoResult<Vec<BlankBatch>>;
    fn find_overlapping_batch(
        &self,
        organization_id: Uuid,
        series: &str,
        number_from: i64,
        number_to: i64,
    ) -> RepoResult<Option<BlankBatch>>;

    fn get_blank(&self, id: BlankId) -> RepoResult<Option<Blank>>;
    fn list_blanks(&self, query: &BlankListQuery) -> RepoResult<Vec<Blank>>;
    fn blanks_in_range(
        &self,
        organization_id: Uuid,
        series: &str,
        number_from: i64,
        number_to: i64,
    ) -> RepoResult<Vec<Blank>>;
    /// Lowest-numbered ISSUED blank held by the driver.
    fn first_issued_to_driver(&self, driver_id: Uuid) -> RepoResult<Option<Blank>>;
    /// Persists status, driver and waybill links of one blank.
    fn update_blank(&self, blank: &Blank) -> RepoResult<()>;
    fn count_by_status(&self, organization_id: Uuid) -> RepoResult<Vec<(BlankStatus, u64)>>;
}

pub struct SqliteBlankRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteBlankRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl BlankRepository for SqliteBlankRepository<'_> {
    fn create_batch(&self, batch: &BlankBatch) -> RepoResult<BlankBatchId> {
        batch.validate()?;
        self.conn.execute(
            "INSERT INTO blank_batches (id, organization_id, series, number_from, number_to)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                batch.id.to_string(),
                batch.organization_id.to_string(),
                batch.series.as_str(),
                batch.number_from,
                batch.number_to,
            ],
        )?;

        let mut insert = self.conn.prepare(
            "INSERT INTO blanks (id, organization_id, batch_id, series, number, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'AVAILABLE');",
        )?;
        let organization_id = batch.organization_id.to_string();
        let batch_id = batch.id.to_string();
        for number in batch.number_from..=batch.number_to {
            insert
                .execute(params![
                    Uuid::new_v4().to_string(),
                    organization_id.as_str(),
                    batch_id.as_str(),
                    batch.series.as_str(),
                    number,
                ])
                .map_err(|err| {
                    map_conflict(err, || {
                        format!("blank {} {number:06} already exists", batch.series)
                    })
                })?;
        }
        Ok(batch.id)
    }

    fn get_batch(&self, id: BlankBatchId) -> RepoResult<Option<BlankBatch>> {
        self.conn
            .query_row(
                &format!("{BATCH_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_batch_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_batches(&self, organization_id: Uuid) -> RepoResult<Vec<BlankBatch>> {
        let mut stmt = self.conn.prepare(&format!(
            "{BATCH_SELECT_SQL}
             WHERE organization_id = ?1
             ORDER BY series ASC, number_from ASC;"
        ))?;
        let mut rows = stmt.query([organization_id.to_string()])?;
        let mut batches = Vec::new();
        while let Some(row) = rows.next()? {
            batches.push(parse_batch_row(row)?);
        }
        Ok(batches)
    }

    fn find_overlapping_batch(
        &self,
        organization_id: Uuid,
        series: &str,
        number_from: i64,
        number_to: i64,
    ) -> RepoResult<Option<BlankBatch>> {
        self.conn
            .query_row(
                &format!(
                    "{BATCH_SELECT_SQL}
                     WHERE organization_id = ?1
                       AND series = ?2
                       AND number_from <= ?4
                       AND number_to >= ?3
                     ORDER BY number_from ASC
                     LIMIT 1;"
                ),
                params![organization_id.to_string(), series, number_from, number_to],
                |row| Ok(parse_batch_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn get_blank(&self, id: BlankId) -> RepoResult<Option<Blank>> {
        self.conn
            .query_row(
                &format!("{BLANK_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_blank_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_blanks(&self, query: &BlankListQuery) -> RepoResult<Vec<Blank>> {
        let mut sql = format!("{BLANK_SELECT_SQL} WHERE 1 = 1");
        let mut binds: Vec<Value> = Vec::new();
        if let Some(organization_id) = query.organization_id {
            sql.push_str(" AND organization_id = ?");
            binds.push(Value::Text(organization_id.to_string()));
        }
        if let Some(driver_id) = query.driver_id {
            sql.push_str(" AND issued_to_driver_id = ?");
            binds.push(Value::Text(driver_id.to_string()));
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            binds.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(series) = query.series.as_ref() {
            sql.push_str(" AND series = ?");
            binds.push(Value::Text(series.clone()));
        }
        sql.push_str(" ORDER BY series ASC, number ASC");
        push_pagination(&mut sql, &mut binds, query.limit, query.offset);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut blanks = Vec::new();
        while let Some(row) = rows.next()? {
            blanks.push(parse_blank_row(row)?);
        }
        Ok(blanks)
    }

    fn blanks_in_range(
        &self,
        organization_id: Uuid,
        series: &str,
        number_from: i64,
        number_to: i64,
    ) -> RepoResult<Vec<Blank>> {
        let mut stmt = self.conn.prepare(&format!(
            "{BLANK_SELECT_SQL}
             WHERE organization_id = ?1
               AND series = ?2
               AND number BETWEEN ?3 AND ?4
             ORDER BY number ASC;"
        ))?;
        let mut rows = stmt.query(params![
            organization_id.to_string(),
            series,
            number_from,
            number_to
        ])?;
        let mut blanks = Vec::new();
        while let Some(row) = rows.next()? {
            blanks.push(parse_blank_row(row)?);
        }
        Ok(blanks)
    }

    fn first_issued_to_driver(&self, driver_id: Uuid) -> RepoResult<Option<Blank>> {
        self.conn
            .query_row(
                &format!(
                    "{BLANK_SELECT_SQL}
                     WHERE issued_to_driver_id = ?1 AND status = 'ISSUED'
                     ORDER BY series ASC, number ASC
                     LIMIT 1;"
                ),
                [driver_id.to_string()],
                |row| Ok(parse_blank_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn update_blank(&self, blank: &Blank) -> RepoResult<()> {
        blank.validate()?;
        let changed = self.conn.execute(
            "UPDATE blanks
             SET
                status = ?2,
                issued_to_driver_id = ?3,
                waybill_id = ?4,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                blank.id.to_string(),
                blank.status.as_str(),
                opt_id(blank.issued_to_driver_id),
                opt_id(blank.waybill_id),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("blank", blank.id));
        }
        Ok(())
    }

    fn count_by_status(&self, organization_id: Uuid) -> RepoResult<Vec<(BlankStatus, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) AS total
             FROM blanks
             WHERE organization_id = ?1
             GROUP BY status
             ORDER BY status ASC;",
        )?;
        let mut rows = stmt.query([organization_id.to_string()])?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next()? {
            let status = parse_status(&row.get::<_, String>("status")?)?;
            let total: i64 = row.get("total")?;
            counts.push((status, u64::try_from(total).unwrap_or(0)));
        }
        Ok(counts)
    }
}

fn parse_status(value: &str) -> RepoResult<BlankStatus> {
    BlankStatus::parse(value)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid blank status `{value}`")))
}

fn parse_batch_row(row: &Row<'_>) -> RepoResult<BlankBatch> {
    let batch = BlankBatch {
        id: get_uuid(row, "id")?,
        organization_id: get_uuid(row, "organization_id")?,
        series: row.get("series")?,
        number_from: row.get("number_from")?,
        number_to: row.get("number_to")?,
        created_at: row.get("created_at")?,
    };
    batch.validate()?;
    Ok(batch)
}

fn parse_blank_row(row: &Row<'_>) -> RepoResult<Blank> {
    let blank = Blank {
        id: get_uuid(row, "id")?,
        organization_id: get_uuid(row, "organization_id")?,
        batch_id: get_uuid(row, "batch_id")?,
        series: row.get("series")?,
        number: row.get("number")?,
        status: parse_status(&row.get::<_, String>("status")?)?,
        issued_to_driver_id: get_opt_uuid(row, "issued_to_driver_id")?,
        waybill_id: get_opt_uuid(row, "waybill_id")?,
        updated_at: row.get("updated_at")?,
    };
    blank.validate()?;
    Ok(blank)
}
