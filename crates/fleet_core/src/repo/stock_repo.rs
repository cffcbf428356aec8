//! Stock items, locations and movement ledger persistence.
//!
//! # Responsibility
//! - Store ledger movements with their chronological cursor.
//! - Compute balance components with SQL aggregates.
//!
//! # Invariants
//! - `external_ref` is unique per organization.
//! - Movement listings are ordered by `occurred_at ASC, occurred_seq ASC, id ASC`.
//! - Voided movements are excluded from every balance query.

use super::{
    bool_to_int, get_bool, get_opt_uuid, get_uuid, map_conflict, opt_id, push_pagination,
    RepoError, RepoResult,
};
use crate::model::quantity::{from_milli, to_milli};
use crate::model::stock::{
    DocumentRef, LedgerCursor, LocationKind, MovementId, MovementType, StockItem, StockItemId,
    StockLocation, StockLocationId, StockMovement,
};
use rust_decimal::Decimal;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

const MOVEMENT_SELECT_SQL: &str = "SELECT
    id, organization_id, stock_item_id, movement_type, quantity_milli,
    stock_location_id, from_location_id, to_location_id, occurred_at,
    occurred_seq, document_type, document_id, external_ref, comment,
    is_voided, created_at
FROM stock_movements";

const MOVEMENT_ORDER_SQL: &str = " ORDER BY occurred_at ASC, occurred_seq ASC, id ASC";

// Movements at or before the cursor `(?3, ?4)`.
const AT_OR_BEFORE_CURSOR_SQL: &str =
    "(occurred_at < ?3 OR (occurred_at = ?3 AND occurred_seq <= ?4))";

/// The five signed parts of a location balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BalanceComponents {
    pub income: Decimal,
    pub expense: Decimal,
    pub transfer_in: Decimal,
    pub transfer_out: Decimal,
    /// Already signed.
    pub adjustment: Decimal,
}

impl BalanceComponents {
    pub fn total(&self) -> Decimal {
        self.income - self.expense + self.transfer_in - self.transfer_out + self.adjustment
    }
}

/// Filter for ledger listings.
#[derive(Debug, Clone, Default)]
pub struct MovementListQuery {
    pub organization_id: Option<Uuid>,
    pub stock_item_id: Option<StockItemId>,
    /// Matches the location on any side of the movement.
    pub location_id: Option<StockLocationId>,
    pub document: Option<DocumentRef>,
    /// Inclusive lower bound on `occurred_at`.
    pub from: Option<i64>,
    /// Inclusive upper bound on `occurred_at`.
    pub to: Option<i64>,
    pub include_voided: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

pub trait StockRepository {
    fn create_item(&self, item: &StockItem) -> RepoResult<StockItemId>;
    fn get_item(&self, id: StockItemId) -> RepoResult<Option<StockItem>>;
    fn list_items(&self, organization_id: Uuid) -> RepoResult<Vec<StockItem>>;

    fn create_location(&self, location: &StockLocation) -> RepoResult<StockLocationId>;
    fn get_location(&self, id: StockLocationId) -> RepoResult<Option<StockLocation>>;
    fn list_locations(
        &self,
        organization_id: Uuid,
        kind: Option<LocationKind>,
    ) -> RepoResult<Vec<StockLocation>>;

    fn insert_movement(&self, movement: &StockMovement) -> RepoResult<MovementId>;
    fn get_movement(&self, id: MovementId) -> RepoResult<Option<StockMovement>>;
    fn find_by_external_ref(
        &self,
        organization_id: Uuid,
        external_ref: &str,
    ) -> RepoResult<Option<StockMovement>>;
    fn list_movements(&self, query: &MovementListQuery) -> RepoResult<Vec<StockMovement>>;
    /// Highest `occurred_seq` used at `occurred_at` within the organization.
    fn max_seq_at(&self, organization_id: Uuid, occurred_at: i64) -> RepoResult<Option<i64>>;
    /// Aggregates non-voided movements at or before `cursor`.
    fn balance_components(
        &self,
        location_id: StockLocationId,
        item_id: StockItemId,
        cursor: LedgerCursor,
    ) -> RepoResult<BalanceComponents>;
    /// Non-voided movements touching the location strictly after `cursor`.
    fn movements_after(
        &self,
        location_id: StockLocationId,
        item_id: StockItemId,
        cursor: LedgerCursor,
    ) -> RepoResult<Vec<StockMovement>>;
    /// Distinct `(location, item)` pairs with at least one movement.
    fn balance_keys(&self, organization_id: Uuid) -> RepoResult<Vec<(StockLocationId, StockItemId)>>;
    /// Voids all movements of a document; returns the affected row count.
    fn void_document_movements(&self, document: &DocumentRef) -> RepoResult<usize>;
}

/// SQLite-backed stock repository. Also usable on a `Transaction`.
pub struct SqliteStockRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStockRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn sum_component(
        &self,
        location_column: &str,
        movement_type: MovementType,
        location_id: StockLocationId,
        item_id: StockItemId,
        cursor: LedgerCursor,
    ) -> RepoResult<Decimal> {
        let milli: i64 = self.conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(quantity_milli), 0)
                 FROM stock_movements
                 WHERE {location_column} = ?1
                   AND stock_item_id = ?2
                   AND movement_type = ?5
                   AND is_voided = 0
                   AND {AT_OR_BEFORE_CURSOR_SQL};"
            ),
            params![
                location_id.to_string(),
                item_id.to_string(),
                cursor.occurred_at,
                cursor.occurred_seq,
                movement_type.as_str(),
            ],
            |row| row.get(0),
        )?;
        Ok(from_milli(milli))
    }
}

impl StockRepository for SqliteStockRepository<'_> {
    fn create_item(&self, item: &StockItem) -> RepoResult<StockItemId> {
        item.validate()?;
        self.conn
            .execute(
                "INSERT INTO stock_items (id, organization_id, name, unit)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    item.id.to_string(),
                    item.organization_id.to_string(),
                    item.name.as_str(),
                    item.unit.as_str(),
                ],
            )
            .map_err(|err| map_conflict(err, || format!("stock item `{}` already exists", item.name)))?;
        Ok(item.id)
    }

    fn get_item(&self, id: StockItemId) -> RepoResult<Option<StockItem>> {
        self.conn
            .query_row(
                "SELECT id, organization_id, name, unit FROM stock_items WHERE id = ?1;",
                [id.to_string()],
                |row| Ok(parse_item_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_items(&self, organization_id: Uuid) -> RepoResult<Vec<StockItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, unit
             FROM stock_items
             WHERE organization_id = ?1
             ORDER BY name COLLATE NOCASE ASC, id ASC;",
        )?;
        let mut rows = stmt.query([organization_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn create_location(&self, location: &StockLocation) -> RepoResult<StockLocationId> {
        location.validate()?;
        self.conn.execute(
            "INSERT INTO stock_locations (id, organization_id, name, kind, vehicle_id, driver_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                location.id.to_string(),
                location.organization_id.to_string(),
                location.name.as_str(),
                location.kind.as_str(),
                opt_id(location.vehicle_id),
                opt_id(location.driver_id),
            ],
        )?;
        Ok(location.id)
    }

    fn get_location(&self, id: StockLocationId) -> RepoResult<Option<StockLocation>> {
        self.conn
            .query_row(
                "SELECT id, organization_id, name, kind, vehicle_id, driver_id
                 FROM stock_locations
                 WHERE id = ?1;",
                [id.to_string()],
                |row| Ok(parse_location_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_locations(
        &self,
        organization_id: Uuid,
        kind: Option<LocationKind>,
    ) -> RepoResult<Vec<StockLocation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, kind, vehicle_id, driver_id
             FROM stock_locations
             WHERE organization_id = ?1
               AND (?2 IS NULL OR kind = ?2)
             ORDER BY kind ASC, name COLLATE NOCASE ASC, id ASC;",
        )?;
        let mut rows = stmt.query(params![
            organization_id.to_string(),
            kind.map(LocationKind::as_str)
        ])?;
        let mut locations = Vec::new();
        while let Some(row) = rows.next()? {
            locations.push(parse_location_row(row)?);
        }
        Ok(locations)
    }

    fn insert_movement(&self, movement: &StockMovement) -> RepoResult<MovementId> {
        let quantity_milli = to_milli(movement.quantity)?;
        let (document_type, document_id) = movement
            .document
            .as_ref()
            .map(|doc| (doc.doc_type.as_str(), doc.doc_id.as_str()))
            .unzip();
        self.conn
            .execute(
                "INSERT INTO stock_movements (
                    id, organization_id, stock_item_id, movement_type, quantity_milli,
                    stock_location_id, from_location_id, to_location_id, occurred_at,
                    occurred_seq, document_type, document_id, external_ref, comment,
                    is_voided
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15);",
                params![
                    movement.id.to_string(),
                    movement.organization_id.to_string(),
                    movement.stock_item_id.to_string(),
                    movement.movement_type.as_str(),
                    quantity_milli,
                    opt_id(movement.stock_location_id),
                    opt_id(movement.from_location_id),
                    opt_id(movement.to_location_id),
                    movement.occurred_at,
                    movement.occurred_seq,
                    document_type,
                    document_id,
                    movement.external_ref.as_deref(),
                    movement.comment.as_deref(),
                    bool_to_int(movement.is_voided),
                ],
            )
            .map_err(|err| {
                map_conflict(err, || {
                    format!(
                        "movement with external ref `{}` already exists",
                        movement.external_ref.as_deref().unwrap_or_default()
                    )
                })
            })?;
        Ok(movement.id)
    }

    fn get_movement(&self, id: MovementId) -> RepoResult<Option<StockMovement>> {
        self.conn
            .query_row(
                &format!("{MOVEMENT_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_movement_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn find_by_external_ref(
        &self,
        organization_id: Uuid,
        external_ref: &str,
    ) -> RepoResult<Option<StockMovement>> {
        self.conn
            .query_row(
                &format!(
                    "{MOVEMENT_SELECT_SQL}
                     WHERE organization_id = ?1 AND external_ref = ?2;"
                ),
                params![organization_id.to_string(), external_ref],
                |row| Ok(parse_movement_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_movements(&self, query: &MovementListQuery) -> RepoResult<Vec<StockMovement>> {
        let mut sql = format!("{MOVEMENT_SELECT_SQL} WHERE 1 = 1");
        let mut binds: Vec<Value> = Vec::new();

        if !query.include_voided {
            sql.push_str(" AND is_voided = 0");
        }
        if let Some(organization_id) = query.organization_id {
            sql.push_str(" AND organization_id = ?");
            binds.push(Value::Text(organization_id.to_string()));
        }
        if let Some(item_id) = query.stock_item_id {
            sql.push_str(" AND stock_item_id = ?");
            binds.push(Value::Text(item_id.to_string()));
        }
        if let Some(location_id) = query.location_id {
            sql.push_str(
                " AND (stock_location_id = ? OR from_location_id = ? OR to_location_id = ?)",
            );
            for _ in 0..3 {
                binds.push(Value::Text(location_id.to_string()));
            }
        }
        if let Some(document) = query.document.as_ref() {
            sql.push_str(" AND document_type = ? AND document_id = ?");
            binds.push(Value::Text(document.doc_type.clone()));
            binds.push(Value::Text(document.doc_id.clone()));
        }
        if let Some(from) = query.from {
            sql.push_str(" AND occurred_at >= ?");
            binds.push(Value::Integer(from));
        }
        if let Some(to) = query.to {
            sql.push_str(" AND occurred_at <= ?");
            binds.push(Value::Integer(to));
        }

        sql.push_str(MOVEMENT_ORDER_SQL);
        push_pagination(&mut sql, &mut binds, query.limit, query.offset);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut movements = Vec::new();
        while let Some(row) = rows.next()? {
            movements.push(parse_movement_row(row)?);
        }
        Ok(movements)
    }

    fn max_seq_at(&self, organization_id: Uuid, occurred_at: i64) -> RepoResult<Option<i64>> {
        let seq = self.conn.query_row(
            "SELECT MAX(occurred_seq)
             FROM stock_movements
             WHERE organization_id = ?1 AND occurred_at = ?2;",
            params![organization_id.to_string(), occurred_at],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(seq)
    }

    fn balance_components(
        &self,
        location_id: StockLocationId,
        item_id: StockItemId,
        cursor: LedgerCursor,
    ) -> RepoResult<BalanceComponents> {
        Ok(BalanceComponents {
            income: self.sum_component(
                "stock_location_id",
                MovementType::Income,
                location_id,
                item_id,
                cursor,
            )?,
            expense: self.sum_component(
                "stock_location_id",
                MovementType::Expense,
                location_id,
                item_id,
                cursor,
            )?,
            transfer_in: self.sum_component(
                "to_location_id",
                MovementType::Transfer,
                location_id,
                item_id,
                cursor,
            )?,
            transfer_out: self.sum_component(
                "from_location_id",
                MovementType::Transfer,
                location_id,
                item_id,
                cursor,
            )?,
            adjustment: self.sum_component(
                "stock_location_id",
                MovementType::Adjustment,
                location_id,
                item_id,
                cursor,
            )?,
        })
    }

    fn movements_after(
        &self,
        location_id: StockLocationId,
        item_id: StockItemId,
        cursor: LedgerCursor,
    ) -> RepoResult<Vec<StockMovement>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MOVEMENT_SELECT_SQL}
             WHERE (stock_location_id = ?1 OR from_location_id = ?1 OR to_location_id = ?1)
               AND stock_item_id = ?2
               AND is_voided = 0
               AND NOT {AT_OR_BEFORE_CURSOR_SQL}
             {MOVEMENT_ORDER_SQL};"
        ))?;
        let mut rows = stmt.query(params![
            location_id.to_string(),
            item_id.to_string(),
            cursor.occurred_at,
            cursor.occurred_seq,
        ])?;
        let mut movements = Vec::new();
        while let Some(row) = rows.next()? {
            movements.push(parse_movement_row(row)?);
        }
        Ok(movements)
    }

    fn balance_keys(&self, organization_id: Uuid) -> RepoResult<Vec<(StockLocationId, StockItemId)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT location_id, stock_item_id FROM (
                SELECT stock_location_id AS location_id, stock_item_id
                FROM stock_movements
                WHERE organization_id = ?1 AND stock_location_id IS NOT NULL
                UNION
                SELECT from_location_id, stock_item_id
                FROM stock_movements
                WHERE organization_id = ?1 AND from_location_id IS NOT NULL
                UNION
                SELECT to_location_id, stock_item_id
                FROM stock_movements
                WHERE organization_id = ?1 AND to_location_id IS NOT NULL
             )
             ORDER BY location_id ASC, stock_item_id ASC;",
        )?;
        let mut rows = stmt.query([organization_id.to_string()])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push((get_uuid(row, "location_id")?, get_uuid(row, "stock_item_id")?));
        }
        Ok(keys)
    }

    fn void_document_movements(&self, document: &DocumentRef) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE stock_movements
             SET is_voided = 1
             WHERE document_type = ?1 AND document_id = ?2 AND is_voided = 0;",
            params![document.doc_type.as_str(), document.doc_id.as_str()],
        )?;
        Ok(changed)
    }
}

fn parse_item_row(row: &Row<'_>) -> RepoResult<StockItem> {
    let item = StockItem {
        id: get_uuid(row, "id")?,
        organization_id: get_uuid(row, "organization_id")?,
        name: row.get("name")?,
        unit: row.get("unit")?,
    };
    item.validate()?;
    Ok(item)
}

fn parse_location_row(row: &Row<'_>) -> RepoResult<StockLocation> {
    let kind_text: String = row.get("kind")?;
    let kind = LocationKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid location kind `{kind_text}`"))
    })?;
    let location = StockLocation {
        id: get_uuid(row, "id")?,
        organization_id: get_uuid(row, "organization_id")?,
        name: row.get("name")?,
        kind,
        vehicle_id: get_opt_uuid(row, "vehicle_id")?,
        driver_id: get_opt_uuid(row, "driver_id")?,
    };
    location.validate()?;
    Ok(location)
}

fn parse_movement_row(row: &Row<'_>) -> RepoResult<StockMovement> {
    let type_text: String = row.get("movement_type")?;
    let movement_type = MovementType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid movement type `{type_text}`"))
    })?;

    let document = match (
        row.get::<_, Option<String>>("document_type")?,
        row.get::<_, Option<String>>("document_id")?,
    ) {
        (Some(doc_type), Some(doc_id)) => Some(DocumentRef { doc_type, doc_id }),
        (None, None) => None,
        _ => {
            return Err(RepoError::InvalidData(
                "movement document_type and document_id must be set together".to_string(),
            ));
        }
    };

    Ok(StockMovement {
        id: get_uuid(row, "id")?,
        organization_id: get_uuid(row, "organization_id")?,
        stock_item_id: get_uuid(row, "stock_item_id")?,
        movement_type,
        quantity: from_milli(row.get("quantity_milli")?),
        stock_location_id: get_opt_uuid(row, "stock_location_id")?,
        from_location_id: get_opt_uuid(row, "from_location_id")?,
        to_location_id: get_opt_uuid(row, "to_location_id")?,
        occurred_at: row.get("occurred_at")?,
        occurred_seq: row.get("occurred_seq")?,
        document,
        external_ref: row.get("external_ref")?,
        comment: row.get("comment")?,
        is_voided: get_bool(row, "is_voided")?,
        created_at: row.get("created_at")?,
    })
}
