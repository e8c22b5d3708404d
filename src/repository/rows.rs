// ==========================================
// 库存分配系统 - 行映射与共享查询
// ==========================================
// SqliteStockLedger (事务内/外) 与 CatalogRepository 共用,
// 所有函数只接收 &Connection, Transaction 可直接解引用传入
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::{
    AllocationActionType, AllocationLogEntry, LotId, Part, PartId, Requirement, RequirementId,
    StockLot, Task, TaskId, TaskStatus, WarehouseId,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

pub(crate) const TASK_COLUMNS: &str = "id, description, status, expected_date";
pub(crate) const REQUIREMENT_COLUMNS: &str =
    "id, task_id, part_id, planned_quantity, fulfilled_quantity";
pub(crate) const LOT_COLUMNS: &str = "id, part_id, warehouse_id, quantity";
pub(crate) const LOG_COLUMNS: &str =
    "log_id, run_id, task_id, action_type, payload_json, created_at";

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

pub(crate) fn map_part(row: &Row) -> rusqlite::Result<Part> {
    Ok(Part {
        id: PartId(row.get(0)?),
        name: row.get(1)?,
        unit_of_measurement: row.get(2)?,
        unit_price: row.get(3)?,
    })
}

pub(crate) fn map_task(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get(2)?;
    Ok(Task {
        id: TaskId(row.get(0)?),
        description: row.get(1)?,
        status: status.parse::<TaskStatus>().map_err(|e| conversion_error(2, e))?,
        expected_date: row.get(3)?,
    })
}

pub(crate) fn map_requirement(row: &Row) -> rusqlite::Result<Requirement> {
    Ok(Requirement {
        id: RequirementId(row.get(0)?),
        task_id: TaskId(row.get(1)?),
        part_id: PartId(row.get(2)?),
        planned_quantity: row.get(3)?,
        fulfilled_quantity: row.get(4)?,
    })
}

pub(crate) fn map_lot(row: &Row) -> rusqlite::Result<StockLot> {
    Ok(StockLot {
        id: LotId(row.get(0)?),
        part_id: PartId(row.get(1)?),
        warehouse_id: WarehouseId(row.get(2)?),
        quantity: row.get(3)?,
    })
}

pub(crate) fn map_log(row: &Row) -> rusqlite::Result<AllocationLogEntry> {
    let action_type: String = row.get(3)?;
    let payload: Option<String> = row.get(4)?;
    let payload_json = match payload {
        Some(raw) => Some(
            serde_json::from_str(&raw).map_err(|e| conversion_error(4, e.to_string()))?,
        ),
        None => None,
    };

    Ok(AllocationLogEntry {
        log_id: row.get(0)?,
        run_id: row.get(1)?,
        task_id: TaskId(row.get(2)?),
        action_type: action_type
            .parse::<AllocationActionType>()
            .map_err(|e| conversion_error(3, e))?,
        payload_json,
        created_at: row.get(5)?,
    })
}

/// 生成 IN 子句占位符: "?, ?, ?"
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn id_values<'a>(ids: impl IntoIterator<Item = &'a PartId>) -> Vec<Value> {
    ids.into_iter().map(|id| Value::Integer(id.0)).collect()
}

// ==========================================
// 共享查询
// ==========================================

pub(crate) fn query_substitutes(conn: &Connection, part_id: PartId) -> RepositoryResult<Vec<PartId>> {
    let mut stmt = conn.prepare(
        "SELECT substitute_id FROM part_substitute WHERE part_id = ?1 ORDER BY substitute_id",
    )?;
    let ids = stmt
        .query_map(params![part_id.0], |row| Ok(PartId(row.get(0)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub(crate) fn query_available_quantity(
    conn: &Connection,
    part_ids: &BTreeSet<PartId>,
) -> RepositoryResult<u64> {
    if part_ids.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "SELECT COALESCE(SUM(quantity), 0) FROM stock_lot WHERE quantity > 0 AND part_id IN ({})",
        placeholders(part_ids.len())
    );
    let total: i64 = conn.query_row(&sql, params_from_iter(id_values(part_ids)), |row| {
        row.get(0)
    })?;

    u64::try_from(total).map_err(|_| RepositoryError::FieldValueError {
        field: "stock_lot.quantity".to_string(),
        message: format!("库存合计为负数: {}", total),
    })
}

pub(crate) fn query_lots_for_parts(
    conn: &Connection,
    part_ids: &[PartId],
) -> RepositoryResult<Vec<StockLot>> {
    if part_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {} FROM stock_lot WHERE quantity > 0 AND part_id IN ({}) ORDER BY id",
        LOT_COLUMNS,
        placeholders(part_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let lots = stmt
        .query_map(params_from_iter(id_values(part_ids)), map_lot)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(lots)
}

pub(crate) fn query_unmet_requirements(
    conn: &Connection,
    task_id: TaskId,
) -> RepositoryResult<Vec<Requirement>> {
    let sql = format!(
        "SELECT {} FROM requirement \
         WHERE task_id = ?1 AND fulfilled_quantity < planned_quantity ORDER BY id",
        REQUIREMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let requirements = stmt
        .query_map(params![task_id.0], map_requirement)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(requirements)
}

pub(crate) fn query_task(conn: &Connection, task_id: TaskId) -> RepositoryResult<Task> {
    let sql = format!("SELECT {} FROM task WHERE id = ?1", TASK_COLUMNS);
    conn.query_row(&sql, params![task_id.0], map_task)
        .optional()?
        .ok_or_else(|| RepositoryError::not_found("task", task_id))
}

pub(crate) fn query_requirement(
    conn: &Connection,
    requirement_id: RequirementId,
) -> RepositoryResult<Requirement> {
    let sql = format!("SELECT {} FROM requirement WHERE id = ?1", REQUIREMENT_COLUMNS);
    conn.query_row(&sql, params![requirement_id.0], map_requirement)
        .optional()?
        .ok_or_else(|| RepositoryError::not_found("requirement", requirement_id))
}

/// 打开仓储连接, 打开失败统一映射为 DatabaseConnectionError
pub(crate) fn open_repository_connection(db_path: &str) -> RepositoryResult<Connection> {
    open_sqlite_connection(db_path)
        .map_err(|e| RepositoryError::DatabaseConnectionError(format!("{}: {}", db_path, e)))
}
