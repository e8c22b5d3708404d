// ==========================================
// 库存分配系统 - 主数据仓储
// ==========================================
// 职责: 备件/替代关系/仓库/批次/任务/需求的创建与查询
// 说明: 分配引擎不依赖本仓储, 供上游流程、管理命令与测试使用
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::{
    LotId, Part, PartId, Requirement, RequirementId, StockLot, Task, TaskId, TaskStatus,
    Warehouse, WarehouseId,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::rows::{
    map_lot, map_part, map_requirement, open_repository_connection, query_requirement,
    query_task, LOT_COLUMNS, REQUIREMENT_COLUMNS,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct CatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_repository_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 备件与替代关系
    // ==========================================

    pub fn insert_part(
        &self,
        name: &str,
        unit_of_measurement: &str,
        unit_price: f64,
    ) -> RepositoryResult<PartId> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO part (name, unit_of_measurement, unit_price) VALUES (?1, ?2, ?3)",
            params![name, unit_of_measurement, unit_price],
        )?;
        Ok(PartId(conn.last_insert_rowid()))
    }

    pub fn find_part(&self, part_id: PartId) -> RepositoryResult<Option<Part>> {
        let conn = self.get_conn()?;
        let part = conn
            .query_row(
                "SELECT id, name, unit_of_measurement, unit_price FROM part WHERE id = ?1",
                params![part_id.0],
                map_part,
            )
            .optional()?;
        Ok(part)
    }

    /// 声明正向替代关系 (重复声明忽略)
    ///
    /// 分配引擎只按 part_id 正向查询; 需要双向替代时请使用
    /// [`CatalogRepository::add_substitute_both_ways`]。
    pub fn add_substitute(&self, part_id: PartId, substitute_id: PartId) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO part_substitute (part_id, substitute_id) VALUES (?1, ?2)",
            params![part_id.0, substitute_id.0],
        )?;
        Ok(())
    }

    pub fn add_substitute_both_ways(&self, a: PartId, b: PartId) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO part_substitute (part_id, substitute_id) VALUES (?1, ?2)",
            )?;
            stmt.execute(params![a.0, b.0])?;
            stmt.execute(params![b.0, a.0])?;
        }
        tx.commit()?;
        Ok(())
    }

    // ==========================================
    // 仓库与批次
    // ==========================================

    pub fn insert_warehouse(
        &self,
        name: &str,
        address: &str,
        phone: &str,
        email: &str,
    ) -> RepositoryResult<WarehouseId> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO warehouse (name, address, phone, email) VALUES (?1, ?2, ?3, ?4)",
            params![name, address, phone, email],
        )?;
        Ok(WarehouseId(conn.last_insert_rowid()))
    }

    pub fn find_warehouse(&self, warehouse_id: WarehouseId) -> RepositoryResult<Option<Warehouse>> {
        let conn = self.get_conn()?;
        let warehouse = conn
            .query_row(
                "SELECT id, name, address, phone, email FROM warehouse WHERE id = ?1",
                params![warehouse_id.0],
                |row| {
                    Ok(Warehouse {
                        id: WarehouseId(row.get(0)?),
                        name: row.get(1)?,
                        address: row.get(2)?,
                        phone: row.get(3)?,
                        email: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(warehouse)
    }

    pub fn insert_stock_lot(
        &self,
        part_id: PartId,
        warehouse_id: WarehouseId,
        quantity: u32,
    ) -> RepositoryResult<LotId> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO stock_lot (part_id, warehouse_id, quantity) VALUES (?1, ?2, ?3)",
            params![part_id.0, warehouse_id.0, quantity],
        )?;
        Ok(LotId(conn.last_insert_rowid()))
    }

    pub fn find_stock_lot(&self, lot_id: LotId) -> RepositoryResult<StockLot> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM stock_lot WHERE id = ?1", LOT_COLUMNS);
        conn.query_row(&sql, params![lot_id.0], map_lot)
            .optional()?
            .ok_or_else(|| RepositoryError::not_found("stock_lot", lot_id))
    }

    /// 全部批次在库数量合计 (含 0 数量批次)
    pub fn total_stock(&self) -> RepositoryResult<u64> {
        let conn = self.get_conn()?;
        let total: i64 =
            conn.query_row("SELECT COALESCE(SUM(quantity), 0) FROM stock_lot", [], |row| {
                row.get(0)
            })?;
        Ok(total.max(0) as u64)
    }

    // ==========================================
    // 任务与需求
    // ==========================================

    pub fn insert_task(
        &self,
        description: &str,
        status: TaskStatus,
        expected_date: NaiveDate,
    ) -> RepositoryResult<TaskId> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO task (description, status, expected_date) VALUES (?1, ?2, ?3)",
            params![description, status.as_str(), expected_date],
        )?;
        Ok(TaskId(conn.last_insert_rowid()))
    }

    pub fn find_task(&self, task_id: TaskId) -> RepositoryResult<Task> {
        let conn = self.get_conn()?;
        query_task(&conn, task_id)
    }

    pub fn insert_requirement(
        &self,
        task_id: TaskId,
        part_id: PartId,
        planned_quantity: u32,
    ) -> RepositoryResult<RequirementId> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO requirement (task_id, part_id, planned_quantity) VALUES (?1, ?2, ?3)",
            params![task_id.0, part_id.0, planned_quantity],
        )?;
        Ok(RequirementId(conn.last_insert_rowid()))
    }

    pub fn find_requirement(&self, requirement_id: RequirementId) -> RepositoryResult<Requirement> {
        let conn = self.get_conn()?;
        query_requirement(&conn, requirement_id)
    }

    /// 任务下全部需求 (含已满足的), 按 id 升序
    pub fn requirements_for_task(&self, task_id: TaskId) -> RepositoryResult<Vec<Requirement>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM requirement WHERE task_id = ?1 ORDER BY id",
            REQUIREMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let requirements = stmt
            .query_map(params![task_id.0], map_requirement)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(requirements)
    }

    /// 全部需求已分配数量合计
    pub fn total_fulfilled(&self) -> RepositoryResult<u64> {
        let conn = self.get_conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(fulfilled_quantity), 0) FROM requirement",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }
}
