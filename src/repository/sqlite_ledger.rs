// ==========================================
// 库存分配系统 - SQLite 库存账本
// ==========================================
// 锁模型:
// - SQLite 无行级锁, 事务以 BEGIN IMMEDIATE 开启,
//   在第一次加锁读取之前即持有数据库写锁 (强于行锁, 不会重复扣减)
// - 其他连接的写事务等待 busy_timeout 后以 DatabaseTransactionError 失败
// - 进程内通过 Arc<Mutex<Connection>> 共享连接
// ==========================================

use crate::domain::{
    AllocationLogEntry, PartId, Requirement, RequirementId, StockLot, Task, TaskId, TaskStatus,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::ledger::{StockLedger, StockReader, UnitOfWork};
use crate::repository::rows::{
    map_task, open_repository_connection, query_available_quantity, query_lots_for_parts,
    query_requirement, query_substitutes, query_task, query_unmet_requirements, TASK_COLUMNS,
};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

// ==========================================
// SqliteStockLedger - 库存账本
// ==========================================
pub struct SqliteStockLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStockLedger {
    /// 打开数据库文件 (应用统一 PRAGMA)
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_repository_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

impl StockReader for SqliteStockLedger {
    fn substitutes_of(&self, part_id: PartId) -> RepositoryResult<Vec<PartId>> {
        let conn = self.get_conn()?;
        query_substitutes(&conn, part_id)
    }

    fn available_quantity(&self, part_ids: &BTreeSet<PartId>) -> RepositoryResult<u64> {
        let conn = self.get_conn()?;
        query_available_quantity(&conn, part_ids)
    }
}

impl StockLedger for SqliteStockLedger {
    fn unit_of_work<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RepositoryError::from)?;
        let mut uow = SqliteUnitOfWork { tx };

        // 闭包出错时 uow 被丢弃, Transaction 默认回滚
        let value = f(&mut uow)?;

        uow.tx.commit().map_err(RepositoryError::from)?;
        Ok(value)
    }

    fn unmet_requirements_for_task(&self, task_id: TaskId) -> RepositoryResult<Vec<Requirement>> {
        let conn = self.get_conn()?;
        query_unmet_requirements(&conn, task_id)
    }

    fn tasks_for_allocation(&self) -> RepositoryResult<Vec<Task>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM task WHERE status IN (?1, ?2) ORDER BY expected_date ASC, id ASC",
            TASK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(
                params![
                    TaskStatus::Pending.as_str(),
                    TaskStatus::InProgress.as_str()
                ],
                map_task,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }
}

// ==========================================
// SqliteUnitOfWork - 事务句柄
// ==========================================
struct SqliteUnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl StockReader for SqliteUnitOfWork<'_> {
    fn substitutes_of(&self, part_id: PartId) -> RepositoryResult<Vec<PartId>> {
        query_substitutes(&self.tx, part_id)
    }

    fn available_quantity(&self, part_ids: &BTreeSet<PartId>) -> RepositoryResult<u64> {
        query_available_quantity(&self.tx, part_ids)
    }
}

impl UnitOfWork for SqliteUnitOfWork<'_> {
    fn locked_requirement(
        &mut self,
        requirement_id: RequirementId,
    ) -> RepositoryResult<Requirement> {
        query_requirement(&self.tx, requirement_id)
    }

    fn locked_requirements_for_task(
        &mut self,
        task_id: TaskId,
    ) -> RepositoryResult<Vec<Requirement>> {
        query_unmet_requirements(&self.tx, task_id)
    }

    fn locked_stock_lots_for_parts(
        &mut self,
        part_ids: &[PartId],
    ) -> RepositoryResult<Vec<StockLot>> {
        query_lots_for_parts(&self.tx, part_ids)
    }

    fn bulk_update_lots(&mut self, lots: &[StockLot]) -> RepositoryResult<usize> {
        if lots.is_empty() {
            return Ok(0);
        }

        let mut count = 0;
        {
            let mut stmt = self
                .tx
                .prepare_cached("UPDATE stock_lot SET quantity = ?1 WHERE id = ?2")?;
            for lot in lots {
                let rows = stmt.execute(params![lot.quantity, lot.id.0])?;
                if rows == 0 {
                    return Err(RepositoryError::not_found("stock_lot", lot.id));
                }
                count += rows;
            }
        }

        debug!(lots = count, "批次数量已回写");
        Ok(count)
    }

    fn update_requirement(&mut self, requirement: &Requirement) -> RepositoryResult<()> {
        let stored = query_requirement(&self.tx, requirement.id)?;
        if requirement.fulfilled_quantity < stored.fulfilled_quantity {
            return Err(RepositoryError::FieldValueError {
                field: "requirement.fulfilled_quantity".to_string(),
                message: format!(
                    "已分配数量不能回退: {} -> {}",
                    stored.fulfilled_quantity, requirement.fulfilled_quantity
                ),
            });
        }

        self.tx.execute(
            "UPDATE requirement SET fulfilled_quantity = ?1 WHERE id = ?2",
            params![requirement.fulfilled_quantity, requirement.id.0],
        )?;
        Ok(())
    }

    fn task(&mut self, task_id: TaskId) -> RepositoryResult<Task> {
        query_task(&self.tx, task_id)
    }

    fn update_task_status(&mut self, task_id: TaskId, status: TaskStatus) -> RepositoryResult<()> {
        let rows = self.tx.execute(
            "UPDATE task SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status.as_str(), task_id.0],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("task", task_id));
        }
        Ok(())
    }

    fn append_log(&mut self, entry: &AllocationLogEntry) -> RepositoryResult<()> {
        self.tx.execute(
            r#"
            INSERT INTO allocation_log (
                log_id, run_id, task_id, action_type, payload_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                entry.log_id,
                entry.run_id,
                entry.task_id.0,
                entry.action_type.as_str(),
                entry.payload_json.as_ref().map(|v| v.to_string()),
                entry.created_at,
            ],
        )?;
        Ok(())
    }
}
