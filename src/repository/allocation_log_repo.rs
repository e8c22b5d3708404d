// ==========================================
// 库存分配系统 - 分配日志仓储 (只读)
// ==========================================
// 写入经由 UnitOfWork::append_log, 与分配同事务提交
// ==========================================

use crate::domain::{AllocationLogEntry, TaskId};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::rows::{map_log, LOG_COLUMNS};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub struct AllocationLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AllocationLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按任务查询, 时间升序
    pub fn find_by_task(&self, task_id: TaskId) -> RepositoryResult<Vec<AllocationLogEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM allocation_log WHERE task_id = ?1 ORDER BY created_at, rowid",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![task_id.0], map_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    /// 按批量运行ID查询, 写入顺序
    pub fn find_by_run(&self, run_id: &str) -> RepositoryResult<Vec<AllocationLogEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM allocation_log WHERE run_id = ?1 ORDER BY rowid",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![run_id], map_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    /// 最近 N 条
    pub fn find_recent(&self, limit: usize) -> RepositoryResult<Vec<AllocationLogEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM allocation_log ORDER BY rowid DESC LIMIT ?1",
            LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![limit as i64], map_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }
}
