// ==========================================
// 库存分配系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout, 并发分配时等待对方事务结束而不是立即失败
// - 建表语句集中在此处 (幂等)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建表 (幂等)
///
/// 表:
/// - part / part_substitute: 备件与正向替代关系
/// - warehouse / stock_lot: 仓库与库存批次
/// - task / requirement: 任务与计划需求
/// - config_kv: 配置
/// - allocation_log: 分配日志
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS part (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            unit_of_measurement TEXT NOT NULL,
            unit_price REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- 正向替代关系: part_id 可以用 substitute_id 的库存
        CREATE TABLE IF NOT EXISTS part_substitute (
            part_id INTEGER NOT NULL REFERENCES part(id) ON DELETE CASCADE,
            substitute_id INTEGER NOT NULL REFERENCES part(id) ON DELETE CASCADE,
            PRIMARY KEY (part_id, substitute_id)
        );

        CREATE TABLE IF NOT EXISTS warehouse (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            phone TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS stock_lot (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            part_id INTEGER NOT NULL REFERENCES part(id) ON DELETE CASCADE,
            warehouse_id INTEGER NOT NULL REFERENCES warehouse(id) ON DELETE CASCADE,
            quantity INTEGER NOT NULL DEFAULT 0 CHECK (quantity >= 0)
        );

        CREATE INDEX IF NOT EXISTS idx_stock_lot_part ON stock_lot(part_id, quantity);

        CREATE TABLE IF NOT EXISTS task (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            expected_date TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_task_status_date ON task(status, expected_date);

        CREATE TABLE IF NOT EXISTS requirement (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL REFERENCES task(id) ON DELETE CASCADE,
            part_id INTEGER NOT NULL REFERENCES part(id) ON DELETE CASCADE,
            planned_quantity INTEGER NOT NULL DEFAULT 0 CHECK (planned_quantity >= 0),
            fulfilled_quantity INTEGER NOT NULL DEFAULT 0
                CHECK (fulfilled_quantity >= 0 AND fulfilled_quantity <= planned_quantity)
        );

        CREATE INDEX IF NOT EXISTS idx_requirement_task ON requirement(task_id);

        CREATE TABLE IF NOT EXISTS allocation_log (
            log_id TEXT PRIMARY KEY,
            run_id TEXT,
            task_id INTEGER NOT NULL REFERENCES task(id) ON DELETE CASCADE,
            action_type TEXT NOT NULL,
            payload_json TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_allocation_log_task ON allocation_log(task_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_allocation_log_run ON allocation_log(run_id)
            WHERE run_id IS NOT NULL;
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

// ==========================================
// 默认数据库路径
// ==========================================

/// 显式指定数据库路径的环境变量
pub const DB_PATH_ENV: &str = "STOCK_ALLOCATOR_DB_PATH";

/// 解析数据库路径
///
/// 优先级: 显式参数 > 环境变量 STOCK_ALLOCATOR_DB_PATH > 用户数据目录
pub fn resolve_db_path(explicit: Option<&str>) -> String {
    if let Some(path) = explicit.map(str::trim).filter(|p| !p.is_empty()) {
        return path.to_string();
    }

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    default_db_path()
}

/// 用户数据目录/stock-allocator/stock_allocator.db, 取不到数据目录时使用当前目录
pub fn default_db_path() -> String {
    let mut path = PathBuf::from("./stock_allocator.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("stock-allocator");
        // 目录创建失败时, 后续打开连接会给出明确错误
        std::fs::create_dir_all(&dir).ok();
        path = dir.join("stock_allocator.db");
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), None);

        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        assert_eq!(
            read_schema_version(&conn).unwrap(),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_fulfilled_cannot_exceed_planned_at_storage_level() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        conn.execute_batch(
            r#"
            INSERT INTO part (id, name, unit_of_measurement) VALUES (1, 'bolt', 'pcs');
            INSERT INTO task (id, description, expected_date) VALUES (1, 't', '2030-01-01');
            INSERT INTO requirement (id, task_id, part_id, planned_quantity) VALUES (1, 1, 1, 5);
            "#,
        )
        .unwrap();

        let result = conn.execute(
            "UPDATE requirement SET fulfilled_quantity = 6 WHERE id = 1",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_db_path_wins() {
        assert_eq!(resolve_db_path(Some(" /tmp/a.db ")), "/tmp/a.db");
        assert!(!resolve_db_path(Some("  ")).is_empty());
    }
}
