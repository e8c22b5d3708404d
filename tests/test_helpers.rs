// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库初始化、测试主数据准备
// ==========================================

#![allow(dead_code)]

use chrono::NaiveDate;
use rusqlite::Connection;
use std::error::Error;
use std::sync::{Arc, Mutex};
use stock_allocator::db::{ensure_schema, open_sqlite_connection};
use stock_allocator::domain::{PartId, TaskId, TaskStatus, WarehouseId};
use stock_allocator::repository::CatalogRepository;
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    let conn = open_sqlite_connection(&db_path)?;
    ensure_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开测试数据库连接 (应用统一 PRAGMA)
pub fn open_test_connection(db_path: &str) -> Result<Arc<Mutex<Connection>>, Box<dyn Error>> {
    Ok(Arc::new(Mutex::new(open_sqlite_connection(db_path)?)))
}

pub fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap()
}

// ==========================================
// 测试数据构建器
// ==========================================

/// 基于 CatalogRepository 的主数据构建器
pub struct Seeder {
    pub catalog: CatalogRepository,
    warehouses: u32,
}

impl Seeder {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            catalog: CatalogRepository::from_connection(conn),
            warehouses: 0,
        }
    }

    pub fn part(&self, name: &str) -> PartId {
        self.catalog.insert_part(name, "pcs", 1.5).unwrap()
    }

    pub fn warehouse(&mut self) -> WarehouseId {
        self.warehouses += 1;
        let n = self.warehouses;
        self.catalog
            .insert_warehouse(
                &format!("W{}", n),
                &format!("{} Dock Road", n),
                &format!("555-000{}", n),
                &format!("w{}@example.com", n),
            )
            .unwrap()
    }

    pub fn task(&self, description: &str, month: u32, day: u32) -> TaskId {
        self.catalog
            .insert_task(description, TaskStatus::Pending, date(month, day))
            .unwrap()
    }
}
