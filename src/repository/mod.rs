// ==========================================
// 库存分配系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod allocation_log_repo;
pub mod catalog_repo;
pub mod error;
pub mod ledger;
pub mod memory_ledger;
mod rows;
pub mod sqlite_ledger;

// 重导出核心仓储
pub use allocation_log_repo::AllocationLogRepository;
pub use catalog_repo::CatalogRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use ledger::{StockLedger, StockReader, UnitOfWork};
pub use memory_ledger::MemoryStockLedger;
pub use sqlite_ledger::SqliteStockLedger;
