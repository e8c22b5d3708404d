// ==========================================
// 库存分配系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 按任务计划需求扣减仓库库存, 支持替代备件
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 分配算法与任务编排
pub mod engine;

// 配置层 - 分配策略
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AllocationActionType, LotId, PartId, RequirementId, TaskId, TaskStatus, WarehouseId,
};

// 领域实体
pub use domain::{
    AllocationLogEntry, AllocationOutcome, BatchReport, Part, Requirement, Shortfall, StockLot,
    Task, Warehouse,
};

// 仓储
pub use repository::{
    AllocationLogRepository, CatalogRepository, MemoryStockLedger, RepositoryError,
    SqliteStockLedger, StockLedger,
};

// 引擎
pub use engine::{
    AllocationEngine, AllocationError, AllocationOptions, TaskListReport, TaskOrchestrator,
};

// 配置
pub use config::{AllocationPolicy, ConfigManager};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "库存分配系统";
