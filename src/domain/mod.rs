// ==========================================
// 库存分配系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod allocation;
pub mod allocation_log;
pub mod part;
pub mod task;
pub mod types;

// 重导出核心类型
pub use allocation::{AllocationOutcome, BatchReport, DrawSource, LotDraw, Shortfall};
pub use allocation_log::AllocationLogEntry;
pub use part::{Part, StockLot, Warehouse};
pub use task::{Requirement, Task};
pub use types::{
    AllocationActionType, LotId, PartId, RequirementId, TaskId, TaskStatus, WarehouseId,
};
