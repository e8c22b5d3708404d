// ==========================================
// 库存分配系统 - 引擎层
// ==========================================
// 职责: 分配算法与任务编排, 不拼 SQL
// 红线: 所有读后写都在 UnitOfWork 内完成
// ==========================================

pub mod allocation;
pub mod error;
pub mod orchestrator;

// 重导出核心引擎
pub use allocation::{
    allocate_batch_in, allocate_in, can_fully_allocate_all, eligible_parts,
    is_fully_allocatable, total_available_stock, total_available_stock_batch, AllocationEngine,
    AllocationOptions,
};
pub use error::{AllocationError, AllocationResult};
pub use orchestrator::{TaskAllocation, TaskListReport, TaskOrchestrator};
