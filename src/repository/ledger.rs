// ==========================================
// 库存分配系统 - 分配引擎仓储契约
// ==========================================
// 职责: 定义分配引擎/编排器依赖的最小数据访问接口
// 实现者: SqliteStockLedger (rusqlite), MemoryStockLedger (内存, 测试用)
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::{
    AllocationLogEntry, PartId, Requirement, RequirementId, StockLot, Task, TaskId, TaskStatus,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use std::collections::BTreeSet;

// ==========================================
// StockReader - 只读投影 (不加锁)
// ==========================================
// 结果与后续加锁分配不具备原子性: 两次调用之间库存可能被并发事务消耗
pub trait StockReader {
    /// 备件的替代备件 (只查正向声明的关系, 升序去重)
    fn substitutes_of(&self, part_id: PartId) -> RepositoryResult<Vec<PartId>>;

    /// 给定备件集合下所有 quantity > 0 批次的数量合计
    fn available_quantity(&self, part_ids: &BTreeSet<PartId>) -> RepositoryResult<u64>;
}

// ==========================================
// UnitOfWork - 事务内操作
// ==========================================
// 所有"读后要写"的记录必须经由 locked_* 读取;
// 加锁顺序: 需求 -> 本备件批次 -> 替代备件批次, 批次按 id 升序
pub trait UnitOfWork: StockReader {
    /// 读取单条需求 (加锁, 事务内最新值)
    fn locked_requirement(&mut self, requirement_id: RequirementId)
        -> RepositoryResult<Requirement>;

    /// 读取任务下尚未满足的需求 (加锁, 按 id 升序)
    fn locked_requirements_for_task(&mut self, task_id: TaskId)
        -> RepositoryResult<Vec<Requirement>>;

    /// 读取备件集合下 quantity > 0 的批次 (加锁, 按批次 id 升序)
    fn locked_stock_lots_for_parts(&mut self, part_ids: &[PartId])
        -> RepositoryResult<Vec<StockLot>>;

    /// 批量回写批次数量, 返回更新条数
    fn bulk_update_lots(&mut self, lots: &[StockLot]) -> RepositoryResult<usize>;

    /// 回写需求的已分配数量
    ///
    /// 已分配数量只增不减: 小于存储值时返回 FieldValueError
    fn update_requirement(&mut self, requirement: &Requirement) -> RepositoryResult<()>;

    /// 读取任务 (事务内最新状态)
    fn task(&mut self, task_id: TaskId) -> RepositoryResult<Task>;

    fn update_task_status(&mut self, task_id: TaskId, status: TaskStatus) -> RepositoryResult<()>;

    fn append_log(&mut self, entry: &AllocationLogEntry) -> RepositoryResult<()>;
}

// ==========================================
// StockLedger - 存储入口
// ==========================================
pub trait StockLedger: StockReader + Send + Sync {
    /// 在一个事务中执行闭包
    ///
    /// 闭包返回 Ok 时提交; 返回 Err (或提交失败) 时整体回滚, 之前状态不变。
    ///
    /// 注意: 闭包内只能通过传入的 `UnitOfWork` 访问数据,
    /// 不要再调用同一个 ledger 上的方法 (会等待自身持有的锁)。
    fn unit_of_work<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<RepositoryError>;

    /// 读取任务下尚未满足的需求 (不加锁, 用于预分类)
    fn unmet_requirements_for_task(&self, task_id: TaskId) -> RepositoryResult<Vec<Requirement>>;

    /// 待分配任务: 状态为 PENDING / IN_PROGRESS, 按期望完成日期升序 (同日按 id)
    fn tasks_for_allocation(&self) -> RepositoryResult<Vec<Task>>;
}
