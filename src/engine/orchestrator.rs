// ==========================================
// 库存分配系统 - 任务分配编排器
// ==========================================
// 用途: 以任务为单位驱动分配引擎, 推进任务状态, 记录分配日志
// 流程 (单任务, 一个事务):
//   1. 读取任务最新状态, 已完成则跳过
//   2. 加锁读取未满足需求
//   3. 状态推进为 IN_PROGRESS
//   4. 预判能否全额满足 (快照)
//   5. 批量分配 (不足不报错)
//   6. 预判为可满足则推进为 COMPLETED
//   7. 写入分配日志
// ==========================================

use crate::config::AllocationPolicy;
use crate::domain::{
    AllocationActionType, AllocationLogEntry, BatchReport, Task, TaskId, TaskStatus,
};
use crate::engine::allocation::{allocate_batch_in, can_fully_allocate_all, AllocationOptions};
use crate::engine::error::{AllocationError, AllocationResult};
use crate::repository::{StockLedger, UnitOfWork};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ==========================================
// TaskAllocation - 单任务分配结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskAllocation {
    pub task_id: TaskId,
    pub status_before: TaskStatus,
    pub status_after: TaskStatus,
    /// 分配前快照判断: 全部需求均可满足
    pub fully_satisfiable: bool,
    /// 任务已完成, 未做任何分配
    pub skipped: bool,
    pub report: BatchReport,
}

impl TaskAllocation {
    fn skipped_task(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            status_before: status,
            status_after: status,
            fully_satisfiable: false,
            skipped: true,
            report: BatchReport::default(),
        }
    }

    pub fn is_completed(&self) -> bool {
        !self.skipped && self.status_after == TaskStatus::Completed
    }
}

// ==========================================
// TaskListReport - 批量任务分配报告
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskListReport {
    pub run_id: String,
    /// 按实际处理顺序: 先"可全额满足"组, 再其余任务, 最后跳过的任务
    pub allocations: Vec<TaskAllocation>,
}

impl TaskListReport {
    pub fn completed(&self) -> Vec<TaskId> {
        self.allocations
            .iter()
            .filter(|a| a.is_completed())
            .map(|a| a.task_id)
            .collect()
    }

    /// 已处理但仍未完成的任务
    pub fn in_progress(&self) -> Vec<TaskId> {
        self.allocations
            .iter()
            .filter(|a| !a.skipped && a.status_after != TaskStatus::Completed)
            .map(|a| a.task_id)
            .collect()
    }

    pub fn skipped(&self) -> Vec<TaskId> {
        self.allocations
            .iter()
            .filter(|a| a.skipped)
            .map(|a| a.task_id)
            .collect()
    }

    pub fn total_allocated(&self) -> u64 {
        self.allocations
            .iter()
            .map(|a| a.report.total_allocated())
            .sum()
    }
}

// ==========================================
// TaskOrchestrator - 任务分配编排器
// ==========================================
pub struct TaskOrchestrator<S>
where
    S: StockLedger,
{
    ledger: Arc<S>,
    policy: AllocationPolicy,
}

impl<S> TaskOrchestrator<S>
where
    S: StockLedger,
{
    pub fn new(ledger: Arc<S>, policy: AllocationPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn with_default_policy(ledger: Arc<S>) -> Self {
        Self::new(ledger, AllocationPolicy::default())
    }

    pub fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }

    /// 编排器始终不因库存不足报错: 能分多少分多少
    fn options(&self) -> AllocationOptions {
        AllocationOptions::from(&self.policy).with_fail_if_insufficient(false)
    }

    /// 为单个任务分配库存 (独立事务)
    ///
    /// 提交后把最终状态回写到 `task`; 出错时 `task` 与存储均保持原值。
    pub fn allocate_task(&self, task: &mut Task) -> AllocationResult<TaskAllocation> {
        let allocation = self
            .ledger
            .unit_of_work(|uow| self.allocate_task_in(uow, task.id, None, None))?;
        task.status = allocation.status_after;
        Ok(allocation)
    }

    /// 批量为任务分配库存
    ///
    /// 先以只读快照把任务分为"可全额满足"与其余两组, 再依次处理:
    /// 可全额满足组优先, 组内保持输入顺序。每个任务一个事务,
    /// 中途出错时已处理任务的结果保留。
    pub fn allocate_task_list(&self, tasks: &mut [Task]) -> AllocationResult<TaskListReport> {
        let run_id = Uuid::new_v4().to_string();
        info!(run_id = %run_id, tasks = tasks.len(), "开始批量任务分配");

        // ==========================================
        // 步骤1: 预分类 (只读, 不加锁)
        // ==========================================
        let mut full_group = Vec::new();
        let mut partial_group = Vec::new();
        let mut skipped = Vec::new();

        for (index, task) in tasks.iter().enumerate() {
            if task.status.is_terminal() {
                skipped.push(index);
                continue;
            }
            let requirements = self.ledger.unmet_requirements_for_task(task.id)?;
            if can_fully_allocate_all(self.ledger.as_ref(), &requirements)? {
                full_group.push(index);
            } else {
                partial_group.push(index);
            }
        }

        info!(
            run_id = %run_id,
            full_count = full_group.len(),
            partial_count = partial_group.len(),
            skipped_count = skipped.len(),
            "任务预分类完成"
        );

        // ==========================================
        // 步骤2: 依次分配 (可全额满足组优先)
        // ==========================================
        let mut allocations = Vec::with_capacity(tasks.len());
        let ordered = full_group
            .iter()
            .map(|index| (*index, true))
            .chain(partial_group.iter().map(|index| (*index, false)));

        for (index, fully_satisfiable) in ordered {
            let task_id = tasks[index].id;
            let allocation = self.ledger.unit_of_work(|uow| {
                self.allocate_task_in(
                    uow,
                    task_id,
                    Some(fully_satisfiable),
                    Some(run_id.as_str()),
                )
            })?;
            tasks[index].status = allocation.status_after;
            allocations.push(allocation);
        }

        for index in skipped {
            allocations.push(TaskAllocation::skipped_task(tasks[index].id, tasks[index].status));
        }

        let report = TaskListReport {
            run_id,
            allocations,
        };
        info!(
            run_id = %report.run_id,
            completed = report.completed().len(),
            in_progress = report.in_progress().len(),
            skipped = report.skipped().len(),
            allocated = report.total_allocated(),
            "批量任务分配完成"
        );
        Ok(report)
    }

    /// 管理命令入口: 所有待分配任务按期望完成日期升序处理
    pub fn allocate_open_tasks(&self) -> AllocationResult<TaskListReport> {
        let mut tasks = self.ledger.tasks_for_allocation()?;
        self.allocate_task_list(&mut tasks)
    }

    // ==========================================
    // 事务内流程
    // ==========================================

    /// `classified` 为预分类结果; 为 None 时在事务内按快照重新判断
    fn allocate_task_in(
        &self,
        uow: &mut dyn UnitOfWork,
        task_id: TaskId,
        classified: Option<bool>,
        run_id: Option<&str>,
    ) -> AllocationResult<TaskAllocation> {
        let current = uow.task(task_id)?;
        if current.status.is_terminal() {
            warn!(task_id = %task_id, status = %current.status, "任务已完成, 跳过分配");
            self.append_log(
                uow,
                run_id,
                task_id,
                AllocationActionType::TaskSkipped,
                json!({ "status": current.status }),
            )?;
            return Ok(TaskAllocation::skipped_task(task_id, current.status));
        }

        let mut requirements = uow.locked_requirements_for_task(task_id)?;
        transition(uow, task_id, current.status, TaskStatus::InProgress)?;

        let fully_satisfiable = match classified {
            Some(value) => value,
            None => can_fully_allocate_all(&*uow, &requirements)?,
        };
        debug!(
            task_id = %task_id,
            requirements = requirements.len(),
            fully_satisfiable,
            "任务需求已加锁"
        );

        let report = allocate_batch_in(uow, &mut requirements, self.options())?;

        let status_after = if fully_satisfiable {
            transition(uow, task_id, TaskStatus::InProgress, TaskStatus::Completed)?;
            TaskStatus::Completed
        } else {
            TaskStatus::InProgress
        };

        let action = if status_after == TaskStatus::Completed {
            AllocationActionType::TaskCompleted
        } else {
            AllocationActionType::TaskAllocated
        };
        self.append_log(
            uow,
            run_id,
            task_id,
            action,
            json!({
                "status_before": current.status,
                "status_after": status_after,
                "fully_satisfiable": fully_satisfiable,
                "allocated": report.total_allocated(),
                "shortfalls": report.under_allocated(),
                "outcomes": report.outcomes,
                "policy": self.policy,
            }),
        )?;

        info!(
            task_id = %task_id,
            status_before = %current.status,
            status_after = %status_after,
            allocated = report.total_allocated(),
            shortfalls = report.under_allocated().len(),
            "任务分配完成"
        );

        Ok(TaskAllocation {
            task_id,
            status_before: current.status,
            status_after,
            fully_satisfiable,
            skipped: false,
            report,
        })
    }

    fn append_log(
        &self,
        uow: &mut dyn UnitOfWork,
        run_id: Option<&str>,
        task_id: TaskId,
        action: AllocationActionType,
        payload: serde_json::Value,
    ) -> AllocationResult<()> {
        if !self.policy.log_enabled {
            return Ok(());
        }
        let entry = AllocationLogEntry::new(
            run_id.map(str::to_string),
            task_id,
            action,
            Some(payload),
        );
        uow.append_log(&entry)?;
        Ok(())
    }
}

/// 校验并写入状态迁移; 状态未变化时不写库
fn transition(
    uow: &mut dyn UnitOfWork,
    task_id: TaskId,
    from: TaskStatus,
    to: TaskStatus,
) -> AllocationResult<()> {
    if !from.can_transition_to(to) {
        return Err(AllocationError::InvalidTransition { task_id, from, to });
    }
    if from != to {
        uow.update_task_status(task_id, to)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStockLedger;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    fn orchestrator(ledger: &Arc<MemoryStockLedger>) -> TaskOrchestrator<MemoryStockLedger> {
        TaskOrchestrator::with_default_policy(ledger.clone())
    }

    #[test]
    fn test_allocate_task_completes_when_satisfiable() {
        let ledger = Arc::new(MemoryStockLedger::new());
        let a = ledger.add_part("A");
        let wh = ledger.add_warehouse("W1");
        ledger.add_lot(a, wh, 10);
        let task_id = ledger.add_task("T1", day(1));
        let req_id = ledger.add_requirement(task_id, a, 6);

        let mut task = ledger.task(task_id).unwrap();
        let result = orchestrator(&ledger).allocate_task(&mut task).unwrap();

        assert!(result.is_completed());
        assert_eq!(result.status_before, TaskStatus::Pending);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(ledger.task(task_id).unwrap().status, TaskStatus::Completed);
        assert_eq!(ledger.requirement(req_id).unwrap().fulfilled_quantity, 6);

        let logs = ledger.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action_type, AllocationActionType::TaskCompleted);
        assert!(logs[0].run_id.is_none());
    }

    #[test]
    fn test_allocate_task_partial_stays_in_progress() {
        let ledger = Arc::new(MemoryStockLedger::new());
        let a = ledger.add_part("A");
        let wh = ledger.add_warehouse("W1");
        ledger.add_lot(a, wh, 3);
        let task_id = ledger.add_task("T1", day(1));
        let req_id = ledger.add_requirement(task_id, a, 5);

        let mut task = ledger.task(task_id).unwrap();
        let result = orchestrator(&ledger).allocate_task(&mut task).unwrap();

        assert!(!result.fully_satisfiable);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(ledger.requirement(req_id).unwrap().fulfilled_quantity, 3);
        assert_eq!(result.report.under_allocated()[0].missing, 2);
        assert_eq!(ledger.logs()[0].action_type, AllocationActionType::TaskAllocated);
    }

    #[test]
    fn test_completed_task_is_skipped() {
        let ledger = Arc::new(MemoryStockLedger::new());
        let a = ledger.add_part("A");
        let wh = ledger.add_warehouse("W1");
        let lot = ledger.add_lot(a, wh, 3);
        let task_id = ledger.add_task_with_status("T1", day(1), TaskStatus::Completed);
        ledger.add_requirement(task_id, a, 3);

        let mut task = ledger.task(task_id).unwrap();
        let result = orchestrator(&ledger).allocate_task(&mut task).unwrap();

        assert!(result.skipped);
        assert!(!result.is_completed());
        assert_eq!(ledger.lot(lot).unwrap().quantity, 3);
        assert_eq!(ledger.logs()[0].action_type, AllocationActionType::TaskSkipped);
    }

    #[test]
    fn test_review_task_moves_back_to_in_progress() {
        let ledger = Arc::new(MemoryStockLedger::new());
        let a = ledger.add_part("A");
        let task_id = ledger.add_task_with_status("T1", day(1), TaskStatus::Review);
        ledger.add_requirement(task_id, a, 1);

        let mut task = ledger.task(task_id).unwrap();
        orchestrator(&ledger).allocate_task(&mut task).unwrap();

        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_task_without_requirements_completes() {
        let ledger = Arc::new(MemoryStockLedger::new());
        let task_id = ledger.add_task("empty", day(1));

        let mut task = ledger.task(task_id).unwrap();
        let result = orchestrator(&ledger).allocate_task(&mut task).unwrap();

        assert!(result.is_completed());
        assert!(result.report.outcomes.is_empty());
    }

    #[test]
    fn test_task_list_prefers_fully_satisfiable_tasks() {
        let ledger = Arc::new(MemoryStockLedger::new());
        let a = ledger.add_part("A");
        let wh = ledger.add_warehouse("W1");
        ledger.add_lot(a, wh, 5);
        // T1 日期更早但不可全额满足, T2 可以
        let t1 = ledger.add_task("T1", day(1));
        let t2 = ledger.add_task("T2", day(2));
        let r1 = ledger.add_requirement(t1, a, 8);
        let r2 = ledger.add_requirement(t2, a, 5);

        let report = orchestrator(&ledger).allocate_open_tasks().unwrap();

        assert_eq!(report.allocations[0].task_id, t2);
        assert_eq!(report.completed(), vec![t2]);
        assert_eq!(report.in_progress(), vec![t1]);
        assert_eq!(ledger.requirement(r2).unwrap().fulfilled_quantity, 5);
        assert_eq!(ledger.requirement(r1).unwrap().fulfilled_quantity, 0);
        assert_eq!(ledger.task(t1).unwrap().status, TaskStatus::InProgress);

        let logs = ledger.logs();
        assert_eq!(logs.len(), 2);
        assert!(logs
            .iter()
            .all(|l| l.run_id.as_deref() == Some(report.run_id.as_str())));
    }

    #[test]
    fn test_task_list_classification_is_a_snapshot() {
        let ledger = Arc::new(MemoryStockLedger::new());
        let a = ledger.add_part("A");
        let wh = ledger.add_warehouse("W1");
        ledger.add_lot(a, wh, 5);
        let t1 = ledger.add_task("T1", day(1));
        let t2 = ledger.add_task("T2", day(2));
        let r1 = ledger.add_requirement(t1, a, 5);
        let r2 = ledger.add_requirement(t2, a, 5);

        let mut tasks = vec![ledger.task(t1).unwrap(), ledger.task(t2).unwrap()];
        let report = orchestrator(&ledger).allocate_task_list(&mut tasks).unwrap();

        // 两个任务都被预判为可满足; 第二个实际没分到库存, 仍被标记为完成
        assert_eq!(report.completed(), vec![t1, t2]);
        assert_eq!(ledger.requirement(r1).unwrap().fulfilled_quantity, 5);
        assert_eq!(ledger.requirement(r2).unwrap().fulfilled_quantity, 0);
        assert_eq!(tasks[1].status, TaskStatus::Completed);
    }

    #[test]
    fn test_task_list_skips_completed_tasks() {
        let ledger = Arc::new(MemoryStockLedger::new());
        let a = ledger.add_part("A");
        let wh = ledger.add_warehouse("W1");
        let lot = ledger.add_lot(a, wh, 5);
        let done = ledger.add_task_with_status("done", day(1), TaskStatus::Completed);
        ledger.add_requirement(done, a, 5);

        let mut tasks = vec![ledger.task(done).unwrap()];
        let report = orchestrator(&ledger).allocate_task_list(&mut tasks).unwrap();

        assert_eq!(report.skipped(), vec![done]);
        assert_eq!(ledger.lot(lot).unwrap().quantity, 5);
        assert!(ledger.logs().is_empty());
    }

    #[test]
    fn test_log_disabled_by_policy() {
        let ledger = Arc::new(MemoryStockLedger::new());
        let task_id = ledger.add_task("T1", day(1));
        let policy = AllocationPolicy {
            log_enabled: false,
            ..AllocationPolicy::default()
        };

        let mut task = ledger.task(task_id).unwrap();
        TaskOrchestrator::new(ledger.clone(), policy)
            .allocate_task(&mut task)
            .unwrap();

        assert!(ledger.logs().is_empty());
    }

    #[test]
    fn test_transition_rejects_backwards_move() {
        let ledger = Arc::new(MemoryStockLedger::new());
        let task_id = ledger.add_task_with_status("T1", day(1), TaskStatus::InProgress);

        let result: AllocationResult<()> = ledger.unit_of_work(|uow| {
            transition(uow, task_id, TaskStatus::InProgress, TaskStatus::Pending)
        });

        assert!(matches!(
            result,
            Err(AllocationError::InvalidTransition { .. })
        ));
        assert_eq!(ledger.task(task_id).unwrap().status, TaskStatus::InProgress);
    }
}
