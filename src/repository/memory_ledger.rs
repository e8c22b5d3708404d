// ==========================================
// 库存分配系统 - 内存库存账本
// ==========================================
// 用途: 单元测试 / 演示, 与 SqliteStockLedger 遵循同一契约
// 事务: 在账本互斥锁内复制一份状态, 闭包成功后整体替换;
//       出错时直接丢弃副本 (即回滚)
// ==========================================

use crate::domain::{
    AllocationLogEntry, LotId, Part, PartId, Requirement, RequirementId, StockLot, Task, TaskId,
    TaskStatus, Warehouse, WarehouseId,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::ledger::{StockLedger, StockReader, UnitOfWork};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    parts: BTreeMap<PartId, Part>,
    substitutes: BTreeMap<PartId, BTreeSet<PartId>>,
    warehouses: BTreeMap<WarehouseId, Warehouse>,
    lots: BTreeMap<LotId, StockLot>,
    tasks: BTreeMap<TaskId, Task>,
    requirements: BTreeMap<RequirementId, Requirement>,
    logs: Vec<AllocationLogEntry>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn substitutes_of(&self, part_id: PartId) -> Vec<PartId> {
        self.substitutes
            .get(&part_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn available_quantity(&self, part_ids: &BTreeSet<PartId>) -> u64 {
        self.lots
            .values()
            .filter(|lot| lot.quantity > 0 && part_ids.contains(&lot.part_id))
            .map(|lot| lot.quantity as u64)
            .sum()
    }

    fn unmet_requirements(&self, task_id: TaskId) -> Vec<Requirement> {
        self.requirements
            .values()
            .filter(|r| r.task_id == task_id && r.fulfilled_quantity < r.planned_quantity)
            .cloned()
            .collect()
    }
}

// ==========================================
// MemoryStockLedger
// ==========================================
#[derive(Debug, Default)]
pub struct MemoryStockLedger {
    state: Mutex<MemoryState>,
}

impl MemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== 上游数据准备 =====

    pub fn add_part(&self, name: &str) -> PartId {
        let mut state = self.state();
        let id = PartId(state.next_id());
        state.parts.insert(
            id,
            Part {
                id,
                name: name.to_string(),
                unit_of_measurement: "pcs".to_string(),
                unit_price: 0.0,
            },
        );
        id
    }

    /// 声明正向替代关系: `part_id` 可以使用 `substitute_id` 的库存
    pub fn add_substitute(&self, part_id: PartId, substitute_id: PartId) {
        self.state()
            .substitutes
            .entry(part_id)
            .or_default()
            .insert(substitute_id);
    }

    /// 双向声明替代关系
    pub fn add_substitute_both_ways(&self, a: PartId, b: PartId) {
        self.add_substitute(a, b);
        self.add_substitute(b, a);
    }

    pub fn add_warehouse(&self, name: &str) -> WarehouseId {
        let mut state = self.state();
        let id = WarehouseId(state.next_id());
        state.warehouses.insert(
            id,
            Warehouse {
                id,
                name: name.to_string(),
                address: String::new(),
                phone: format!("phone-{}", id),
                email: format!("wh{}@example.com", id),
            },
        );
        id
    }

    pub fn add_lot(&self, part_id: PartId, warehouse_id: WarehouseId, quantity: u32) -> LotId {
        let mut state = self.state();
        let id = LotId(state.next_id());
        state.lots.insert(
            id,
            StockLot {
                id,
                part_id,
                warehouse_id,
                quantity,
            },
        );
        id
    }

    pub fn add_task(&self, description: &str, expected_date: NaiveDate) -> TaskId {
        self.add_task_with_status(description, expected_date, TaskStatus::Pending)
    }

    pub fn add_task_with_status(
        &self,
        description: &str,
        expected_date: NaiveDate,
        status: TaskStatus,
    ) -> TaskId {
        let mut state = self.state();
        let id = TaskId(state.next_id());
        state.tasks.insert(
            id,
            Task {
                id,
                description: description.to_string(),
                status,
                expected_date,
            },
        );
        id
    }

    pub fn add_requirement(&self, task_id: TaskId, part_id: PartId, planned: u32) -> RequirementId {
        let mut state = self.state();
        let id = RequirementId(state.next_id());
        state.requirements.insert(
            id,
            Requirement {
                id,
                task_id,
                part_id,
                planned_quantity: planned,
                fulfilled_quantity: 0,
            },
        );
        id
    }

    /// 直接写入已分配数量, 不做任何校验 (模拟上游脏数据)
    pub fn force_fulfilled(&self, id: RequirementId, fulfilled: u32) {
        if let Some(requirement) = self.state().requirements.get_mut(&id) {
            requirement.fulfilled_quantity = fulfilled;
        }
    }

    // ===== 查询 =====

    pub fn lot(&self, id: LotId) -> Option<StockLot> {
        self.state().lots.get(&id).cloned()
    }

    pub fn requirement(&self, id: RequirementId) -> Option<Requirement> {
        self.state().requirements.get(&id).cloned()
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.state().tasks.get(&id).cloned()
    }

    pub fn requirements_for_task(&self, task_id: TaskId) -> Vec<Requirement> {
        self.state()
            .requirements
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    /// 全部批次在库数量合计
    pub fn total_stock(&self) -> u64 {
        self.state().lots.values().map(|l| l.quantity as u64).sum()
    }

    /// 全部需求已分配数量合计
    pub fn total_fulfilled(&self) -> u64 {
        self.state()
            .requirements
            .values()
            .map(|r| r.fulfilled_quantity as u64)
            .sum()
    }

    pub fn logs(&self) -> Vec<AllocationLogEntry> {
        self.state().logs.clone()
    }
}

impl StockReader for MemoryStockLedger {
    fn substitutes_of(&self, part_id: PartId) -> RepositoryResult<Vec<PartId>> {
        Ok(self.state().substitutes_of(part_id))
    }

    fn available_quantity(&self, part_ids: &BTreeSet<PartId>) -> RepositoryResult<u64> {
        Ok(self.state().available_quantity(part_ids))
    }
}

impl StockLedger for MemoryStockLedger {
    fn unit_of_work<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let mut uow = MemoryUnitOfWork {
            state: guard.clone(),
        };
        let value = f(&mut uow)?;

        *guard = uow.state;
        Ok(value)
    }

    fn unmet_requirements_for_task(&self, task_id: TaskId) -> RepositoryResult<Vec<Requirement>> {
        Ok(self.state().unmet_requirements(task_id))
    }

    fn tasks_for_allocation(&self) -> RepositoryResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .state()
            .tasks
            .values()
            .filter(|t| t.status.is_open_for_allocation())
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.expected_date.cmp(&b.expected_date).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }
}

// ==========================================
// MemoryUnitOfWork - 状态副本
// ==========================================
struct MemoryUnitOfWork {
    state: MemoryState,
}

impl StockReader for MemoryUnitOfWork {
    fn substitutes_of(&self, part_id: PartId) -> RepositoryResult<Vec<PartId>> {
        Ok(self.state.substitutes_of(part_id))
    }

    fn available_quantity(&self, part_ids: &BTreeSet<PartId>) -> RepositoryResult<u64> {
        Ok(self.state.available_quantity(part_ids))
    }
}

impl UnitOfWork for MemoryUnitOfWork {
    fn locked_requirement(
        &mut self,
        requirement_id: RequirementId,
    ) -> RepositoryResult<Requirement> {
        self.state
            .requirements
            .get(&requirement_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("requirement", requirement_id))
    }

    fn locked_requirements_for_task(
        &mut self,
        task_id: TaskId,
    ) -> RepositoryResult<Vec<Requirement>> {
        Ok(self.state.unmet_requirements(task_id))
    }

    fn locked_stock_lots_for_parts(
        &mut self,
        part_ids: &[PartId],
    ) -> RepositoryResult<Vec<StockLot>> {
        // BTreeMap 按批次 id 升序
        Ok(self
            .state
            .lots
            .values()
            .filter(|lot| lot.quantity > 0 && part_ids.contains(&lot.part_id))
            .cloned()
            .collect())
    }

    fn bulk_update_lots(&mut self, lots: &[StockLot]) -> RepositoryResult<usize> {
        for lot in lots {
            let stored = self
                .state
                .lots
                .get_mut(&lot.id)
                .ok_or_else(|| RepositoryError::not_found("stock_lot", lot.id))?;
            stored.quantity = lot.quantity;
        }
        Ok(lots.len())
    }

    fn update_requirement(&mut self, requirement: &Requirement) -> RepositoryResult<()> {
        let stored = self
            .state
            .requirements
            .get_mut(&requirement.id)
            .ok_or_else(|| RepositoryError::not_found("requirement", requirement.id))?;
        if requirement.fulfilled_quantity < stored.fulfilled_quantity {
            return Err(RepositoryError::FieldValueError {
                field: "requirement.fulfilled_quantity".to_string(),
                message: format!(
                    "已分配数量不能回退: {} -> {}",
                    stored.fulfilled_quantity, requirement.fulfilled_quantity
                ),
            });
        }
        if requirement.fulfilled_quantity > stored.planned_quantity {
            return Err(RepositoryError::FieldValueError {
                field: "requirement.fulfilled_quantity".to_string(),
                message: format!(
                    "已分配数量 {} 超过计划数量 {}",
                    requirement.fulfilled_quantity, stored.planned_quantity
                ),
            });
        }
        stored.fulfilled_quantity = requirement.fulfilled_quantity;
        Ok(())
    }

    fn task(&mut self, task_id: TaskId) -> RepositoryResult<Task> {
        self.state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("task", task_id))
    }

    fn update_task_status(&mut self, task_id: TaskId, status: TaskStatus) -> RepositoryResult<()> {
        let task = self
            .state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| RepositoryError::not_found("task", task_id))?;
        task.status = status;
        Ok(())
    }

    fn append_log(&mut self, entry: &AllocationLogEntry) -> RepositoryResult<()> {
        self.state.logs.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_of_work_rolls_back_on_error() {
        let ledger = MemoryStockLedger::new();
        let part = ledger.add_part("bolt");
        let wh = ledger.add_warehouse("W1");
        let lot = ledger.add_lot(part, wh, 5);

        let result: Result<(), RepositoryError> = ledger.unit_of_work(|uow| {
            let mut lots = uow.locked_stock_lots_for_parts(&[part])?;
            lots[0].quantity = 0;
            uow.bulk_update_lots(&lots)?;
            Err(RepositoryError::DatabaseTransactionError("boom".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(ledger.lot(lot).unwrap().quantity, 5);
    }

    #[test]
    fn test_unit_of_work_commits_on_success() {
        let ledger = MemoryStockLedger::new();
        let part = ledger.add_part("bolt");
        let wh = ledger.add_warehouse("W1");
        let lot = ledger.add_lot(part, wh, 5);

        let updated: RepositoryResult<usize> = ledger.unit_of_work(|uow| {
            let mut lots = uow.locked_stock_lots_for_parts(&[part])?;
            lots[0].quantity = 2;
            uow.bulk_update_lots(&lots)
        });

        assert_eq!(updated.unwrap(), 1);
        assert_eq!(ledger.lot(lot).unwrap().quantity, 2);
    }

    #[test]
    fn test_locked_lots_skip_empty_and_keep_id_order() {
        let ledger = MemoryStockLedger::new();
        let a = ledger.add_part("a");
        let b = ledger.add_part("b");
        let wh = ledger.add_warehouse("W1");
        let l1 = ledger.add_lot(b, wh, 1);
        let _empty = ledger.add_lot(a, wh, 0);
        let l3 = ledger.add_lot(a, wh, 4);

        let ids: RepositoryResult<Vec<LotId>> = ledger.unit_of_work(|uow| {
            Ok(uow
                .locked_stock_lots_for_parts(&[a, b])?
                .into_iter()
                .map(|l| l.id)
                .collect())
        });

        assert_eq!(ids.unwrap(), vec![l1, l3]);
    }

    #[test]
    fn test_update_requirement_rejects_lower_fulfilled() {
        let ledger = MemoryStockLedger::new();
        let part = ledger.add_part("bolt");
        let task = ledger.add_task("T1", NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        let req_id = ledger.add_requirement(task, part, 10);
        ledger.force_fulfilled(req_id, 6);

        let result: RepositoryResult<()> = ledger.unit_of_work(|uow| {
            let mut req = uow.locked_requirement(req_id)?;
            assert_eq!(req.fulfilled_quantity, 6);
            req.fulfilled_quantity = 4;
            uow.update_requirement(&req)
        });

        assert!(matches!(
            result,
            Err(RepositoryError::FieldValueError { .. })
        ));
        assert_eq!(ledger.requirement(req_id).unwrap().fulfilled_quantity, 6);
    }
}
