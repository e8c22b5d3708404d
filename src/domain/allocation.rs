// ==========================================
// 库存分配系统 - 分配结果领域模型
// ==========================================
// 用途: 分配引擎输出, 编排器汇总, 写入分配日志
// ==========================================

use crate::domain::types::{LotId, PartId, RequirementId, TaskId, WarehouseId};
use serde::{Deserialize, Serialize};

// ==========================================
// DrawSource - 扣减来源
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrawSource {
    Own,        // 需求本身的备件
    Substitute, // 替代备件
}

// ==========================================
// LotDraw - 单个批次的扣减记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    pub lot_id: LotId,
    pub part_id: PartId,
    pub warehouse_id: WarehouseId,
    pub taken: u32,
    pub source: DrawSource,
}

// ==========================================
// AllocationOutcome - 单条需求的分配结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub requirement_id: RequirementId,
    pub task_id: TaskId,
    pub part_id: PartId,
    pub planned_quantity: u32,
    pub fulfilled_before: u32,
    pub fulfilled_after: u32,
    pub draws: Vec<LotDraw>, // 按扣减顺序
}

impl AllocationOutcome {
    /// 本次分配数量
    pub fn allocated(&self) -> u32 {
        self.fulfilled_after.saturating_sub(self.fulfilled_before)
    }

    /// 其中来自替代备件的数量
    pub fn allocated_from_substitutes(&self) -> u32 {
        self.draws
            .iter()
            .filter(|d| d.source == DrawSource::Substitute)
            .map(|d| d.taken)
            .sum()
    }

    pub fn is_full(&self) -> bool {
        self.fulfilled_after >= self.planned_quantity
    }

    /// 缺口 (欠分配数量)
    pub fn shortfall(&self) -> u32 {
        self.planned_quantity.saturating_sub(self.fulfilled_after)
    }

    /// 是否超分配 (仅上游脏数据可能出现)
    pub fn is_over_allocated(&self) -> bool {
        self.fulfilled_after > self.planned_quantity
    }
}

// ==========================================
// Shortfall - 欠分配条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub requirement_id: RequirementId,
    pub part_id: PartId,
    pub missing: u32,
}

// ==========================================
// BatchReport - 批量分配报告
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<AllocationOutcome>,
}

impl BatchReport {
    pub fn total_allocated(&self) -> u64 {
        self.outcomes.iter().map(|o| o.allocated() as u64).sum()
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.outcomes.iter().all(AllocationOutcome::is_full)
    }

    /// 欠分配的需求列表
    pub fn under_allocated(&self) -> Vec<Shortfall> {
        self.outcomes
            .iter()
            .filter(|o| o.shortfall() > 0)
            .map(|o| Shortfall {
                requirement_id: o.requirement_id,
                part_id: o.part_id,
                missing: o.shortfall(),
            })
            .collect()
    }

    /// 超分配的需求列表
    pub fn over_allocated(&self) -> Vec<RequirementId> {
        self.outcomes
            .iter()
            .filter(|o| o.is_over_allocated())
            .map(|o| o.requirement_id)
            .collect()
    }

    /// 所有被扣减的批次数量
    pub fn touched_lots(&self) -> usize {
        self.outcomes.iter().map(|o| o.draws.len()).sum()
    }
}
