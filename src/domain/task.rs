// ==========================================
// 库存分配系统 - 任务与计划需求领域模型
// ==========================================

use crate::domain::types::{PartId, RequirementId, TaskId, TaskStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// Task - 任务
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub expected_date: NaiveDate, // 期望完成日期 (管理命令按此升序)
}

// ==========================================
// Requirement - 计划需求 (planned detail)
// ==========================================
// 红线: 0 <= fulfilled_quantity <= planned_quantity
// fulfilled_quantity 只由分配引擎推进, 单调不减
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: RequirementId,
    pub task_id: TaskId,
    pub part_id: PartId,
    pub planned_quantity: u32,
    pub fulfilled_quantity: u32,
}

impl Requirement {
    /// 尚需分配数量
    pub fn remaining(&self) -> u32 {
        self.planned_quantity.saturating_sub(self.fulfilled_quantity)
    }

    pub fn is_fulfilled(&self) -> bool {
        self.remaining() == 0
    }

    /// 记入已分配数量, 超出尚需部分不会被记入
    pub(crate) fn credit(&mut self, quantity: u32) -> u32 {
        let credited = quantity.min(self.remaining());
        self.fulfilled_quantity += credited;
        credited
    }
}
