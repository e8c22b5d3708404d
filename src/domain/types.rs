// ==========================================
// 库存分配系统 - 领域类型定义
// ==========================================
// 职责: 标识符新类型、任务状态机、日志动作类型
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 标识符 (整数主键新类型)
// ==========================================
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// 备件 (Detail) ID
    PartId
);
define_id!(
    /// 仓库 ID
    WarehouseId
);
define_id!(
    /// 库存批次 ID
    LotId
);
define_id!(
    /// 任务 ID
    TaskId
);
define_id!(
    /// 计划需求 (Planned Detail) ID
    RequirementId
);

// ==========================================
// 任务状态 (Task Status)
// ==========================================
// 状态只由编排器推进, 分配引擎从不直接修改
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,    // 待处理
    InProgress, // 进行中 (已尝试分配)
    Review,     // 人工复核
    Completed,  // 已完成 (终态)
}

impl TaskStatus {
    /// 是否允许从 self 转换到 `to`
    ///
    /// 相同状态视为无操作, 总是允许; Completed 为终态。
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Review)
                | (Review, InProgress)
                | (Review, Completed)
        )
    }

    /// 是否为终态
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// 是否参与批量分配 (管理命令的选取口径)
    pub fn is_open_for_allocation(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Review => "REVIEW",
            TaskStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "PENDING" => Ok(TaskStatus::Pending),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "REVIEW" => Ok(TaskStatus::Review),
            "COMPLETED" => Ok(TaskStatus::Completed),
            other => Err(format!("未知任务状态: {}", other)),
        }
    }
}

// ==========================================
// 分配日志动作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationActionType {
    TaskAllocated, // 已分配 (部分满足, 保持进行中)
    TaskCompleted, // 已分配且置为完成
    TaskSkipped,   // 跳过 (终态任务)
}

impl AllocationActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationActionType::TaskAllocated => "TASK_ALLOCATED",
            AllocationActionType::TaskCompleted => "TASK_COMPLETED",
            AllocationActionType::TaskSkipped => "TASK_SKIPPED",
        }
    }
}

impl fmt::Display for AllocationActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AllocationActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "TASK_ALLOCATED" => Ok(AllocationActionType::TaskAllocated),
            "TASK_COMPLETED" => Ok(AllocationActionType::TaskCompleted),
            "TASK_SKIPPED" => Ok(AllocationActionType::TaskSkipped),
            other => Err(format!("未知日志动作类型: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_machine() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Review.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::InProgress));

        // 不能跳过 InProgress, 也不能从终态回退
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::Completed.is_terminal());
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<TaskStatus>().is_err());
    }
}
