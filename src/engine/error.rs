// ==========================================
// 库存分配系统 - 引擎层错误类型
// ==========================================

use crate::domain::{PartId, RequirementId, TaskId, TaskStatus};
use crate::repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllocationError {
    /// 仅在 fail_if_insufficient 时产生; 所在事务整体回滚
    #[error(
        "库存不足: requirement_id={requirement_id}, part_id={part_id}, \
         required={required}, available={available}"
    )]
    InsufficientStock {
        requirement_id: RequirementId,
        part_id: PartId,
        required: u32,
        available: u32,
    },

    #[error("无效的任务状态转换: task_id={task_id} from={from} to={to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// 存储层错误 (含锁等待超时), 引擎不做重试
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type AllocationResult<T> = Result<T, AllocationError>;
