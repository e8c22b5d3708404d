// ==========================================
// 库存分配系统 - 分配日志领域模型
// ==========================================
// 用途: 审计追踪, 每次任务分配一条
// 对齐: allocation_log 表
// ==========================================

use crate::domain::types::{AllocationActionType, TaskId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLogEntry {
    pub log_id: String,         // UUID v4
    pub run_id: Option<String>, // 批量运行ID (单任务分配为 None)
    pub task_id: TaskId,
    pub action_type: AllocationActionType,
    pub payload_json: Option<JsonValue>,
    pub created_at: NaiveDateTime,
}

impl AllocationLogEntry {
    pub fn new(
        run_id: Option<String>,
        task_id: TaskId,
        action_type: AllocationActionType,
        payload_json: Option<JsonValue>,
    ) -> Self {
        Self {
            log_id: uuid::Uuid::new_v4().to_string(),
            run_id,
            task_id,
            action_type,
            payload_json,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}
