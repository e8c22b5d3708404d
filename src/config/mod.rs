// ==========================================
// 库存分配系统 - 配置层
// ==========================================
// 职责: 分配策略开关管理
// 存储: config_kv 表
// ==========================================

pub mod config_manager;

// 重导出核心配置管理器
pub use config_manager::{config_keys, parse_bool, AllocationPolicy, ConfigManager};
