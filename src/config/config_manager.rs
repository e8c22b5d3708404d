// ==========================================
// 库存分配系统 - 配置管理器
// ==========================================
// 职责: 分配策略开关的读取与覆写
// 存储: config_kv 表 (key-value + scope), 仅使用 global scope
// ==========================================

use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use crate::repository::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

// ==========================================
// AllocationPolicy - 分配策略
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPolicy {
    pub use_substitutes: bool,
    pub fail_if_insufficient: bool,
    /// 是否写入 allocation_log
    pub log_enabled: bool,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            use_substitutes: true,
            fail_if_insufficient: false,
            log_enabled: true,
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明: 会对传入连接再次应用统一 PRAGMA (幂等)。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            configure_sqlite_connection(&guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值 (已存在则覆盖)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取布尔配置; 缺失或无法识别时使用默认值
    fn get_bool_or_default(&self, key: &str, default: bool) -> RepositoryResult<bool> {
        let value = match self.get_global_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };

        Ok(parse_bool(&value).unwrap_or_else(|| {
            tracing::warn!(
                config_key = key,
                raw_value = %value,
                default,
                "布尔配置格式错误, 使用默认值"
            );
            default
        }))
    }

    /// 读取当前分配策略
    pub fn allocation_policy(&self) -> RepositoryResult<AllocationPolicy> {
        let defaults = AllocationPolicy::default();
        Ok(AllocationPolicy {
            use_substitutes: self
                .get_bool_or_default(config_keys::USE_SUBSTITUTES, defaults.use_substitutes)?,
            fail_if_insufficient: self.get_bool_or_default(
                config_keys::FAIL_IF_INSUFFICIENT,
                defaults.fail_if_insufficient,
            )?,
            log_enabled: self
                .get_bool_or_default(config_keys::LOG_ENABLED, defaults.log_enabled)?,
        })
    }

    /// 获取所有 global 配置的快照 (JSON 格式, 按 key 排序)
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let config_map = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;

        serde_json::to_string(&json!(config_map))
            .map_err(|e| RepositoryError::Other(anyhow::Error::new(e)))
    }
}

/// 识别常见布尔写法 (大小写不敏感)
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    pub const USE_SUBSTITUTES: &str = "allocation/use_substitutes";
    pub const FAIL_IF_INSUFFICIENT: &str = "allocation/fail_if_insufficient";
    pub const LOG_ENABLED: &str = "allocation/log_enabled";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" on "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("No"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_default_policy() {
        let policy = AllocationPolicy::default();
        assert!(policy.use_substitutes);
        assert!(!policy.fail_if_insufficient);
        assert!(policy.log_enabled);
    }
}
