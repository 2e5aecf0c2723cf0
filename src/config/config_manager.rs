// ==========================================
// 销售预测引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (scope_id='global')
// 非法值回退默认值并记录 warn
// ==========================================

use crate::config::engine_config::DuplicatePolicy;
use crate::config::engine_config_trait::EngineConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::types::{is_valid_doc_cur, DEFAULT_DOC_CUR, DEFAULT_TOLERANCE};
use crate::repository::gateway::RetryPolicy;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

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
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::ensure_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 的配置值（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(key, value, "配置已更新");
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self
            .get_global_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 获取所有 global 配置的快照（JSON，键有序）
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&config_map)?)
    }
}

// ==========================================
// EngineConfigReader 实现
// ==========================================
#[async_trait]
impl EngineConfigReader for ConfigManager {
    async fn get_default_doc_cur(&self) -> Result<String, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::DEFAULT_DOC_CUR, DEFAULT_DOC_CUR)?;
        let value = value.trim().to_string();
        if is_valid_doc_cur(&value) {
            Ok(value)
        } else {
            tracing::warn!(
                config_key = config_keys::DEFAULT_DOC_CUR,
                value = %value,
                "币种配置非法，使用默认值 CLP"
            );
            Ok(DEFAULT_DOC_CUR.to_string())
        }
    }

    async fn get_tolerance(&self) -> Result<f64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::TOLERANCE, "1e-6")?;
        match value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
            _ => {
                tracing::warn!(
                    config_key = config_keys::TOLERANCE,
                    value = %value,
                    "容差配置非法，使用默认值 1e-6"
                );
                Ok(DEFAULT_TOLERANCE)
            }
        }
    }

    async fn get_duplicate_policy(&self) -> Result<DuplicatePolicy, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::DUPLICATE_POLICY, "mean")?;
        Ok(DuplicatePolicy::parse(&value).unwrap_or_else(|| {
            tracing::warn!(
                config_key = config_keys::DUPLICATE_POLICY,
                value = %value,
                "重复键策略非法，使用默认值 mean"
            );
            DuplicatePolicy::default()
        }))
    }

    async fn get_retry_policy(&self) -> Result<RetryPolicy, Box<dyn Error>> {
        let defaults = RetryPolicy::default();
        let max_attempts = self
            .get_config_or_default(config_keys::BUSY_MAX_ATTEMPTS, "5")?
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v >= 1)
            .unwrap_or(defaults.max_attempts);
        let backoff_base_ms = self
            .get_config_or_default(config_keys::BUSY_BACKOFF_MS, "600")?
            .trim()
            .parse::<u64>()
            .unwrap_or(defaults.backoff_base_ms);

        Ok(RetryPolicy {
            max_attempts,
            backoff_base_ms,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    pub const DEFAULT_DOC_CUR: &str = "forecast.default_doc_cur";
    pub const TOLERANCE: &str = "forecast.tolerance";
    pub const DUPLICATE_POLICY: &str = "forecast.duplicate_policy";
    pub const BUSY_MAX_ATTEMPTS: &str = "db.busy_max_attempts";
    pub const BUSY_BACKOFF_MS: &str = "db.busy_backoff_ms";
}
