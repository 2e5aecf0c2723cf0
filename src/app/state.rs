// ==========================================
// 销售预测引擎 - 应用状态
// ==========================================
// 职责: 打开数据库、装载配置、创建 API 实例
// ==========================================

use std::sync::Arc;

use crate::api::ForecastApi;
use crate::config::config_manager::ConfigManager;
use crate::config::engine_config_trait::EngineConfigReader;
use crate::config::EngineConfig;
use crate::repository::gateway::StorageGateway;

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "FORECAST_ENGINE_DB";

/// 应用状态
///
/// 同一数据库上的网关、配置管理器与预测 API 共享一条连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 存储网关
    pub gateway: Arc<StorageGateway>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 装载后的引擎配置
    pub engine_config: EngineConfig,

    /// 预测编辑API
    pub forecast_api: Arc<ForecastApi>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径（不存在则创建并建表）
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub async fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let gateway = StorageGateway::open(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;

        // 配置管理器复用网关连接
        let config_manager = Arc::new(
            ConfigManager::from_connection(gateway.connection())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let engine_config = config_manager
            .load_engine_config()
            .await
            .map_err(|e| format!("配置加载失败: {}", e))?;

        let gateway = Arc::new(gateway.with_retry_policy(engine_config.retry));
        let forecast_api = Arc::new(ForecastApi::new(
            Arc::clone(&gateway),
            engine_config.clone(),
        ));

        tracing::info!(
            default_doc_cur = %engine_config.default_doc_cur,
            tolerance = engine_config.tolerance,
            duplicate_policy = engine_config.duplicate_policy.as_str(),
            "AppState初始化完成"
        );

        Ok(Self {
            db_path,
            gateway,
            config_manager,
            engine_config,
            forecast_api,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 FORECAST_ENGINE_DB > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./forecast.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("forecast-engine");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("forecast.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_keys;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[tokio::test]
    async fn test_app_state_loads_persisted_config() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("forecast.db").to_string_lossy().to_string();

        {
            let manager = ConfigManager::new(&db_path).unwrap();
            manager
                .set_global_config_value(config_keys::DUPLICATE_POLICY, "sum")
                .unwrap();
            manager
                .set_global_config_value(config_keys::BUSY_MAX_ATTEMPTS, "3")
                .unwrap();
        }

        let state = AppState::new(db_path).await.unwrap();
        assert_eq!(state.engine_config.duplicate_policy.as_str(), "sum");
        assert_eq!(state.gateway.retry_policy().max_attempts, 3);
        assert_eq!(state.forecast_api.config().default_doc_cur, "CLP");
    }
}
