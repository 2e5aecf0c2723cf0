// ==========================================
// 销售预测引擎 - 引擎配置读取 Trait
// ==========================================
// 职责: 定义引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::engine_config::{DuplicatePolicy, EngineConfig};
use crate::repository::gateway::RetryPolicy;
use async_trait::async_trait;
use std::error::Error;

// ==========================================
// EngineConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait EngineConfigReader: Send + Sync {
    /// 默认币种
    ///
    /// # 默认值
    /// - CLP
    async fn get_default_doc_cur(&self) -> Result<String, Box<dyn Error>>;

    /// 数值比较容差
    ///
    /// # 默认值
    /// - 1e-6
    async fn get_tolerance(&self) -> Result<f64, Box<dyn Error>>;

    /// 前序版本重复键策略
    ///
    /// # 默认值
    /// - mean
    async fn get_duplicate_policy(&self) -> Result<DuplicatePolicy, Box<dyn Error>>;

    /// busy 重试策略
    ///
    /// # 默认值
    /// - 5 次，退避基数 600ms
    async fn get_retry_policy(&self) -> Result<RetryPolicy, Box<dyn Error>>;

    /// 一次性装载完整引擎配置
    async fn load_engine_config(&self) -> Result<EngineConfig, Box<dyn Error>> {
        let default_doc_cur = self.get_default_doc_cur().await?;
        let tolerance = self.get_tolerance().await?;
        let duplicate_policy = self.get_duplicate_policy().await?;
        let retry = self.get_retry_policy().await?;
        Ok(EngineConfig {
            default_doc_cur,
            tolerance,
            duplicate_policy,
            retry,
        })
    }
}
