// ==========================================
// 销售预测引擎 - 配置层
// ==========================================
// 职责: 引擎运行配置的读取与覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod engine_config;
pub mod engine_config_trait;

pub use config_manager::{config_keys, ConfigManager};
pub use engine_config::{DuplicatePolicy, EngineConfig};
pub use engine_config_trait::EngineConfigReader;
