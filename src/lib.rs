// ==========================================
// 销售预测引擎 - 核心库
// ==========================================
// 职责: 销售员按客户编辑 12 个月预测网格，保存时以增量生成新版本
// 技术栈: Rust + SQLite
// 红线: 版本表头不可改写；变更日志只追加；每单元至多一行明细
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 转换、增量、版本化写入
pub mod engine;

// 导入层 - 编辑器快照文件
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// SQL 追踪与耗时统计
pub mod perf;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{Linea, Metrica, TipoForecast};

// 领域实体
pub use domain::{
    ForecastDetail, ForecastHeader, ForecastLogDetail, ForecastScope, LongRow, RowKey, WideRow,
};

// 引擎
pub use engine::{
    EditBuffer, EditState, EngineError, SaveOrchestrator, SaveOutcome, SaveReport, SessionState,
};

// 配置
pub use config::{ConfigManager, DuplicatePolicy, EngineConfig};

// API
pub use api::{ApiError, ApiResult, ForecastApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "销售预测引擎";
