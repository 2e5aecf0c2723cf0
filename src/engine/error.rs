// ==========================================
// 销售预测引擎 - 引擎层错误类型
// ==========================================
// 错误种类:
// - Schema: 缺列 / 未知枚举值 / 禁用列，不写库
// - InvariantViolation: 重复键 / 负数 / 空月份 / 币种格式，不写库
// - NoChange: 增量为空，视为成功
// - StoreBusy / Store: 存储层失败，按客户隔离
// - RehydrateFailure: 已写库但缓冲区重建失败，作为警告
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("结构错误: {0}")]
    Schema(String),

    #[error("不变量违反: {0}")]
    InvariantViolation(String),

    #[error("无变更")]
    NoChange,

    #[error("数据库忙: {0}")]
    StoreBusy(String),

    #[error("存储错误: {0}")]
    Store(#[source] RepositoryError),

    #[error("缓冲区重建失败 (forecast_id={forecast_id}): {message}")]
    RehydrateFailure { forecast_id: i64, message: String },
}

impl EngineError {
    /// 稳定的错误代码（供上层展示/统计）
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Schema(_) => "SCHEMA_ERROR",
            EngineError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            EngineError::NoChange => "NO_CHANGE",
            EngineError::StoreBusy(_) => "STORE_BUSY",
            EngineError::Store(_) => "STORE_ERROR",
            EngineError::RehydrateFailure { .. } => "REHYDRATE_FAILURE",
        }
    }

    /// 是否发生在写库之前（可保证未产生任何持久化副作用）
    pub fn is_pre_write(&self) -> bool {
        matches!(
            self,
            EngineError::Schema(_) | EngineError::InvariantViolation(_) | EngineError::NoChange
        )
    }
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::StoreBusy(msg) => EngineError::StoreBusy(msg),
            other => EngineError::Store(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
