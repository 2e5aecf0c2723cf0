// ==========================================
// 销售预测引擎 - API层错误类型
// ==========================================
// 职责: 将 Repository / Engine / Import 错误转换为用户可读的错误
// 每个变体对应稳定的错误代码
// ==========================================

use crate::engine::error::EngineError;
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("结构错误: {0}")]
    SchemaError(String),

    #[error("数据不变量违反: {0}")]
    InvariantViolation(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库忙，请稍后重试: {0}")]
    StoreBusy(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    // ==========================================
    // 导入错误
    // ==========================================
    #[error("文件导入失败: {0}")]
    ImportError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::SchemaError(_) => "SCHEMA_ERROR",
            ApiError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            ApiError::StoreBusy(_) => "STORE_BUSY",
            ApiError::DatabaseError(_) => "STORE_ERROR",
            ApiError::DatabaseConnectionError(_) => "DB_CONNECTION_ERROR",
            ApiError::ImportError(_) => "IMPORT_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::StoreBusy(msg) => ApiError::StoreBusy(msg),
            RepositoryError::RetriesExhausted { attempts, message } => ApiError::DatabaseError(
                format!("数据库忙，重试 {} 次后放弃: {}", attempts, message),
            ),
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::InvariantViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::InvariantViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Schema(msg) => ApiError::SchemaError(msg),
            EngineError::InvariantViolation(msg) => ApiError::InvariantViolation(msg),
            EngineError::NoChange => ApiError::InvalidInput("无变更".to_string()),
            EngineError::StoreBusy(msg) => ApiError::StoreBusy(msg),
            EngineError::Store(e) => e.into(),
            e @ EngineError::RehydrateFailure { .. } => ApiError::InternalError(e.to_string()),
        }
    }
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Snapshot(e) => e.into(),
            ImportError::FileNotFound(path) => ApiError::NotFound(format!("文件 {}", path)),
            other => ApiError::ImportError(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
