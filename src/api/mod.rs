// ==========================================
// 销售预测引擎 - API 层
// ==========================================
// 职责: 对外业务接口，供命令行及上层应用调用
// ==========================================

pub mod error;
pub mod forecast_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use forecast_api::{CustomerView, ForecastApi, DEFAULT_HISTORY_LIMIT};
