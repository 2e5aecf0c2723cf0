// ==========================================
// 销售预测引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 约束: 所有查询使用参数化，防止 SQL 注入
// ==========================================

pub mod error;
pub mod forecast_repo;
pub mod gateway;
pub mod reference_repo;

pub use error::{RepositoryError, RepositoryResult};
pub use forecast_repo::{ForecastRepository, PriorForecast, PriorMatch};
pub use gateway::{RetryPolicy, StorageGateway, Table};
pub use reference_repo::ReferenceRepository;
