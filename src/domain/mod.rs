// ==========================================
// 销售预测引擎 - 领域层
// ==========================================
// 职责: 实体与类型定义，不含持久化逻辑
// ==========================================

pub mod forecast;
pub mod reference;
pub mod types;

pub use forecast::{
    CellKey, ChangeKind, DeltaRow, ForecastDetail, ForecastHeader, ForecastLogDetail,
    ForecastScope, LongRow, RowKey, WideRow,
};
pub use reference::{Customer, Item, Salesperson};
pub use types::{Linea, Metrica, MonthValues, TipoForecast};
