// ==========================================
// 销售预测引擎 - 预测领域模型
// ==========================================
// 表: Forecast / Forecast_Detalle / Forecast_LogDetalle
// 红线: 表头一经创建不可改写；日志只追加
// ==========================================

use crate::domain::types::{Linea, Metrica, MonthValues, TipoForecast};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// 时间戳存储格式（微秒精度，保证字典序与时间序一致）
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// 日期存储格式
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ==========================================
// ForecastScope - 一次编辑/保存的作用域
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForecastScope {
    pub slp_code: i64,     // 销售员
    pub card_code: String, // 客户
    pub year: i32,         // 当前年度
}

impl ForecastScope {
    pub fn new(slp_code: i64, card_code: impl Into<String>, year: i32) -> Self {
        Self {
            slp_code,
            card_code: card_code.into(),
            year,
        }
    }
}

// ==========================================
// ForecastHeader - 预测版本表头
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastHeader {
    pub forecast_id: i64,
    pub slp_code: i64,
    pub fecha_carga: NaiveDateTime,
}

// ==========================================
// ForecastDetail - 预测明细（长表存储形态）
// ==========================================
// 唯一索引: (ForecastID, SlpCode, CardCode, ItemCode, Linea, OcrCode3, TipoForecast, FechEntr)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDetail {
    pub forecast_id: i64,
    pub slp_code: i64,
    pub card_code: String,
    pub item_code: String,
    pub tipo_forecast: TipoForecast,
    pub ocr_code3: String,
    pub linea: Linea,
    pub fech_entr: NaiveDate, // 恒为月初
    pub cant: f64,
    pub precio_un: f64,
    pub doc_cur: String,
}

// ==========================================
// ForecastLogDetail - 变更日志（只追加）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastLogDetail {
    pub forecast_id: i64,
    pub slp_code: i64,
    pub card_code: String,
    pub item_code: String,
    pub tipo_forecast: TipoForecast,
    pub ocr_code3: String,
    pub mes: String,
    pub cantidad_anterior: f64,
    pub cantidad_nueva: f64,
    pub timestamp: NaiveDateTime,
}

// ==========================================
// WideRow - 编辑器宽表行（指标 × 12 个月）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideRow {
    pub item_code: String,
    pub tipo_forecast: TipoForecast,
    pub metrica: Metrica,
    pub ocr_code3: String,
    pub doc_cur: String,
    pub item_name: Option<String>,
    pub linea: Option<Linea>,
    /// 缺失单元为 NaN
    pub months: MonthValues,
}

impl WideRow {
    /// 业务键 (ItemCode, TipoForecast, Metrica, OcrCode3)
    pub fn key(&self) -> RowKey {
        RowKey {
            item_code: self.item_code.clone(),
            tipo_forecast: self.tipo_forecast,
            metrica: self.metrica,
            ocr_code3: self.ocr_code3.clone(),
        }
    }
}

/// 宽表行业务键
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub item_code: String,
    pub tipo_forecast: TipoForecast,
    pub metrica: Metrica,
    pub ocr_code3: String,
}

// ==========================================
// LongRow - 长表行（每月一行，数量与单价合并）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRow {
    pub slp_code: i64,
    pub card_code: String,
    pub item_code: String,
    pub tipo_forecast: TipoForecast,
    pub ocr_code3: String,
    pub linea: Linea,
    pub doc_cur: String,
    pub mes: String,
    pub fech_entr: NaiveDate,
    pub cant: f64,
    pub precio_un: f64,
}

impl LongRow {
    /// 月度业务键 (ItemCode, TipoForecast, OcrCode3, Mes)
    pub fn cell_key(&self) -> CellKey {
        CellKey {
            item_code: self.item_code.clone(),
            tipo_forecast: self.tipo_forecast,
            ocr_code3: self.ocr_code3.clone(),
            mes: self.mes.clone(),
        }
    }

    pub fn to_detail(&self, forecast_id: i64) -> ForecastDetail {
        ForecastDetail {
            forecast_id,
            slp_code: self.slp_code,
            card_code: self.card_code.clone(),
            item_code: self.item_code.clone(),
            tipo_forecast: self.tipo_forecast,
            ocr_code3: self.ocr_code3.clone(),
            linea: self.linea,
            fech_entr: self.fech_entr,
            cant: self.cant,
            precio_un: self.precio_un,
            doc_cur: self.doc_cur.clone(),
        }
    }
}

/// 月度单元业务键
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub item_code: String,
    pub tipo_forecast: TipoForecast,
    pub ocr_code3: String,
    pub mes: String,
}

// ==========================================
// 变更分类
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Addition,     // 0 → >0
    Modification, // >0 → >0 且不等
    Removal,      // >0 → 0
}

// ==========================================
// DeltaRow - 单元级变更
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRow {
    pub card_code: String,
    pub item_code: String,
    pub tipo_forecast: TipoForecast,
    pub ocr_code3: String,
    pub linea: Linea,
    pub doc_cur: String,
    pub mes: String,
    pub fech_entr: NaiveDate,
    pub cantidad_anterior: f64,
    pub cantidad_nueva: f64,
    pub precio_un: f64,
    pub kind: ChangeKind,
}

impl DeltaRow {
    pub fn delta(&self) -> f64 {
        self.cantidad_nueva - self.cantidad_anterior
    }
}
