// ==========================================
// 销售预测引擎 - 领域类型定义
// ==========================================
// 预测类型 / 指标 / 业务线 / 月份 / 币种
// 所有枚举与数据库文本值一一对应
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 默认币种
pub const DEFAULT_DOC_CUR: &str = "CLP";

/// 数值比较容差
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// 月份列名（"01".."12"）
pub const MESES: [&str; 12] = [
    "01", "02", "03", "04", "05", "06", "07", "08", "09", "10", "11", "12",
];

/// 12 个月的数值单元
pub type MonthValues = [f64; 12];

// ==========================================
// 预测类型 (TipoForecast)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TipoForecast {
    Firme,      // 确认
    Proyectado, // 预估
}

impl TipoForecast {
    pub const ALL: [TipoForecast; 2] = [TipoForecast::Firme, TipoForecast::Proyectado];

    pub fn as_str(&self) -> &'static str {
        match self {
            TipoForecast::Firme => "Firme",
            TipoForecast::Proyectado => "Proyectado",
        }
    }

    /// 严格解析，未知值返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Firme" => Some(TipoForecast::Firme),
            "Proyectado" => Some(TipoForecast::Proyectado),
            _ => None,
        }
    }

    /// 另一种预测类型（用于补齐缺失类型）
    pub fn other(&self) -> Self {
        match self {
            TipoForecast::Firme => TipoForecast::Proyectado,
            TipoForecast::Proyectado => TipoForecast::Firme,
        }
    }
}

impl fmt::Display for TipoForecast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 指标 (Metrica)
// ==========================================
// 编辑缓冲区的行维度：数量 / 单价
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metrica {
    Cantidad,
    Precio,
}

impl Metrica {
    pub const ALL: [Metrica; 2] = [Metrica::Cantidad, Metrica::Precio];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metrica::Cantidad => "Cantidad",
            Metrica::Precio => "Precio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Cantidad" => Some(Metrica::Cantidad),
            "Precio" => Some(Metrica::Precio),
            _ => None,
        }
    }
}

impl fmt::Display for Metrica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 业务线 (Linea)
// ==========================================
// 由 OcrCode3 前缀派生，不可人工编辑
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Linea {
    Planta,
    Trader,
    Desconocido,
}

impl Linea {
    /// 由成本中心代码派生业务线
    ///
    /// - `Pta-*` → Planta
    /// - `Trd-*` → Trader
    /// - 其他 → Desconocido
    pub fn from_ocr_code3(ocr_code3: &str) -> Self {
        let code = ocr_code3.trim();
        if code.starts_with("Pta-") {
            Linea::Planta
        } else if code.starts_with("Trd-") {
            Linea::Trader
        } else {
            Linea::Desconocido
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Linea::Planta => "Planta",
            Linea::Trader => "Trader",
            Linea::Desconocido => "Desconocido",
        }
    }

    /// 宽松解析（数据库历史值），未知值归为 Desconocido
    pub fn from_db_str(s: &str) -> Self {
        match s.trim() {
            "Planta" => Linea::Planta,
            "Trader" => Linea::Trader,
            _ => Linea::Desconocido,
        }
    }
}

impl fmt::Display for Linea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 月份工具
// ==========================================

/// 月份列名 → 下标 (0..12)
pub fn mes_index(mes: &str) -> Option<usize> {
    MESES.iter().position(|m| *m == mes.trim())
}

/// 下标 → 月份列名
pub fn mes_label(idx: usize) -> &'static str {
    MESES[idx % 12]
}

/// 月份 → 当年该月 1 日
pub fn mes_to_fecha(year: i32, mes: &str) -> Option<NaiveDate> {
    let idx = mes_index(mes)?;
    NaiveDate::from_ymd_opt(year, idx as u32 + 1, 1)
}

/// 交货日期 → 月份列名
pub fn fecha_to_mes(fecha: NaiveDate) -> &'static str {
    use chrono::Datelike;
    mes_label(fecha.month0() as usize)
}

/// 年度区间 [year-01-01, (year+1)-01-01)
pub fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
    ))
}

// ==========================================
// 币种
// ==========================================

/// 币种必须为 3 位大写字母
pub fn is_valid_doc_cur(doc_cur: &str) -> bool {
    doc_cur.len() == 3 && doc_cur.chars().all(|c| c.is_ascii_uppercase())
}

/// 空值归一为默认币种
pub fn normalize_doc_cur(raw: Option<&str>, default: &str) -> String {
    match raw.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

/// 容差比较，NaN 与 NaN 视为相等
pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    if a.is_nan() || b.is_nan() {
        return false;
    }
    (a - b).abs() <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linea_from_ocr_code3() {
        assert_eq!(Linea::from_ocr_code3("Pta-Nutr"), Linea::Planta);
        assert_eq!(Linea::from_ocr_code3("Trd-Agro"), Linea::Trader);
        assert_eq!(Linea::from_ocr_code3("Adm-01"), Linea::Desconocido);
        assert_eq!(Linea::from_ocr_code3(""), Linea::Desconocido);
        // 前缀区分大小写
        assert_eq!(Linea::from_ocr_code3("pta-x"), Linea::Desconocido);
    }

    #[test]
    fn test_mes_conversion() {
        assert_eq!(mes_index("01"), Some(0));
        assert_eq!(mes_index("12"), Some(11));
        assert_eq!(mes_index("13"), None);
        assert_eq!(mes_index(""), None);
        assert_eq!(
            mes_to_fecha(2025, "07"),
            NaiveDate::from_ymd_opt(2025, 7, 1)
        );
        let fecha = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        assert_eq!(fecha_to_mes(fecha), "08");
    }

    #[test]
    fn test_doc_cur_validation() {
        assert!(is_valid_doc_cur("CLP"));
        assert!(is_valid_doc_cur("USD"));
        assert!(!is_valid_doc_cur("usd"));
        assert!(!is_valid_doc_cur("US"));
        assert!(!is_valid_doc_cur("US1"));
        assert_eq!(normalize_doc_cur(Some("  "), DEFAULT_DOC_CUR), "CLP");
        assert_eq!(normalize_doc_cur(None, DEFAULT_DOC_CUR), "CLP");
        assert_eq!(normalize_doc_cur(Some("USD"), DEFAULT_DOC_CUR), "USD");
    }

    #[test]
    fn test_approx_eq_nan() {
        assert!(approx_eq(f64::NAN, f64::NAN, DEFAULT_TOLERANCE));
        assert!(!approx_eq(f64::NAN, 0.0, DEFAULT_TOLERANCE));
        assert!(approx_eq(1.0, 1.0 + 1e-7, DEFAULT_TOLERANCE));
        assert!(!approx_eq(1.0, 1.001, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_enum_parse_strict() {
        assert_eq!(TipoForecast::parse("Firme"), Some(TipoForecast::Firme));
        assert_eq!(TipoForecast::parse("firme"), None);
        assert_eq!(Metrica::parse("Precio"), Some(Metrica::Precio));
        assert_eq!(Metrica::parse("Valor"), None);
        assert_eq!(TipoForecast::Firme.other(), TipoForecast::Proyectado);
    }
}
