// ==========================================
// 销售预测引擎 - 宽表/长表转换器
// ==========================================
// 宽表: (ItemCode, TipoForecast, Metrica, OcrCode3) × "01".."12"
// 长表: (ItemCode, TipoForecast, OcrCode3, Mes) → (Cant, PrecioUN)
// 红线: 输出满足业务键唯一；负数一律拒绝
// ==========================================

use crate::domain::forecast::{CellKey, ForecastScope, LongRow, RowKey, WideRow};
use crate::domain::types::{
    is_valid_doc_cur, mes_index, mes_label, mes_to_fecha, normalize_doc_cur, Linea, Metrica,
    MonthValues, TipoForecast, MESES,
};
use crate::engine::error::{EngineError, EngineResult};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// 宽表必需列
pub const REQUIRED_COLUMNS: [&str; 5] = ["ItemCode", "TipoForecast", "OcrCode3", "DocCur", "Metrica"];

/// 与逐月单价行冲突的标量单价列
pub const FORBIDDEN_COLUMNS: [&str; 3] = ["PrecioUN", "_PrecioUN_", "PrecioUnitario"];

// ==========================================
// 原始记录 → 宽表行
// ==========================================

/// 校验并解析编辑器/文件给出的原始宽表记录
///
/// - 缺少必需列、出现禁用列、未知 TipoForecast/Metrica → Schema
/// - 月份列缺失或为空/NaN → NaN（后续按 0 处理）
/// - 月份列出现非数值文本 → Schema
pub fn parse_wide_records(
    records: &[HashMap<String, String>],
    default_doc_cur: &str,
) -> EngineResult<Vec<WideRow>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.keys().map(String::as_str))
        .collect();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.contains(c))
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::Schema(format!("缺少必需列: {}", missing.join(", "))));
    }

    let forbidden: Vec<&str> = FORBIDDEN_COLUMNS
        .iter()
        .copied()
        .filter(|c| columns.contains(c))
        .collect();
    if !forbidden.is_empty() {
        return Err(EngineError::Schema(format!(
            "禁用列与逐月单价行冲突: {}",
            forbidden.join(", ")
        )));
    }

    records
        .iter()
        .enumerate()
        .map(|(idx, record)| parse_wide_record(idx + 1, record, default_doc_cur))
        .collect()
}

fn parse_wide_record(
    row_no: usize,
    record: &HashMap<String, String>,
    default_doc_cur: &str,
) -> EngineResult<WideRow> {
    let field = |name: &str| record.get(name).map(|v| v.trim()).unwrap_or("");

    let tipo_raw = field("TipoForecast");
    let tipo_forecast = TipoForecast::parse(tipo_raw).ok_or_else(|| {
        EngineError::Schema(format!("第 {} 行 TipoForecast 未知: '{}'", row_no, tipo_raw))
    })?;

    let metrica_raw = field("Metrica");
    let metrica = Metrica::parse(metrica_raw).ok_or_else(|| {
        EngineError::Schema(format!("第 {} 行 Metrica 未知: '{}'", row_no, metrica_raw))
    })?;

    let mut months: MonthValues = [f64::NAN; 12];
    for (i, mes) in MESES.iter().enumerate() {
        months[i] = parse_cell(field(mes)).ok_or_else(|| {
            EngineError::Schema(format!(
                "第 {} 行月份 {} 非数值: '{}'",
                row_no,
                mes,
                field(mes)
            ))
        })?;
    }

    let item_name = Some(field("ItemName"))
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(WideRow {
        item_code: field("ItemCode").to_string(),
        tipo_forecast,
        metrica,
        ocr_code3: field("OcrCode3").to_string(),
        doc_cur: normalize_doc_cur(Some(field("DocCur")), default_doc_cur),
        item_name,
        linea: None,
        months,
    })
}

/// 单元解析：空值/NaN → NaN；非数值 → None
fn parse_cell(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("null") {
        return Some(f64::NAN);
    }
    s.parse::<f64>().ok()
}

// ==========================================
// 宽表 → 长表
// ==========================================

/// 合并键 (ItemCode, TipoForecast, OcrCode3, DocCur, Mes)
type MergeKey = (String, TipoForecast, String, String, usize);

#[derive(Default)]
struct CellAcc {
    cant: f64,
    precios: Vec<f64>,
    doc_cur: String,
}

/// 宽表转长表
///
/// 1. 缺失月份/NaN → 0
/// 2. 按 (ItemCode, TipoForecast, OcrCode3, Metrica) 去重，保留最后一次出现
/// 3. 按 Metrica 拆分并逐月展开
/// 4. 按 (ItemCode, TipoForecast, OcrCode3, DocCur, Mes) 外连接，缺失补 0
/// 5. 按业务键聚合: Cant 求和；PrecioUN 取最后一个非零值，否则最后值，否则 0
/// 6. 派生 Linea，附加 CardCode/SlpCode/FechEntr
/// 7. 拒绝负数；校验业务键唯一
pub fn wide_to_long(
    rows: &[WideRow],
    scope: &ForecastScope,
    default_doc_cur: &str,
) -> EngineResult<Vec<LongRow>> {
    let deduped = dedup_keep_last(rows);

    for row in &deduped {
        if row.item_code.trim().is_empty() {
            return Err(EngineError::InvariantViolation("ItemCode 为空".to_string()));
        }
        let doc_cur = normalize_doc_cur(Some(&row.doc_cur), default_doc_cur);
        if !is_valid_doc_cur(&doc_cur) {
            return Err(EngineError::InvariantViolation(format!(
                "DocCur 格式错误: '{}' (item={})",
                row.doc_cur, row.item_code
            )));
        }
    }

    // 拆分 + 展开 + 外连接
    let mut merged: BTreeMap<MergeKey, (f64, f64)> = BTreeMap::new();
    for row in &deduped {
        let doc_cur = normalize_doc_cur(Some(&row.doc_cur), default_doc_cur);
        for (i, raw) in row.months.iter().enumerate() {
            let value = if raw.is_nan() { 0.0 } else { *raw };
            let key = (
                row.item_code.clone(),
                row.tipo_forecast,
                row.ocr_code3.clone(),
                doc_cur.clone(),
                i,
            );
            let entry = merged.entry(key).or_insert((0.0, 0.0));
            match row.metrica {
                Metrica::Cantidad => entry.0 = value,
                Metrica::Precio => entry.1 = value,
            }
        }
    }

    // 按业务键聚合
    let mut groups: BTreeMap<(String, TipoForecast, String, usize), CellAcc> = BTreeMap::new();
    for ((item, tipo, ocr, doc_cur, mes_idx), (cant, precio)) in merged {
        let acc = groups.entry((item, tipo, ocr, mes_idx)).or_default();
        acc.cant += cant;
        acc.precios.push(precio);
        acc.doc_cur = doc_cur;
    }

    let mut out = Vec::with_capacity(groups.len());
    for ((item_code, tipo_forecast, ocr_code3, mes_idx), acc) in groups {
        let mes = mes_label(mes_idx);
        let precio_un = last_non_zero_or_last(&acc.precios);

        if !acc.cant.is_finite() || !precio_un.is_finite() {
            return Err(EngineError::InvariantViolation(format!(
                "数值非法 (item={}, mes={})",
                item_code, mes
            )));
        }
        if acc.cant < 0.0 {
            return Err(EngineError::InvariantViolation(format!(
                "数量为负 (item={}, tipo={}, mes={}): {}",
                item_code, tipo_forecast, mes, acc.cant
            )));
        }
        if precio_un < 0.0 {
            return Err(EngineError::InvariantViolation(format!(
                "单价为负 (item={}, tipo={}, mes={}): {}",
                item_code, tipo_forecast, mes, precio_un
            )));
        }

        let fech_entr = mes_to_fecha(scope.year, mes).ok_or_else(|| {
            EngineError::InvariantViolation(format!("无效年度/月份: {}-{}", scope.year, mes))
        })?;

        out.push(LongRow {
            slp_code: scope.slp_code,
            card_code: scope.card_code.clone(),
            linea: Linea::from_ocr_code3(&ocr_code3),
            item_code,
            tipo_forecast,
            ocr_code3,
            doc_cur: acc.doc_cur,
            mes: mes.to_string(),
            fech_entr,
            cant: acc.cant,
            precio_un,
        });
    }

    ensure_unique_cells(out.iter().map(|r| (r.cell_key(), r.card_code.as_str())))?;
    Ok(out)
}

/// 去重保留最后一次出现（位置取最后一次出现的位置）
fn dedup_keep_last(rows: &[WideRow]) -> Vec<WideRow> {
    let mut seen: HashSet<RowKey> = HashSet::new();
    let mut kept: Vec<WideRow> = rows
        .iter()
        .rev()
        .filter(|r| seen.insert(r.key()))
        .cloned()
        .collect();
    kept.reverse();
    kept
}

fn last_non_zero_or_last(values: &[f64]) -> f64 {
    values
        .iter()
        .rev()
        .copied()
        .find(|v| *v != 0.0)
        .or_else(|| values.last().copied())
        .unwrap_or(0.0)
}

/// 校验 (ItemCode, TipoForecast, OcrCode3, Mes, CardCode) 唯一
pub fn ensure_unique_cells<'a, I>(keys: I) -> EngineResult<()>
where
    I: IntoIterator<Item = (CellKey, &'a str)>,
{
    let mut seen: HashSet<(CellKey, &'a str)> = HashSet::new();
    for (key, card) in keys {
        if key.mes.len() != 2 || mes_index(&key.mes).is_none() {
            return Err(EngineError::InvariantViolation(format!(
                "Mes 非法: '{}' (item={})",
                key.mes, key.item_code
            )));
        }
        if !seen.insert((key.clone(), card)) {
            return Err(EngineError::InvariantViolation(format!(
                "业务键重复: item={}, tipo={}, ocr={}, mes={}, card={}",
                key.item_code, key.tipo_forecast, key.ocr_code3, key.mes, card
            )));
        }
    }
    Ok(())
}

// ==========================================
// 长表 → 宽表
// ==========================================

/// 长表转宽表（两个指标各一行，月份补齐为 0）
///
/// Linea 按 (ItemCode, OcrCode3, DocCur) 基底取代表值重新附加
pub fn long_to_wide(rows: &[LongRow]) -> Vec<WideRow> {
    let mut pivot: BTreeMap<(String, TipoForecast, String, String), (MonthValues, MonthValues)> =
        BTreeMap::new();
    let mut linea_by_base: HashMap<(String, String, String), Linea> = HashMap::new();

    for row in rows {
        let Some(idx) = mes_index(&row.mes) else {
            continue;
        };
        let entry = pivot
            .entry((
                row.item_code.clone(),
                row.tipo_forecast,
                row.ocr_code3.clone(),
                row.doc_cur.clone(),
            ))
            .or_insert(([0.0; 12], [0.0; 12]));
        entry.0[idx] = row.cant;
        entry.1[idx] = row.precio_un;

        linea_by_base
            .entry((row.item_code.clone(), row.ocr_code3.clone(), row.doc_cur.clone()))
            .or_insert(row.linea);
    }

    let mut out = Vec::with_capacity(pivot.len() * 2);
    for ((item_code, tipo_forecast, ocr_code3, doc_cur), (cant, precio)) in pivot {
        let linea = linea_by_base
            .get(&(item_code.clone(), ocr_code3.clone(), doc_cur.clone()))
            .copied()
            .unwrap_or_else(|| Linea::from_ocr_code3(&ocr_code3));

        for (metrica, months) in [(Metrica::Cantidad, cant), (Metrica::Precio, precio)] {
            out.push(WideRow {
                item_code: item_code.clone(),
                tipo_forecast,
                metrica,
                ocr_code3: ocr_code3.clone(),
                doc_cur: doc_cur.clone(),
                item_name: None,
                linea: Some(linea),
                months,
            });
        }
    }
    out
}
