// ==========================================
// 销售预测引擎 - 编辑器快照同步器
// ==========================================
// 输入: 当前缓冲区 + 编辑器最后一次快照
// 输出: (合并后缓冲区, 是否有变更)
// 规则: 仅月份单元参与变更判定；NaN 视为未提及
// ==========================================

use crate::domain::forecast::{RowKey, WideRow};
use crate::domain::types::{approx_eq, mes_label, Linea};
use crate::engine::buffer::{BufferRow, EditBuffer};
use crate::engine::error::{EngineError, EngineResult};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// 同步结果
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub buffer: EditBuffer,
    pub has_changes: bool,
    /// 发生变化的月份单元数
    pub changed_cells: usize,
}

/// 合并编辑器快照到缓冲区
///
/// # 参数
/// - `buffer`: 当前缓冲区（不修改）
/// - `editor`: 编辑器快照（宽表行）
/// - `tolerance`: 绝对容差
///
/// # 返回
/// - 快照含重复键 → InvariantViolation
/// - 否则返回合并结果；未提及的缓冲区行与单元保持不变
pub fn synchronize(
    buffer: &EditBuffer,
    editor: &[WideRow],
    tolerance: f64,
) -> EngineResult<SyncResult> {
    ensure_unique_editor_keys(editor)?;

    // 按键排序，保证合并顺序确定
    let sorted: BTreeMap<RowKey, &WideRow> = editor.iter().map(|r| (r.key(), r)).collect();

    let mut merged = buffer.clone();
    let mut changed_cells = 0usize;
    // DocCur 属于 (ItemCode, OcrCode3) 基底，编辑器值优先
    let mut doc_cur_overrides: BTreeMap<(String, String), String> = BTreeMap::new();

    for (key, row) in &sorted {
        if !row.doc_cur.trim().is_empty() {
            doc_cur_overrides.insert(
                (key.item_code.clone(), key.ocr_code3.clone()),
                row.doc_cur.clone(),
            );
        }

        match merged.get_mut(key) {
            Some(existing) => {
                for (idx, incoming) in row.months.iter().enumerate() {
                    if incoming.is_nan() {
                        continue;
                    }
                    if !approx_eq(existing.months[idx], *incoming, tolerance) {
                        debug!(
                            item_code = %key.item_code,
                            tipo = %key.tipo_forecast,
                            metrica = %key.metrica,
                            mes = mes_label(idx),
                            before = existing.months[idx],
                            after = *incoming,
                            "单元变更"
                        );
                        existing.months[idx] = *incoming;
                        changed_cells += 1;
                    }
                }
                if row.item_name.is_some() {
                    existing.item_name = row.item_name.clone();
                }
                if let Some(linea) = row.linea {
                    existing.linea = linea;
                }
            }
            None => {
                // 新键: 缓冲区侧视为 NaN，任一非 NaN 单元即为变更
                let mentioned = row.months.iter().filter(|v| !v.is_nan()).count();
                changed_cells += mentioned;
                merged.insert(
                    (*key).clone(),
                    BufferRow {
                        doc_cur: row.doc_cur.clone(),
                        linea: row
                            .linea
                            .unwrap_or_else(|| Linea::from_ocr_code3(&key.ocr_code3)),
                        item_name: row.item_name.clone(),
                        months: row.months.map(|v| if v.is_nan() { 0.0 } else { v }),
                    },
                );
            }
        }
    }

    apply_doc_cur_overrides(&mut merged, &doc_cur_overrides);
    merged.ensure_grid();

    Ok(SyncResult {
        buffer: merged,
        has_changes: changed_cells > 0,
        changed_cells,
    })
}

/// 编辑器快照中重复键视为数据损坏
fn ensure_unique_editor_keys(editor: &[WideRow]) -> EngineResult<()> {
    let mut seen: HashSet<RowKey> = HashSet::with_capacity(editor.len());
    for row in editor {
        let key = row.key();
        if !seen.insert(key.clone()) {
            return Err(EngineError::InvariantViolation(format!(
                "编辑器快照键重复: item={}, tipo={}, metrica={}, ocr={}",
                key.item_code, key.tipo_forecast, key.metrica, key.ocr_code3
            )));
        }
    }
    Ok(())
}

fn apply_doc_cur_overrides(buffer: &mut EditBuffer, overrides: &BTreeMap<(String, String), String>) {
    if overrides.is_empty() {
        return;
    }
    let keys: Vec<RowKey> = buffer.keys().cloned().collect();
    for key in keys {
        if let Some(doc_cur) = overrides.get(&(key.item_code.clone(), key.ocr_code3.clone())) {
            if let Some(row) = buffer.get_mut(&key) {
                row.doc_cur = doc_cur.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Metrica, TipoForecast, DEFAULT_TOLERANCE};

    fn key(tipo: TipoForecast, metrica: Metrica) -> RowKey {
        RowKey {
            item_code: "I100".to_string(),
            tipo_forecast: tipo,
            metrica,
            ocr_code3: "Pta-Nutr".to_string(),
        }
    }

    fn editor_row(tipo: TipoForecast, metrica: Metrica, cells: &[(usize, f64)]) -> WideRow {
        let mut months = [f64::NAN; 12];
        for (idx, v) in cells {
            months[*idx] = *v;
        }
        WideRow {
            item_code: "I100".to_string(),
            tipo_forecast: tipo,
            metrica,
            ocr_code3: "Pta-Nutr".to_string(),
            doc_cur: "CLP".to_string(),
            item_name: None,
            linea: None,
            months,
        }
    }

    fn seeded_buffer() -> EditBuffer {
        let mut months = [0.0; 12];
        months[6] = 10.0;
        let mut buffer = EditBuffer::new();
        buffer.insert(
            key(TipoForecast::Firme, Metrica::Cantidad),
            BufferRow {
                doc_cur: "CLP".to_string(),
                linea: Linea::Planta,
                item_name: Some("Urea".to_string()),
                months,
            },
        );
        buffer.ensure_grid();
        buffer
    }

    #[test]
    fn test_no_changes_when_equal_within_tolerance() {
        let buffer = seeded_buffer();
        let editor = vec![editor_row(
            TipoForecast::Firme,
            Metrica::Cantidad,
            &[(6, 10.0 + 1e-9), (7, 0.0)],
        )];
        let result = synchronize(&buffer, &editor, DEFAULT_TOLERANCE).unwrap();
        assert!(!result.has_changes);
        assert_eq!(result.changed_cells, 0);
        assert_eq!(result.buffer.structural_hash(), buffer.structural_hash());
    }

    #[test]
    fn test_changed_cell_applied_and_others_preserved() {
        let buffer = seeded_buffer();
        let editor = vec![editor_row(TipoForecast::Firme, Metrica::Cantidad, &[(7, 20.0)])];
        let result = synchronize(&buffer, &editor, DEFAULT_TOLERANCE).unwrap();

        assert!(result.has_changes);
        assert_eq!(result.changed_cells, 1);
        let row = result.buffer.get(&key(TipoForecast::Firme, Metrica::Cantidad)).unwrap();
        assert_eq!(row.months[6], 10.0);
        assert_eq!(row.months[7], 20.0);
        assert_eq!(row.item_name.as_deref(), Some("Urea"));
    }

    #[test]
    fn test_new_key_inserted_and_grid_completed() {
        let buffer = EditBuffer::new();
        let mut row = editor_row(TipoForecast::Firme, Metrica::Cantidad, &[(6, 10.0), (7, 20.0)]);
        row.ocr_code3 = "Trd-Agro".to_string();
        let result = synchronize(&buffer, &[row], DEFAULT_TOLERANCE).unwrap();

        assert!(result.has_changes);
        assert_eq!(result.changed_cells, 2);
        assert_eq!(result.buffer.len(), 4);
        assert!(result.buffer.is_grid_complete());
        let inserted = result
            .buffer
            .iter()
            .find(|(k, _)| k.metrica == Metrica::Cantidad && k.tipo_forecast == TipoForecast::Firme)
            .map(|(_, r)| r)
            .unwrap();
        assert_eq!(inserted.linea, Linea::Trader);
        assert_eq!(inserted.months[0], 0.0);
    }

    #[test]
    fn test_duplicate_editor_keys_rejected() {
        let buffer = seeded_buffer();
        let editor = vec![
            editor_row(TipoForecast::Firme, Metrica::Cantidad, &[(0, 1.0)]),
            editor_row(TipoForecast::Firme, Metrica::Cantidad, &[(0, 2.0)]),
        ];
        let err = synchronize(&buffer, &editor, DEFAULT_TOLERANCE).unwrap_err();
        assert_eq!(err.code(), "INVARIANT_VIOLATION");
    }

    #[test]
    fn test_doc_cur_propagates_to_base() {
        let buffer = seeded_buffer();
        let mut row = editor_row(TipoForecast::Firme, Metrica::Precio, &[]);
        row.doc_cur = "USD".to_string();
        let result = synchronize(&buffer, &[row], DEFAULT_TOLERANCE).unwrap();

        // 仅属性变化不计为变更
        assert!(!result.has_changes);
        assert!(result.buffer.iter().all(|(_, r)| r.doc_cur == "USD"));
        assert!(result.buffer.is_grid_complete());
    }
}
