// ==========================================
// 销售预测引擎 - 增量计算器
// ==========================================
// 候选长表 × 前序版本明细 → 新增 / 修改 / 删除
// 红线: 0→0 与未变化的单元不得产生增量（无操作不建表头）
// ==========================================

use crate::config::engine_config::DuplicatePolicy;
use crate::domain::forecast::{CellKey, ChangeKind, DeltaRow, ForecastDetail, LongRow};
use crate::domain::types::{fecha_to_mes, Linea};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::transformer::ensure_unique_cells;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// 增量计算结果
#[derive(Debug, Clone, Default)]
pub struct DeltaSet {
    pub rows: Vec<DeltaRow>,
    pub warnings: Vec<String>,
    /// 数量未变但单价与前序版本不同的单元数（不产生增量）
    pub price_only_cells: usize,
}

impl DeltaSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.rows.iter().filter(|r| r.kind == kind).count()
    }

    pub fn removals(&self) -> Vec<DeltaRow> {
        self.rows
            .iter()
            .filter(|r| r.kind == ChangeKind::Removal)
            .cloned()
            .collect()
    }
}

/// 前序单元（已按策略解析重复）
#[derive(Debug, Clone)]
struct PriorCell {
    cant: f64,
    precio_un: f64,
    linea: Linea,
    doc_cur: String,
    fech_entr: NaiveDate,
}

// ==========================================
// DeltaComputer
// ==========================================
pub struct DeltaComputer {
    policy: DuplicatePolicy,
    tolerance: f64,
}

impl DeltaComputer {
    pub fn new(policy: DuplicatePolicy, tolerance: f64) -> Self {
        Self { policy, tolerance }
    }

    /// 计算增量
    ///
    /// # 参数
    /// - `card_code`: 客户
    /// - `candidates`: 缓冲区转换得到的长表
    /// - `prior`: 前序版本该客户当年明细；None 表示无前序版本
    ///
    /// # 返回
    /// 按 (ItemCode, TipoForecast, OcrCode3, Mes) 有序的增量行
    pub fn compute(
        &self,
        card_code: &str,
        candidates: &[LongRow],
        prior: Option<&[ForecastDetail]>,
    ) -> EngineResult<DeltaSet> {
        let mut warnings = Vec::new();
        let prior_cells = match prior {
            Some(details) => self.resolve_prior(details, &mut warnings)?,
            None => BTreeMap::new(),
        };

        let mut rows = Vec::new();
        let mut price_only_cells = 0;
        let mut matched: HashSet<&CellKey> = HashSet::with_capacity(prior_cells.len());

        for cand in candidates {
            let key = cand.cell_key();
            let (anterior, precio_anterior) = match prior_cells.get_key_value(&key) {
                Some((k, cell)) => {
                    matched.insert(k);
                    (cell.cant, cell.precio_un)
                }
                None => (0.0, 0.0),
            };

            let kind = self.classify(anterior, cand.cant);
            if kind.is_none()
                && !self.is_zero(cand.cant)
                && (cand.precio_un - precio_anterior).abs() > self.tolerance
            {
                price_only_cells += 1;
            }
            if let Some(kind) = kind {
                rows.push(DeltaRow {
                    card_code: card_code.to_string(),
                    item_code: cand.item_code.clone(),
                    tipo_forecast: cand.tipo_forecast,
                    ocr_code3: cand.ocr_code3.clone(),
                    linea: cand.linea,
                    doc_cur: cand.doc_cur.clone(),
                    mes: cand.mes.clone(),
                    fech_entr: cand.fech_entr,
                    cantidad_anterior: anterior,
                    cantidad_nueva: if self.is_zero(cand.cant) { 0.0 } else { cand.cant },
                    precio_un: cand.precio_un,
                    kind,
                });
            }
        }

        // 仅存在于前序版本的单元: 视为置 0
        for (key, cell) in &prior_cells {
            if matched.contains(key) {
                continue;
            }
            if let Some(kind) = self.classify(cell.cant, 0.0) {
                rows.push(DeltaRow {
                    card_code: card_code.to_string(),
                    item_code: key.item_code.clone(),
                    tipo_forecast: key.tipo_forecast,
                    ocr_code3: key.ocr_code3.clone(),
                    linea: cell.linea,
                    doc_cur: cell.doc_cur.clone(),
                    mes: key.mes.clone(),
                    fech_entr: cell.fech_entr,
                    cantidad_anterior: cell.cant,
                    cantidad_nueva: 0.0,
                    precio_un: cell.precio_un,
                    kind,
                });
            }
        }

        rows.sort_by(|a, b| {
            (&a.item_code, a.tipo_forecast, &a.ocr_code3, &a.mes)
                .cmp(&(&b.item_code, b.tipo_forecast, &b.ocr_code3, &b.mes))
        });

        validate_delta_rows(&rows)?;

        debug!(
            card_code = %card_code,
            additions = rows.iter().filter(|r| r.kind == ChangeKind::Addition).count(),
            modifications = rows.iter().filter(|r| r.kind == ChangeKind::Modification).count(),
            removals = rows.iter().filter(|r| r.kind == ChangeKind::Removal).count(),
            "增量计算完成"
        );

        Ok(DeltaSet {
            rows,
            warnings,
            price_only_cells,
        })
    }

    /// 变更分类；None 表示无操作
    fn classify(&self, anterior: f64, nueva: f64) -> Option<ChangeKind> {
        let before_zero = self.is_zero(anterior);
        let after_zero = self.is_zero(nueva);
        match (before_zero, after_zero) {
            (true, true) => None,
            (true, false) => Some(ChangeKind::Addition),
            (false, true) => Some(ChangeKind::Removal),
            (false, false) => {
                if (nueva - anterior).abs() > self.tolerance {
                    Some(ChangeKind::Modification)
                } else {
                    None
                }
            }
        }
    }

    fn is_zero(&self, v: f64) -> bool {
        v.abs() <= self.tolerance
    }

    /// 前序明细按 (ItemCode, TipoForecast, OcrCode3, Mes) 归并
    fn resolve_prior(
        &self,
        details: &[ForecastDetail],
        warnings: &mut Vec<String>,
    ) -> EngineResult<BTreeMap<CellKey, PriorCell>> {
        let mut grouped: BTreeMap<CellKey, Vec<&ForecastDetail>> = BTreeMap::new();
        for d in details {
            let key = CellKey {
                item_code: d.item_code.clone(),
                tipo_forecast: d.tipo_forecast,
                ocr_code3: d.ocr_code3.clone(),
                mes: fecha_to_mes(d.fech_entr).to_string(),
            };
            grouped.entry(key).or_default().push(d);
        }

        let mut resolved = BTreeMap::new();
        for (key, group) in grouped {
            // 分组非空；last 为插入顺序上的最后一行
            let Some(last) = group.last() else {
                continue;
            };
            let cant = if group.len() > 1 {
                let message = format!(
                    "前序版本键重复 {} 行: item={}, tipo={}, ocr={}, mes={} (策略={})",
                    group.len(),
                    key.item_code,
                    key.tipo_forecast,
                    key.ocr_code3,
                    key.mes,
                    self.policy
                );
                warn!(forecast_id = last.forecast_id, "{}", message);
                let total: f64 = group.iter().map(|d| d.cant).sum();
                let cant = match self.policy {
                    DuplicatePolicy::Error => {
                        return Err(EngineError::InvariantViolation(message));
                    }
                    DuplicatePolicy::Sum => total,
                    DuplicatePolicy::Mean => total / group.len() as f64,
                };
                warnings.push(message);
                cant
            } else {
                last.cant
            };

            resolved.insert(
                key,
                PriorCell {
                    cant,
                    precio_un: last.precio_un,
                    linea: last.linea,
                    doc_cur: last.doc_cur.clone(),
                    fech_entr: last.fech_entr,
                },
            );
        }
        Ok(resolved)
    }
}

/// 增量行结构校验 + 业务键唯一
fn validate_delta_rows(rows: &[DeltaRow]) -> EngineResult<()> {
    for r in rows {
        if r.item_code.trim().is_empty() {
            return Err(EngineError::InvariantViolation("增量行 ItemCode 为空".to_string()));
        }
        if !r.cantidad_anterior.is_finite() || !r.cantidad_nueva.is_finite() {
            return Err(EngineError::InvariantViolation(format!(
                "增量行数值非法: item={}, mes={}",
                r.item_code, r.mes
            )));
        }
    }
    ensure_unique_cells(rows.iter().map(|r| {
        (
            CellKey {
                item_code: r.item_code.clone(),
                tipo_forecast: r.tipo_forecast,
                ocr_code3: r.ocr_code3.clone(),
                mes: r.mes.clone(),
            },
            r.card_code.as_str(),
        )
    }))
}

#[cfg(test)]
mod tests;
