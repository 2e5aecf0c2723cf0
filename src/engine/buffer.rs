// ==========================================
// 销售预测引擎 - 编辑缓冲区
// ==========================================
// 键: (ItemCode, TipoForecast, Metrica, OcrCode3)
// 值: DocCur / Linea / ItemName + 12 个月单元
// 网格完整性: 每个 (ItemCode, OcrCode3, DocCur) 基底恰好 4 行 × 12 列
// ==========================================

use crate::domain::forecast::{ForecastDetail, RowKey, WideRow};
use crate::domain::types::{fecha_to_mes, mes_index, Linea, Metrica, MonthValues, TipoForecast};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// 缓冲区基底 (ItemCode, OcrCode3, DocCur)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferBase {
    pub item_code: String,
    pub ocr_code3: String,
    pub doc_cur: String,
}

/// 缓冲区行（键之外的属性 + 12 个月单元）
#[derive(Debug, Clone, PartialEq)]
pub struct BufferRow {
    pub doc_cur: String,
    pub linea: Linea,
    pub item_name: Option<String>,
    pub months: MonthValues,
}

impl BufferRow {
    /// 全零行，属性沿用模板行
    fn zeroed_like(template: &BufferRow) -> Self {
        Self {
            doc_cur: template.doc_cur.clone(),
            linea: template.linea,
            item_name: template.item_name.clone(),
            months: [0.0; 12],
        }
    }
}

// ==========================================
// EditBuffer - 单客户编辑缓冲区
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditBuffer {
    rows: BTreeMap<RowKey, BufferRow>,
}

impl EditBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &RowKey) -> Option<&BufferRow> {
        self.rows.get(key)
    }

    pub fn get_mut(&mut self, key: &RowKey) -> Option<&mut BufferRow> {
        self.rows.get_mut(key)
    }

    pub fn insert(&mut self, key: RowKey, row: BufferRow) -> Option<BufferRow> {
        self.rows.insert(key, row)
    }

    pub fn contains_key(&self, key: &RowKey) -> bool {
        self.rows.contains_key(key)
    }

    /// 按键有序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&RowKey, &BufferRow)> {
        self.rows.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RowKey> {
        self.rows.keys()
    }

    /// 读取单元；键不存在返回 None
    pub fn cell(&self, key: &RowKey, mes: &str) -> Option<f64> {
        let idx = mes_index(mes)?;
        self.rows.get(key).map(|r| r.months[idx])
    }

    /// 写入单元；键或月份无效返回 false
    pub fn set_cell(&mut self, key: &RowKey, mes: &str, value: f64) -> bool {
        match (mes_index(mes), self.rows.get_mut(key)) {
            (Some(idx), Some(row)) => {
                row.months[idx] = value;
                true
            }
            _ => false,
        }
    }

    // ==========================================
    // 构建
    // ==========================================

    /// 由最新存储版本初始化
    ///
    /// # 参数
    /// - `details`: 前序版本明细（仅含 Cant > 0 的行）
    /// - `item_names`: 物料名称
    ///
    /// # 规则
    /// - Cantidad 行取逐月 Cant
    /// - Precio 行将该元组最后一个非零 PrecioUN 广播到 12 个月，无则 0
    /// - 缺失的 TipoForecast / Metrica 以全零行补齐
    pub fn from_stored_forecast(
        details: &[ForecastDetail],
        item_names: &HashMap<String, String>,
    ) -> Self {
        struct Acc {
            doc_cur: String,
            linea: Linea,
            cant: MonthValues,
            precio: f64,
        }

        let mut grouped: BTreeMap<(String, TipoForecast, String), Acc> = BTreeMap::new();
        for d in details {
            let Some(idx) = mes_index(fecha_to_mes(d.fech_entr)) else {
                continue;
            };
            let acc = grouped
                .entry((d.item_code.clone(), d.tipo_forecast, d.ocr_code3.clone()))
                .or_insert_with(|| Acc {
                    doc_cur: d.doc_cur.clone(),
                    linea: d.linea,
                    cant: [0.0; 12],
                    precio: 0.0,
                });
            acc.cant[idx] += d.cant;
            acc.doc_cur = d.doc_cur.clone();
            if d.precio_un != 0.0 {
                acc.precio = d.precio_un;
            }
        }

        let mut buffer = Self::new();
        for ((item_code, tipo_forecast, ocr_code3), acc) in grouped {
            let item_name = item_names.get(&item_code).cloned();
            for (metrica, months) in [
                (Metrica::Cantidad, acc.cant),
                (Metrica::Precio, [acc.precio; 12]),
            ] {
                buffer.rows.insert(
                    RowKey {
                        item_code: item_code.clone(),
                        tipo_forecast,
                        metrica,
                        ocr_code3: ocr_code3.clone(),
                    },
                    BufferRow {
                        doc_cur: acc.doc_cur.clone(),
                        linea: acc.linea,
                        item_name: item_name.clone(),
                        months,
                    },
                );
            }
        }
        buffer.ensure_grid();
        buffer
    }

    /// 由宽表行构建（同键行按单元合并，属性取最后一行）
    ///
    /// NaN 单元按 0 处理
    pub fn from_wide_rows(rows: Vec<WideRow>) -> Self {
        let mut buffer = Self::new();
        for row in rows {
            let key = row.key();
            let linea = row
                .linea
                .unwrap_or_else(|| Linea::from_ocr_code3(&row.ocr_code3));
            let months = row.months.map(|v| if v.is_nan() { 0.0 } else { v });

            match buffer.rows.get_mut(&key) {
                Some(existing) => {
                    for (cell, add) in existing.months.iter_mut().zip(months.iter()) {
                        *cell += add;
                    }
                    existing.doc_cur = row.doc_cur;
                    existing.linea = linea;
                    if row.item_name.is_some() {
                        existing.item_name = row.item_name;
                    }
                }
                None => {
                    buffer.rows.insert(
                        key,
                        BufferRow {
                            doc_cur: row.doc_cur,
                            linea,
                            item_name: row.item_name,
                            months,
                        },
                    );
                }
            }
        }
        buffer
    }

    /// 导出为宽表行（按键有序）
    pub fn to_wide_rows(&self) -> Vec<WideRow> {
        self.rows
            .iter()
            .map(|(key, row)| WideRow {
                item_code: key.item_code.clone(),
                tipo_forecast: key.tipo_forecast,
                metrica: key.metrica,
                ocr_code3: key.ocr_code3.clone(),
                doc_cur: row.doc_cur.clone(),
                item_name: row.item_name.clone(),
                linea: Some(row.linea),
                months: row.months,
            })
            .collect()
    }

    // ==========================================
    // 网格完整性
    // ==========================================

    /// 当前所有基底
    pub fn bases(&self) -> BTreeSet<BufferBase> {
        self.rows
            .iter()
            .map(|(key, row)| BufferBase {
                item_code: key.item_code.clone(),
                ocr_code3: key.ocr_code3.clone(),
                doc_cur: row.doc_cur.clone(),
            })
            .collect()
    }

    /// 补齐每个 (ItemCode, OcrCode3) 的 4 行，缺失行全零
    ///
    /// 补齐行的 DocCur / Linea / ItemName 取自同组已有行
    pub fn ensure_grid(&mut self) {
        let mut templates: BTreeMap<(String, String), BufferRow> = BTreeMap::new();
        for (key, row) in &self.rows {
            templates
                .entry((key.item_code.clone(), key.ocr_code3.clone()))
                .or_insert_with(|| row.clone());
        }

        for ((item_code, ocr_code3), template) in templates {
            for tipo_forecast in TipoForecast::ALL {
                for metrica in Metrica::ALL {
                    let key = RowKey {
                        item_code: item_code.clone(),
                        tipo_forecast,
                        metrica,
                        ocr_code3: ocr_code3.clone(),
                    };
                    self.rows
                        .entry(key)
                        .or_insert_with(|| BufferRow::zeroed_like(&template));
                }
            }
        }
    }

    /// 网格完整: 行数 = 4 × 基底数，且每个基底 4 行齐全
    pub fn is_grid_complete(&self) -> bool {
        let bases = self.bases();
        if self.rows.len() != 4 * bases.len() {
            return false;
        }
        bases.iter().all(|base| {
            TipoForecast::ALL.iter().all(|tipo| {
                Metrica::ALL.iter().all(|metrica| {
                    let key = RowKey {
                        item_code: base.item_code.clone(),
                        tipo_forecast: *tipo,
                        metrica: *metrica,
                        ocr_code3: base.ocr_code3.clone(),
                    };
                    self.rows
                        .get(&key)
                        .map(|r| r.doc_cur == base.doc_cur)
                        .unwrap_or(false)
                })
            })
        })
    }

    // ==========================================
    // 结构哈希
    // ==========================================

    /// 缓冲区结构哈希（SHA-256，十六进制）
    ///
    /// 覆盖键、DocCur 与全部月份单元；单元按 6 位小数规范化
    pub fn structural_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, row) in &self.rows {
            hasher.update(key.item_code.as_bytes());
            hasher.update(b"|");
            hasher.update(key.tipo_forecast.as_str().as_bytes());
            hasher.update(b"|");
            hasher.update(key.metrica.as_str().as_bytes());
            hasher.update(b"|");
            hasher.update(key.ocr_code3.as_bytes());
            hasher.update(b"|");
            hasher.update(row.doc_cur.as_bytes());
            for v in row.months {
                hasher.update(format!("|{:.6}", v).as_bytes());
            }
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Cantidad 行的非零单元数
    pub fn non_zero_quantity_cells(&self) -> usize {
        self.rows
            .iter()
            .filter(|(key, _)| key.metrica == Metrica::Cantidad)
            .map(|(_, row)| row.months.iter().filter(|v| **v != 0.0).count())
            .sum()
    }
}
