// ==========================================
// 销售预测引擎 - 缓冲区重建器
// ==========================================
// 保存成功后直接从存储重建缓冲区，保证 UI 与落库内容一致
// 输出网格: 基底 × {Firme, Proyectado} × {Cantidad, Precio} × 12 个月
// ==========================================

use crate::domain::forecast::{ForecastDetail, ForecastScope, LongRow};
use crate::domain::types::fecha_to_mes;
use crate::engine::buffer::EditBuffer;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::transformer::long_to_wide;
use crate::repository::forecast_repo::ForecastRepository;
use crate::repository::reference_repo::ReferenceRepository;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// 重建结果
#[derive(Debug, Clone)]
pub struct Rehydrated {
    pub buffer: EditBuffer,
    pub hash: String,
}

pub struct Rehydrator {
    repo: Arc<ForecastRepository>,
    reference: Arc<ReferenceRepository>,
}

impl Rehydrator {
    pub fn new(repo: Arc<ForecastRepository>, reference: Arc<ReferenceRepository>) -> Self {
        Self { repo, reference }
    }

    /// 从指定版本重建客户当年的缓冲区（只读，可独立重试）
    pub fn rehydrate(&self, forecast_id: i64, scope: &ForecastScope) -> EngineResult<Rehydrated> {
        let fail = |message: String| EngineError::RehydrateFailure {
            forecast_id,
            message,
        };

        let details = self
            .repo
            .find_detail(forecast_id, scope)
            .map_err(|e| fail(e.to_string()))?;
        let long = dedup_keep_last(&details);

        let mut rows = long_to_wide(&long);
        let codes: Vec<String> = rows
            .iter()
            .map(|r| r.item_code.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let names = self
            .reference
            .item_names(&codes)
            .map_err(|e| fail(e.to_string()))?;
        for row in rows.iter_mut() {
            row.item_name = names.get(&row.item_code).cloned();
        }

        let mut buffer = EditBuffer::from_wide_rows(rows);
        buffer.ensure_grid();
        if !buffer.is_grid_complete() {
            return Err(fail(format!(
                "网格不完整: {} 行 / {} 个基底",
                buffer.len(),
                buffer.bases().len()
            )));
        }

        let hash = buffer.structural_hash();
        debug!(
            forecast_id,
            card_code = %scope.card_code,
            rows = buffer.len(),
            "缓冲区已重建"
        );
        Ok(Rehydrated { buffer, hash })
    }
}

/// 明细已按 (FechEntr, 插入顺序) 排序；按 (ItemCode, TipoForecast, OcrCode3, DocCur, Mes) 保留最后值
fn dedup_keep_last(details: &[ForecastDetail]) -> Vec<LongRow> {
    let mut position: HashMap<(String, String, String, String, String), usize> = HashMap::new();
    let mut out: Vec<LongRow> = Vec::with_capacity(details.len());

    for d in details {
        let mes = fecha_to_mes(d.fech_entr).to_string();
        let key = (
            d.item_code.clone(),
            d.tipo_forecast.as_str().to_string(),
            d.ocr_code3.clone(),
            d.doc_cur.clone(),
            mes.clone(),
        );
        let row = LongRow {
            slp_code: d.slp_code,
            card_code: d.card_code.clone(),
            item_code: d.item_code.clone(),
            tipo_forecast: d.tipo_forecast,
            ocr_code3: d.ocr_code3.clone(),
            linea: d.linea,
            doc_cur: d.doc_cur.clone(),
            mes,
            fech_entr: d.fech_entr,
            cant: d.cant,
            precio_un: d.precio_un,
        };
        match position.get(&key) {
            Some(idx) => out[*idx] = row,
            None => {
                position.insert(key, out.len());
                out.push(row);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::forecast::RowKey;
    use crate::domain::types::{Linea, Metrica, TipoForecast};
    use crate::repository::gateway::StorageGateway;
    use chrono::{NaiveDate, NaiveDateTime};
    use rusqlite::types::Value;

    fn setup() -> (Rehydrator, Arc<ForecastRepository>) {
        let gateway = Arc::new(StorageGateway::open_in_memory().unwrap());
        gateway
            .execute(
                "INSERT INTO OITM (ItemCode, ItemName, ItmsGrpNam) VALUES (?1, ?2, ?3)",
                &[
                    Value::from("I100".to_string()),
                    Value::from("Urea".to_string()),
                    Value::from("Fert".to_string()),
                ],
            )
            .unwrap();
        let repo = Arc::new(ForecastRepository::new(Arc::clone(&gateway)));
        let reference = Arc::new(ReferenceRepository::new(gateway));
        (Rehydrator::new(Arc::clone(&repo), reference), repo)
    }

    fn detail(forecast_id: i64, month: u32, cant: f64) -> ForecastDetail {
        ForecastDetail {
            forecast_id,
            slp_code: 10,
            card_code: "C002".to_string(),
            item_code: "I100".to_string(),
            tipo_forecast: TipoForecast::Firme,
            ocr_code3: "Pta-Nutr".to_string(),
            linea: Linea::Planta,
            fech_entr: NaiveDate::from_ymd_opt(2025, month, 1).unwrap(),
            cant,
            precio_un: 1500.0,
            doc_cur: "CLP".to_string(),
        }
    }

    #[test]
    fn test_rehydrate_builds_full_grid() {
        let (rehydrator, repo) = setup();
        let at = NaiveDateTime::parse_from_str("2025-06-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let id = repo
            .gateway()
            .write_transaction(|tx| {
                let id = ForecastRepository::insert_header_tx(tx, 10, at)?;
                ForecastRepository::upsert_details_tx(tx, &[detail(id, 7, 10.0), detail(id, 8, 20.0)])?;
                Ok(id)
            })
            .unwrap();

        let scope = ForecastScope::new(10, "C002", 2025);
        let out = rehydrator.rehydrate(id, &scope).unwrap();

        assert_eq!(out.buffer.len(), 4);
        assert!(out.buffer.is_grid_complete());
        assert_eq!(out.hash, out.buffer.structural_hash());

        let key = RowKey {
            item_code: "I100".to_string(),
            tipo_forecast: TipoForecast::Firme,
            metrica: Metrica::Cantidad,
            ocr_code3: "Pta-Nutr".to_string(),
        };
        let cant = out.buffer.get(&key).unwrap();
        assert_eq!(cant.months[6], 10.0);
        assert_eq!(cant.months[7], 20.0);
        assert_eq!(cant.months.iter().filter(|v| **v == 0.0).count(), 10);
        assert_eq!(cant.item_name.as_deref(), Some("Urea"));

        let proyectado = RowKey {
            tipo_forecast: TipoForecast::Proyectado,
            ..key
        };
        assert!(out.buffer.get(&proyectado).unwrap().months.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_rehydrate_empty_forecast() {
        let (rehydrator, _repo) = setup();
        let scope = ForecastScope::new(10, "C002", 2025);
        let out = rehydrator.rehydrate(999, &scope).unwrap();
        assert!(out.buffer.is_empty());
    }

    #[test]
    fn test_dedup_keeps_last() {
        let mut later = detail(1, 7, 30.0);
        later.precio_un = 10.0;
        let rows = dedup_keep_last(&[detail(1, 7, 10.0), detail(1, 8, 5.0), later]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cant, 30.0);
        assert_eq!(rows[0].precio_un, 10.0);
        assert_eq!(rows[1].mes, "08");
    }
}
