// ==========================================
// 销售预测引擎 - 版本化写入器
// ==========================================
// 顺序（单一写事务）: 表头 → 日志 → 定点 DELETE → UPSERT
// 红线:
// - 增量为空不分配 ForecastID
// - Cant = 0 的单元不落库
// - 前序表头及其明细不做任何修改
// ==========================================

use crate::domain::forecast::{ChangeKind, DeltaRow, ForecastDetail, ForecastScope, LongRow};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::forecast_repo::{ForecastRepository, PriorForecast};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// 一次写入的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub forecast_id: i64,
    pub logs_written: usize,
    pub cells_deleted: usize,
    pub cells_upserted: usize,
}

pub struct VersionedWriter {
    repo: Arc<ForecastRepository>,
    tolerance: f64,
}

impl VersionedWriter {
    pub fn new(repo: Arc<ForecastRepository>, tolerance: f64) -> Self {
        Self { repo, tolerance }
    }

    /// 前序版本查找（客户优先，销售员回退）
    pub fn find_prior(
        &self,
        scope: &ForecastScope,
        now: NaiveDateTime,
    ) -> EngineResult<Option<PriorForecast>> {
        Ok(self.repo.find_prior_forecast(scope, now)?)
    }

    /// 前序版本中该客户当年的明细
    pub fn load_prior_detail(
        &self,
        prior: &PriorForecast,
        scope: &ForecastScope,
    ) -> EngineResult<Vec<ForecastDetail>> {
        Ok(self.repo.find_detail(prior.forecast_id, scope)?)
    }

    /// 写入新版本
    ///
    /// # 参数
    /// - `candidates`: 客户当前完整长表（新表头承载 Cant > 0 的全部单元）
    /// - `deltas`: 增量行（驱动表头分配与日志）
    /// - `now`: Fecha_Carga 与日志时间戳
    ///
    /// # 返回
    /// - `deltas` 为空 → NoChange，不产生任何写入
    pub fn persist(
        &self,
        scope: &ForecastScope,
        candidates: &[LongRow],
        deltas: &[DeltaRow],
        now: NaiveDateTime,
    ) -> EngineResult<WriteOutcome> {
        if deltas.is_empty() {
            return Err(EngineError::NoChange);
        }

        let removals: Vec<DeltaRow> = deltas
            .iter()
            .filter(|d| d.kind == ChangeKind::Removal)
            .cloned()
            .collect();
        let kept: Vec<&LongRow> = candidates
            .iter()
            .filter(|c| c.cant > self.tolerance)
            .collect();
        if let Some(bad) = kept.iter().find(|c| c.precio_un < 0.0) {
            return Err(EngineError::InvariantViolation(format!(
                "单价为负: item={}, mes={}",
                bad.item_code, bad.mes
            )));
        }

        let upsert_ready = self.repo.gateway().ensure_unique_index()?;
        if !upsert_ready {
            warn!(
                card_code = %scope.card_code,
                "ux_ForecastDetalle 不可用，明细改用定点删除+插入"
            );
        }

        let outcome = self.repo.gateway().write_transaction(|tx| {
            let forecast_id = ForecastRepository::insert_header_tx(tx, scope.slp_code, now)?;
            let logs_written =
                ForecastRepository::insert_logs_tx(tx, forecast_id, scope.slp_code, deltas, now)?;
            let cells_deleted =
                ForecastRepository::delete_cells_tx(tx, forecast_id, scope.slp_code, &removals)?;

            let details: Vec<ForecastDetail> =
                kept.iter().map(|c| c.to_detail(forecast_id)).collect();
            let cells_upserted = if upsert_ready {
                ForecastRepository::upsert_details_tx(tx, &details)?
            } else {
                ForecastRepository::replace_details_tx(tx, &details)?
            };

            Ok(WriteOutcome {
                forecast_id,
                logs_written,
                cells_deleted,
                cells_upserted,
            })
        })?;

        info!(
            slp_code = scope.slp_code,
            card_code = %scope.card_code,
            forecast_id = outcome.forecast_id,
            logs = outcome.logs_written,
            upserted = outcome.cells_upserted,
            removals = removals.len(),
            "新版本已写入"
        );
        Ok(outcome)
    }
}
