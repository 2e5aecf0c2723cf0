// ==========================================
// 销售预测引擎 - 预测编辑 API
// ==========================================
// 职责: 打开客户、合并编辑器快照、保存、历史查询
// 会话: 每个销售员一个 SessionState（进程内）
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::engine_config::EngineConfig;
use crate::domain::forecast::{ForecastDetail, ForecastHeader, ForecastLogDetail, RowKey, WideRow};
use crate::domain::reference::Customer;
use crate::domain::types::{mes_index, year_bounds};
use crate::engine::orchestrator::{SaveOrchestrator, SaveReport};
use crate::engine::session::{CustomerBuffer, EditState, SessionState};
use crate::importer::snapshot_importer::SnapshotImporter;
use crate::repository::forecast_repo::ForecastRepository;
use crate::repository::gateway::StorageGateway;
use crate::repository::reference_repo::ReferenceRepository;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// 历史表头默认条数
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// ==========================================
// CustomerView - 客户缓冲区视图
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerView {
    pub slp_code: i64,
    pub card_code: String,
    pub year: i32,
    pub state: EditState,
    pub hash: String,
    /// 当前生效的存储版本（新客户为 None）
    pub active_forecast_id: Option<i64>,
    pub rows: Vec<WideRow>,
}

impl CustomerView {
    fn from_buffer(session: &SessionState, card_code: &str, customer: &CustomerBuffer) -> Self {
        Self {
            slp_code: session.slp_code,
            card_code: card_code.to_string(),
            year: customer.year,
            state: customer.state(),
            hash: customer.hash.clone(),
            active_forecast_id: session.active_forecast_id(card_code, customer.year),
            rows: customer.buffer.to_wide_rows(),
        }
    }
}

// ==========================================
// ForecastApi
// ==========================================
pub struct ForecastApi {
    orchestrator: SaveOrchestrator,
    forecast_repo: Arc<ForecastRepository>,
    reference_repo: Arc<ReferenceRepository>,
    sessions: Mutex<HashMap<i64, SessionState>>,
}

impl ForecastApi {
    pub fn new(gateway: Arc<StorageGateway>, config: EngineConfig) -> Self {
        Self {
            forecast_repo: Arc::new(ForecastRepository::new(Arc::clone(&gateway))),
            reference_repo: Arc::new(ReferenceRepository::new(Arc::clone(&gateway))),
            orchestrator: SaveOrchestrator::new(gateway, config),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.orchestrator.config()
    }

    fn lock_sessions(&self) -> ApiResult<MutexGuard<'_, HashMap<i64, SessionState>>> {
        self.sessions
            .lock()
            .map_err(|e| ApiError::InternalError(format!("会话锁获取失败: {}", e)))
    }

    // ==========================================
    // 编辑
    // ==========================================

    /// 打开客户缓冲区
    ///
    /// # 参数
    /// - slp_code: 销售员
    /// - card_code: 客户
    /// - year: 年度
    ///
    /// # 返回
    /// - Ok(CustomerView): 补齐网格后的缓冲区
    pub fn open_customer(&self, slp_code: i64, card_code: &str, year: i32) -> ApiResult<CustomerView> {
        validate_scope(slp_code, card_code, year)?;

        let mut sessions = self.lock_sessions()?;
        let session = sessions
            .entry(slp_code)
            .or_insert_with(|| SessionState::new(slp_code));
        self.orchestrator.open_customer(session, card_code, year)?;
        let customer = session
            .customer(card_code)
            .ok_or_else(|| ApiError::InternalError(format!("客户缓冲区缺失: {}", card_code)))?;
        Ok(CustomerView::from_buffer(session, card_code, customer))
    }

    /// 合并编辑器快照
    ///
    /// # 返回
    /// - Ok(true): 有单元变更，客户进入 Editing
    /// - Ok(false): 无变更
    pub fn apply_snapshot(
        &self,
        slp_code: i64,
        card_code: &str,
        year: i32,
        rows: &[WideRow],
    ) -> ApiResult<bool> {
        validate_scope(slp_code, card_code, year)?;

        let mut sessions = self.lock_sessions()?;
        let session = sessions
            .entry(slp_code)
            .or_insert_with(|| SessionState::new(slp_code));
        Ok(self
            .orchestrator
            .apply_editor_snapshot(session, card_code, year, rows)?)
    }

    /// 从 CSV/XLSX 文件读取快照并合并
    pub fn import_snapshot_file<P: AsRef<Path>>(
        &self,
        slp_code: i64,
        card_code: &str,
        year: i32,
        file_path: P,
    ) -> ApiResult<bool> {
        let importer = SnapshotImporter::new(self.config().default_doc_cur.clone());
        let rows = importer.import(file_path.as_ref())?;
        info!(
            slp_code,
            card_code = %card_code,
            file = %file_path.as_ref().display(),
            rows = rows.len(),
            "导入编辑器快照"
        );
        self.apply_snapshot(slp_code, card_code, year, &rows)
    }

    /// 修改单个单元（以整表快照形式提交）
    pub fn edit_cell(
        &self,
        slp_code: i64,
        card_code: &str,
        year: i32,
        key: &RowKey,
        mes: &str,
        value: f64,
    ) -> ApiResult<bool> {
        let idx = mes_index(mes).ok_or_else(|| ApiError::InvalidInput(format!("非法月份: {}", mes)))?;
        let view = self.open_customer(slp_code, card_code, year)?;

        let mut rows = view.rows;
        let row = rows
            .iter_mut()
            .find(|r| &r.key() == key)
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "{}/{}/{}/{}",
                    key.item_code, key.tipo_forecast, key.metrica, key.ocr_code3
                ))
            })?;
        row.months[idx] = value;

        self.apply_snapshot(slp_code, card_code, year, &rows)
    }

    /// 客户编辑状态（未打开返回 None）
    pub fn customer_state(&self, slp_code: i64, card_code: &str) -> ApiResult<Option<EditState>> {
        let sessions = self.lock_sessions()?;
        Ok(sessions
            .get(&slp_code)
            .and_then(|s| s.state_of(card_code)))
    }

    /// 丢弃客户缓冲区（下次打开从存储重新加载）
    pub fn close_customer(&self, slp_code: i64, card_code: &str) -> ApiResult<()> {
        let mut sessions = self.lock_sessions()?;
        if let Some(session) = sessions.get_mut(&slp_code) {
            session.unmark_edited(card_code);
            session.drop_customer(card_code);
        }
        Ok(())
    }

    /// 从指定历史版本重建客户缓冲区
    pub fn reload_from(
        &self,
        slp_code: i64,
        card_code: &str,
        year: i32,
        forecast_id: i64,
    ) -> ApiResult<CustomerView> {
        validate_scope(slp_code, card_code, year)?;
        if self.forecast_repo.find_header(forecast_id)?.is_none() {
            return Err(ApiError::NotFound(format!("Forecast(id={})", forecast_id)));
        }

        let mut sessions = self.lock_sessions()?;
        let session = sessions
            .entry(slp_code)
            .or_insert_with(|| SessionState::new(slp_code));
        self.orchestrator
            .reload_from(session, card_code, year, forecast_id)?;
        let customer = session
            .customer(card_code)
            .ok_or_else(|| ApiError::InternalError(format!("客户缓冲区缺失: {}", card_code)))?;
        Ok(CustomerView::from_buffer(session, card_code, customer))
    }

    // ==========================================
    // 保存
    // ==========================================

    /// 保存销售员全部已编辑客户
    pub fn save(&self, slp_code: i64, year: i32) -> ApiResult<SaveReport> {
        validate_year(year)?;
        let mut sessions = self.lock_sessions()?;
        let session = sessions
            .entry(slp_code)
            .or_insert_with(|| SessionState::new(slp_code));
        Ok(self.orchestrator.save(session, year))
    }

    /// 以固定时间戳保存
    pub fn save_at(&self, slp_code: i64, year: i32, now: NaiveDateTime) -> ApiResult<SaveReport> {
        validate_year(year)?;
        let mut sessions = self.lock_sessions()?;
        let session = sessions
            .entry(slp_code)
            .or_insert_with(|| SessionState::new(slp_code));
        Ok(self.orchestrator.save_at(session, year, now))
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn list_customers(&self, slp_code: i64) -> ApiResult<Vec<Customer>> {
        Ok(self.reference_repo.list_customers(slp_code)?)
    }

    /// 销售员历史版本（新 → 旧）
    pub fn list_history(&self, slp_code: i64, limit: Option<usize>) -> ApiResult<Vec<ForecastHeader>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit == 0 {
            return Err(ApiError::InvalidInput("limit 必须大于 0".to_string()));
        }
        Ok(self.forecast_repo.list_headers(slp_code, limit)?)
    }

    /// 客户变更日志
    pub fn list_logs(
        &self,
        slp_code: i64,
        card_code: &str,
        forecast_id: Option<i64>,
    ) -> ApiResult<Vec<ForecastLogDetail>> {
        Ok(self.forecast_repo.list_logs(slp_code, card_code, forecast_id)?)
    }

    /// 某版本落库明细
    pub fn stored_detail(&self, forecast_id: i64) -> ApiResult<Vec<ForecastDetail>> {
        if self.forecast_repo.find_header(forecast_id)?.is_none() {
            return Err(ApiError::NotFound(format!("Forecast(id={})", forecast_id)));
        }
        Ok(self.forecast_repo.find_detail_by_forecast(forecast_id)?)
    }
}

// ==========================================
// 参数校验
// ==========================================

fn validate_year(year: i32) -> ApiResult<()> {
    if year_bounds(year).is_none() {
        return Err(ApiError::InvalidInput(format!("非法年度: {}", year)));
    }
    Ok(())
}

fn validate_scope(slp_code: i64, card_code: &str, year: i32) -> ApiResult<()> {
    if slp_code <= 0 {
        return Err(ApiError::InvalidInput(format!("非法销售员编码: {}", slp_code)));
    }
    if card_code.trim().is_empty() {
        return Err(ApiError::InvalidInput("客户编码不能为空".to_string()));
    }
    validate_year(year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Metrica, TipoForecast};

    fn api() -> ForecastApi {
        let gateway = Arc::new(StorageGateway::open_in_memory().unwrap());
        ForecastApi::new(gateway, EngineConfig::default())
    }

    fn quantity_row(item: &str, month: usize, value: f64) -> WideRow {
        let mut months = [f64::NAN; 12];
        months[month] = value;
        WideRow {
            item_code: item.to_string(),
            tipo_forecast: TipoForecast::Firme,
            metrica: Metrica::Cantidad,
            ocr_code3: "Pta-Nutr".to_string(),
            doc_cur: "CLP".to_string(),
            item_name: None,
            linea: None,
            months,
        }
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_validate_scope() {
        let api = api();
        assert!(matches!(
            api.open_customer(0, "C001", 2025),
            Err(ApiError::InvalidInput(_))
        ));
        assert!(matches!(
            api.open_customer(10, "  ", 2025),
            Err(ApiError::InvalidInput(_))
        ));
        assert!(matches!(api.list_history(10, Some(0)), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_open_new_customer_is_clean() {
        let api = api();
        let view = api.open_customer(10, "C001", 2025).unwrap();
        assert_eq!(view.state, EditState::Clean);
        assert!(view.rows.is_empty());
        assert_eq!(view.active_forecast_id, None);
        assert_eq!(api.customer_state(10, "C001").unwrap(), Some(EditState::Clean));
        assert_eq!(api.customer_state(10, "C999").unwrap(), None);
    }

    #[test]
    fn test_apply_save_and_edit_cell() {
        let api = api();
        assert!(api
            .apply_snapshot(10, "C001", 2025, &[quantity_row("I100", 6, 10.0)])
            .unwrap());
        assert_eq!(api.customer_state(10, "C001").unwrap(), Some(EditState::Editing));

        let report = api.save_at(10, 2025, ts("2025-03-01 10:00:00")).unwrap();
        let ids = report.persisted_ids();
        assert_eq!(ids.len(), 1);
        assert_eq!(api.stored_detail(ids[0]).unwrap().len(), 1);

        let key = quantity_row("I100", 6, 10.0).key();
        assert!(api.edit_cell(10, "C001", 2025, &key, "07", 12.0).unwrap());
        assert!(!api.edit_cell(10, "C001", 2025, &key, "07", 12.0).unwrap());
        assert!(matches!(
            api.edit_cell(10, "C001", 2025, &key, "13", 1.0),
            Err(ApiError::InvalidInput(_))
        ));

        let report = api.save_at(10, 2025, ts("2025-03-02 10:00:00")).unwrap();
        assert_eq!(report.persisted_ids().len(), 1);
        let logs = api.list_logs(10, "C001", None).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].cantidad_anterior, 10.0);
        assert_eq!(logs[1].cantidad_nueva, 12.0);
        assert_eq!(api.list_history(10, None).unwrap().len(), 2);
    }

    #[test]
    fn test_stored_detail_unknown_forecast() {
        let api = api();
        assert!(matches!(api.stored_detail(999), Err(ApiError::NotFound(_))));
    }
}
