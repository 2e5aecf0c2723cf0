// ==========================================
// 销售预测引擎 - 保存编排器
// ==========================================
// 每个已编辑客户:
//   缓冲区 → 长表 → 前序版本 → 增量 → 写入 → 重建 → 清除编辑标记
// 错误按客户隔离；循环结束后清空已编辑集合
// ==========================================

use crate::config::engine_config::EngineConfig;
use crate::domain::forecast::{ChangeKind, ForecastScope, WideRow};
use crate::engine::buffer::EditBuffer;
use crate::engine::delta::{DeltaComputer, DeltaSet};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::rehydrator::Rehydrator;
use crate::engine::session::{CustomerBuffer, EditState, SessionState};
use crate::engine::synchronizer::synchronize;
use crate::engine::transformer::wide_to_long;
use crate::engine::writer::{VersionedWriter, WriteOutcome};
use crate::perf::PerfGuard;
use crate::repository::forecast_repo::{ForecastRepository, PriorForecast};
use crate::repository::gateway::StorageGateway;
use crate::repository::reference_repo::ReferenceRepository;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

// ==========================================
// 保存报告
// ==========================================

/// 单客户保存结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaveOutcome {
    Persisted {
        forecast_id: i64,
        prior_forecast_id: Option<i64>,
        additions: usize,
        modifications: usize,
        removals: usize,
    },
    NoChange,
    Failed {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSaveOutcome {
    pub card_code: String,
    pub outcome: SaveOutcome,
}

/// 一次保存操作的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveReport {
    pub run_id: String,
    pub slp_code: i64,
    pub year: i32,
    pub outcomes: Vec<CustomerSaveOutcome>,
    pub warnings: Vec<String>,
}

impl SaveReport {
    pub fn outcome_for(&self, card_code: &str) -> Option<&SaveOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.card_code == card_code)
            .map(|o| &o.outcome)
    }

    /// 本次新建的 ForecastID（按保存顺序）
    pub fn persisted_ids(&self) -> Vec<i64> {
        self.outcomes
            .iter()
            .filter_map(|o| match o.outcome {
                SaveOutcome::Persisted { forecast_id, .. } => Some(forecast_id),
                _ => None,
            })
            .collect()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, SaveOutcome::Failed { .. }))
            .count()
    }

    pub fn is_partial(&self) -> bool {
        self.failed_count() > 0 && self.failed_count() < self.outcomes.len()
    }
}

/// 单客户写入成功后的中间结果
struct PersistedSave {
    write: WriteOutcome,
    prior: Option<PriorForecast>,
    delta: DeltaSet,
}

// ==========================================
// SaveOrchestrator
// ==========================================
pub struct SaveOrchestrator {
    config: EngineConfig,
    reference: Arc<ReferenceRepository>,
    writer: VersionedWriter,
    rehydrator: Rehydrator,
    delta: DeltaComputer,
}

impl SaveOrchestrator {
    pub fn new(gateway: Arc<StorageGateway>, config: EngineConfig) -> Self {
        let repo = Arc::new(ForecastRepository::new(Arc::clone(&gateway)));
        let reference = Arc::new(ReferenceRepository::new(gateway));
        Self {
            writer: VersionedWriter::new(Arc::clone(&repo), config.tolerance),
            rehydrator: Rehydrator::new(repo, Arc::clone(&reference)),
            delta: DeltaComputer::new(config.duplicate_policy, config.tolerance),
            reference,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ==========================================
    // 打开客户
    // ==========================================

    /// 打开客户（懒加载最新存储版本并补齐网格）
    ///
    /// 已打开且年度一致时不重复加载；年度不同则重新加载并丢弃编辑标记。
    /// 打开后通过 `session.customer(card_code)` 读取缓冲区
    pub fn open_customer(
        &self,
        session: &mut SessionState,
        card_code: &str,
        year: i32,
    ) -> EngineResult<()> {
        let needs_load = session
            .customer(card_code)
            .map_or(true, |c| c.year != year);

        if needs_load {
            let now = chrono::Local::now().naive_local();
            let scope = ForecastScope::new(session.slp_code, card_code, year);
            let (buffer, prior) = self.load_buffer(&scope, now)?;
            session.unmark_edited(card_code);
            session.insert_customer(card_code, CustomerBuffer::new(year, buffer));
            match prior {
                Some(p) => session.cache_active_forecast_id(card_code, year, p.forecast_id),
                None => session.invalidate_active_forecast_id(card_code, year),
            }
        }

        if session.customer(card_code).is_none() {
            return Err(EngineError::InvariantViolation(format!(
                "客户缓冲区缺失: {}",
                card_code
            )));
        }
        Ok(())
    }

    /// 从最新存储版本构建缓冲区
    fn load_buffer(
        &self,
        scope: &ForecastScope,
        now: NaiveDateTime,
    ) -> EngineResult<(EditBuffer, Option<PriorForecast>)> {
        let _perf = PerfGuard::new("engine.open_customer").with_label(scope.card_code.clone());

        let prior = self.writer.find_prior(scope, now)?;
        let details = match &prior {
            Some(p) => self.writer.load_prior_detail(p, scope)?,
            None => Vec::new(),
        };
        let codes: Vec<String> = details
            .iter()
            .map(|d| d.item_code.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let names = self.reference.item_names(&codes)?;

        Ok((EditBuffer::from_stored_forecast(&details, &names), prior))
    }

    // ==========================================
    // 编辑器快照
    // ==========================================

    /// 合并编辑器快照；返回是否有单元变更
    ///
    /// 快照与当前缓冲区结构哈希一致时直接短路
    pub fn apply_editor_snapshot(
        &self,
        session: &mut SessionState,
        card_code: &str,
        year: i32,
        editor: &[WideRow],
    ) -> EngineResult<bool> {
        self.open_customer(session, card_code, year)?;
        let customer = session.customer_mut(card_code).ok_or_else(|| {
            EngineError::InvariantViolation(format!("客户缓冲区缺失: {}", card_code))
        })?;

        let mut incoming = EditBuffer::from_wide_rows(editor.to_vec());
        incoming.ensure_grid();
        if incoming.len() == editor.len()
            && incoming.structural_hash() == customer.buffer.structural_hash()
        {
            return Ok(false);
        }

        let sync = synchronize(&customer.buffer, editor, self.config.tolerance)?;
        customer.buffer = sync.buffer;
        if sync.has_changes {
            customer.begin_edit();
            session.mark_edited(card_code);
            info!(
                card_code = %card_code,
                changed_cells = sync.changed_cells,
                "编辑器快照已合并"
            );
        }
        Ok(sync.has_changes)
    }

    // ==========================================
    // 保存
    // ==========================================

    /// 保存全部已编辑客户（时间戳取本地当前时间）
    pub fn save(&self, session: &mut SessionState, year: i32) -> SaveReport {
        self.save_with_clock(session, year, || chrono::Local::now().naive_local())
    }

    /// 以固定时间戳保存
    pub fn save_at(&self, session: &mut SessionState, year: i32, now: NaiveDateTime) -> SaveReport {
        self.save_with_clock(session, year, || now)
    }

    fn save_with_clock<F>(&self, session: &mut SessionState, year: i32, mut clock: F) -> SaveReport
    where
        F: FnMut() -> NaiveDateTime,
    {
        let _perf = PerfGuard::new("engine.save");
        let run_id = Uuid::new_v4().to_string();
        let customers = session.edited_customers();
        info!(
            run_id = %run_id,
            slp_code = session.slp_code,
            year,
            customers = customers.len(),
            "开始保存"
        );

        let mut outcomes = Vec::with_capacity(customers.len());
        let mut warnings = Vec::new();

        for card_code in customers {
            let scope = ForecastScope::new(session.slp_code, card_code.clone(), year);
            let outcome = self.save_one(session, &scope, clock(), &mut warnings);
            outcomes.push(CustomerSaveOutcome { card_code, outcome });
        }

        session.clear_edited();

        let report = SaveReport {
            run_id,
            slp_code: session.slp_code,
            year,
            outcomes,
            warnings,
        };
        info!(
            run_id = %report.run_id,
            persisted = report.persisted_ids().len(),
            failed = report.failed_count(),
            "保存结束"
        );
        report
    }

    /// 单客户保存（错误在此收敛为结果，不向外传播）
    fn save_one(
        &self,
        session: &mut SessionState,
        scope: &ForecastScope,
        now: NaiveDateTime,
        warnings: &mut Vec<String>,
    ) -> SaveOutcome {
        let card_code = scope.card_code.as_str();
        let Some(customer) = session.customer_mut(card_code) else {
            return failed(&EngineError::InvariantViolation(format!(
                "客户未打开: {}",
                card_code
            )));
        };
        if customer.year != scope.year {
            let err = EngineError::InvariantViolation(format!(
                "缓冲区年度 {} 与保存年度 {} 不一致",
                customer.year, scope.year
            ));
            customer.mark_failed();
            return failed(&err);
        }

        customer.request_save();
        let snapshot = customer.buffer.clone();

        match self.persist_customer(scope, &snapshot, now, warnings) {
            Ok(saved) => {
                session.invalidate_active_forecast_id(card_code, scope.year);
                let forecast_id = saved.write.forecast_id;

                match self.rehydrator.rehydrate(forecast_id, scope) {
                    Ok(rehydrated) => {
                        if let Some(customer) = session.customer_mut(card_code) {
                            customer.mark_persisted(rehydrated.buffer, rehydrated.hash);
                            customer.reset_clean();
                        }
                    }
                    Err(e) => {
                        warn!(card_code = %card_code, forecast_id, error = %e, "缓冲区重建失败");
                        warnings.push(format!("{}: {}", card_code, e));
                        session.drop_customer(card_code);
                    }
                }

                SaveOutcome::Persisted {
                    forecast_id,
                    prior_forecast_id: saved.prior.map(|p| p.forecast_id),
                    additions: saved.delta.count(ChangeKind::Addition),
                    modifications: saved.delta.count(ChangeKind::Modification),
                    removals: saved.delta.count(ChangeKind::Removal),
                }
            }
            Err(EngineError::NoChange) => {
                if let Some(customer) = session.customer_mut(card_code) {
                    customer.reset_clean();
                }
                info!(card_code = %card_code, "无变更，跳过");
                SaveOutcome::NoChange
            }
            Err(e) => {
                error!(card_code = %card_code, code = e.code(), error = %e, "客户保存失败");
                if let Some(customer) = session.customer_mut(card_code) {
                    customer.mark_failed();
                }
                failed(&e)
            }
        }
    }

    /// 长表 → 前序版本 → 增量 → 写入
    fn persist_customer(
        &self,
        scope: &ForecastScope,
        buffer: &EditBuffer,
        now: NaiveDateTime,
        warnings: &mut Vec<String>,
    ) -> EngineResult<PersistedSave> {
        let _perf = PerfGuard::new("engine.persist_customer").with_label(scope.card_code.clone());

        let candidates = wide_to_long(&buffer.to_wide_rows(), scope, &self.config.default_doc_cur)?;

        let prior = self.writer.find_prior(scope, now)?;
        let prior_detail = match &prior {
            Some(p) => Some(self.writer.load_prior_detail(p, scope)?),
            None => None,
        };

        let delta = self
            .delta
            .compute(&scope.card_code, &candidates, prior_detail.as_deref())?;
        warnings.extend(delta.warnings.iter().cloned());
        if delta.is_empty() {
            // 版本只由数量驱动；仅改单价的单元不会落库
            if delta.price_only_cells > 0 {
                warn!(
                    card_code = %scope.card_code,
                    cells = delta.price_only_cells,
                    "仅单价变更，未生成新版本"
                );
                warnings.push(format!(
                    "{}: {} 个单元仅单价变更（数量未变），未生成新版本",
                    scope.card_code, delta.price_only_cells
                ));
            }
            return Err(EngineError::NoChange);
        }

        let write = self.writer.persist(scope, &candidates, &delta.rows, now)?;
        Ok(PersistedSave {
            write,
            prior,
            delta,
        })
    }

    /// 重新从指定版本重建客户缓冲区（只读）
    pub fn reload_from(
        &self,
        session: &mut SessionState,
        card_code: &str,
        year: i32,
        forecast_id: i64,
    ) -> EngineResult<EditState> {
        let scope = ForecastScope::new(session.slp_code, card_code, year);
        let rehydrated = self.rehydrator.rehydrate(forecast_id, &scope)?;
        let mut customer = CustomerBuffer::new(year, rehydrated.buffer);
        customer.hash = rehydrated.hash;
        session.unmark_edited(card_code);
        session.insert_customer(card_code, customer);
        Ok(EditState::Clean)
    }
}

fn failed(err: &EngineError) -> SaveOutcome {
    SaveOutcome::Failed {
        code: err.code().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests;
