// ==========================================
// 销售预测引擎 - 会话状态
// ==========================================
// 每个用户会话一份，由会话处理方持有并按引用传递
// 内容: 各客户缓冲区 / 已编辑客户集合 / 当前版本缓存
// 状态机: Clean → Editing → PendingSave → Persisted → Clean
// ==========================================

use crate::engine::buffer::EditBuffer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// 客户编辑状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditState {
    Clean,
    Editing,
    PendingSave,
    Persisted,
}

impl EditState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditState::Clean => "CLEAN",
            EditState::Editing => "EDITING",
            EditState::PendingSave => "PENDING_SAVE",
            EditState::Persisted => "PERSISTED",
        }
    }
}

impl fmt::Display for EditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// CustomerBuffer - 单客户会话数据
// ==========================================
#[derive(Debug, Clone)]
pub struct CustomerBuffer {
    pub year: i32,
    pub buffer: EditBuffer,
    /// 最近一次加载/重建时的结构哈希
    pub hash: String,
    state: EditState,
}

impl CustomerBuffer {
    pub fn new(year: i32, buffer: EditBuffer) -> Self {
        let hash = buffer.structural_hash();
        Self {
            year,
            buffer,
            hash,
            state: EditState::Clean,
        }
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    /// 首个单元变更
    pub fn begin_edit(&mut self) {
        if matches!(self.state, EditState::Clean | EditState::Persisted) {
            self.state = EditState::Editing;
        }
    }

    /// 点击保存
    pub fn request_save(&mut self) {
        self.state = EditState::PendingSave;
    }

    /// 写入 + 重建成功
    pub fn mark_persisted(&mut self, buffer: EditBuffer, hash: String) {
        self.buffer = buffer;
        self.hash = hash;
        self.state = EditState::Persisted;
    }

    /// 写入失败，缓冲区保留
    pub fn mark_failed(&mut self) {
        self.state = EditState::Editing;
    }

    pub fn reset_clean(&mut self) {
        self.state = EditState::Clean;
    }
}

// ==========================================
// SessionState
// ==========================================
#[derive(Debug, Clone)]
pub struct SessionState {
    pub slp_code: i64,
    buffers: HashMap<String, CustomerBuffer>,
    edited: BTreeSet<String>,
    /// (CardCode, 年度) → 当前生效 ForecastID
    active_forecast_ids: HashMap<(String, i32), i64>,
}

impl SessionState {
    pub fn new(slp_code: i64) -> Self {
        Self {
            slp_code,
            buffers: HashMap::new(),
            edited: BTreeSet::new(),
            active_forecast_ids: HashMap::new(),
        }
    }

    pub fn customer(&self, card_code: &str) -> Option<&CustomerBuffer> {
        self.buffers.get(card_code)
    }

    pub fn customer_mut(&mut self, card_code: &str) -> Option<&mut CustomerBuffer> {
        self.buffers.get_mut(card_code)
    }

    pub fn insert_customer(&mut self, card_code: impl Into<String>, buffer: CustomerBuffer) {
        self.buffers.insert(card_code.into(), buffer);
    }

    /// 丢弃缓冲区，下次打开时重新加载
    pub fn drop_customer(&mut self, card_code: &str) -> Option<CustomerBuffer> {
        self.edited.remove(card_code);
        self.buffers.remove(card_code)
    }

    pub fn state_of(&self, card_code: &str) -> Option<EditState> {
        self.buffers.get(card_code).map(|c| c.state())
    }

    // ==========================================
    // 已编辑集合
    // ==========================================

    pub fn mark_edited(&mut self, card_code: &str) {
        self.edited.insert(card_code.to_string());
    }

    pub fn unmark_edited(&mut self, card_code: &str) {
        self.edited.remove(card_code);
    }

    pub fn is_edited(&self, card_code: &str) -> bool {
        self.edited.contains(card_code)
    }

    /// 已编辑客户（有序）
    pub fn edited_customers(&self) -> Vec<String> {
        self.edited.iter().cloned().collect()
    }

    pub fn clear_edited(&mut self) {
        self.edited.clear();
    }

    // ==========================================
    // 当前版本缓存
    // ==========================================

    pub fn active_forecast_id(&self, card_code: &str, year: i32) -> Option<i64> {
        self.active_forecast_ids
            .get(&(card_code.to_string(), year))
            .copied()
    }

    pub fn cache_active_forecast_id(&mut self, card_code: &str, year: i32, forecast_id: i64) {
        self.active_forecast_ids
            .insert((card_code.to_string(), year), forecast_id);
    }

    pub fn invalidate_active_forecast_id(&mut self, card_code: &str, year: i32) {
        self.active_forecast_ids.remove(&(card_code.to_string(), year));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_cycle() {
        let mut cb = CustomerBuffer::new(2025, EditBuffer::new());
        assert_eq!(cb.state(), EditState::Clean);
        cb.begin_edit();
        assert_eq!(cb.state(), EditState::Editing);
        cb.request_save();
        assert_eq!(cb.state(), EditState::PendingSave);
        cb.mark_failed();
        assert_eq!(cb.state(), EditState::Editing);
        cb.request_save();
        cb.mark_persisted(EditBuffer::new(), "h".to_string());
        assert_eq!(cb.state(), EditState::Persisted);
        assert_eq!(cb.hash, "h");
        cb.reset_clean();
        assert_eq!(cb.state(), EditState::Clean);
    }

    #[test]
    fn test_begin_edit_keeps_pending() {
        let mut cb = CustomerBuffer::new(2025, EditBuffer::new());
        cb.request_save();
        cb.begin_edit();
        assert_eq!(cb.state(), EditState::PendingSave);
    }

    #[test]
    fn test_edited_set_and_cache() {
        let mut session = SessionState::new(10);
        session.insert_customer("C002", CustomerBuffer::new(2025, EditBuffer::new()));
        session.mark_edited("C002");
        session.mark_edited("C001");
        assert_eq!(session.edited_customers(), vec!["C001", "C002"]);

        session.cache_active_forecast_id("C002", 2025, 7);
        assert_eq!(session.active_forecast_id("C002", 2025), Some(7));
        session.invalidate_active_forecast_id("C002", 2025);
        assert_eq!(session.active_forecast_id("C002", 2025), None);

        session.drop_customer("C002");
        assert!(!session.is_edited("C002"));
        assert!(session.customer("C002").is_none());
        session.clear_edited();
        assert!(session.edited_customers().is_empty());
    }
}
