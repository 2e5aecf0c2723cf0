// ==========================================
// 销售预测引擎 - 引擎运行配置
// ==========================================
// 存储: config_kv 表 (scope_id='global')
// 缺省值即规格默认值
// ==========================================

use crate::domain::types::{DEFAULT_DOC_CUR, DEFAULT_TOLERANCE};
use crate::repository::gateway::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 前序版本重复键的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    Mean,
    Sum,
    Error,
}

impl DuplicatePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Some(DuplicatePolicy::Mean),
            "sum" => Some(DuplicatePolicy::Sum),
            "error" => Some(DuplicatePolicy::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Mean => "mean",
            DuplicatePolicy::Sum => "sum",
            DuplicatePolicy::Error => "error",
        }
    }
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        DuplicatePolicy::Mean
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// EngineConfig
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub default_doc_cur: String,
    pub tolerance: f64,
    pub duplicate_policy: DuplicatePolicy,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_doc_cur: DEFAULT_DOC_CUR.to_string(),
            tolerance: DEFAULT_TOLERANCE,
            duplicate_policy: DuplicatePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}
