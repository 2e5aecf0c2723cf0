// ==========================================
// 销售预测引擎 - 外部参照实体
// ==========================================
// 来源: OSLP / OCRD / OITM（只读）
// ==========================================

use serde::{Deserialize, Serialize};

/// 销售员 (OSLP)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Salesperson {
    pub slp_code: i64,
    pub slp_name: String,
}

/// 客户 (OCRD)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub card_code: String,
    pub card_name: String,
    pub slp_code: i64,
}

/// 物料 (OITM)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_code: String,
    pub item_name: String,
    pub group_name: Option<String>,
}
