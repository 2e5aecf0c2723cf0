// ==========================================
// 销售预测引擎 - 参照数据仓储（只读）
// ==========================================
// 表: OSLP / OCRD / OITM
// ==========================================

use crate::domain::reference::{Customer, Item, Salesperson};
use crate::repository::error::RepositoryResult;
use crate::repository::gateway::StorageGateway;
use rusqlite::types::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ReferenceRepository {
    gateway: Arc<StorageGateway>,
}

impl ReferenceRepository {
    pub fn new(gateway: Arc<StorageGateway>) -> Self {
        Self { gateway }
    }

    pub fn find_salesperson(&self, slp_code: i64) -> RepositoryResult<Option<Salesperson>> {
        let rows = self.gateway.query(
            "SELECT SlpCode, SlpName FROM OSLP WHERE SlpCode = ?1",
            &[Value::from(slp_code)],
            |row| {
                Ok(Salesperson {
                    slp_code: row.get(0)?,
                    slp_name: row.get(1)?,
                })
            },
        )?;
        Ok(rows.into_iter().next())
    }

    pub fn find_customer(&self, card_code: &str) -> RepositoryResult<Option<Customer>> {
        let rows = self.gateway.query(
            "SELECT CardCode, CardName, SlpCode FROM OCRD WHERE CardCode = ?1",
            &[Value::from(card_code.to_string())],
            map_customer,
        )?;
        Ok(rows.into_iter().next())
    }

    /// 销售员名下客户
    pub fn list_customers(&self, slp_code: i64) -> RepositoryResult<Vec<Customer>> {
        self.gateway.query(
            "SELECT CardCode, CardName, SlpCode FROM OCRD WHERE SlpCode = ?1 ORDER BY CardCode",
            &[Value::from(slp_code)],
            map_customer,
        )
    }

    pub fn find_item(&self, item_code: &str) -> RepositoryResult<Option<Item>> {
        let rows = self.gateway.query(
            "SELECT ItemCode, ItemName, ItmsGrpNam FROM OITM WHERE ItemCode = ?1",
            &[Value::from(item_code.to_string())],
            |row| {
                Ok(Item {
                    item_code: row.get(0)?,
                    item_name: row.get(1)?,
                    group_name: row.get(2)?,
                })
            },
        )?;
        Ok(rows.into_iter().next())
    }

    /// 批量查物料名称（未登记的物料不出现在结果中）
    pub fn item_names(&self, item_codes: &[String]) -> RepositoryResult<HashMap<String, String>> {
        if item_codes.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = (1..=item_codes.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT ItemCode, ItemName FROM OITM WHERE ItemCode IN ({})",
            placeholders
        );
        let values: Vec<Value> = item_codes.iter().cloned().map(Value::from).collect();

        let rows = self.gateway.query(&sql, &values, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.into_iter().collect())
    }
}

fn map_customer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        card_code: row.get(0)?,
        card_name: row.get(1)?,
        slp_code: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
    })
}
