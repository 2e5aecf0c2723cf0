// ==========================================
// 销售预测引擎 - 预测数据仓储
// ==========================================
// 表: Forecast / Forecast_Detalle / Forecast_LogDetalle
// 红线: Repository 不含业务逻辑，只做数据映射
// 红线: 表头只插入不更新；日志只追加
// ==========================================

use crate::domain::forecast::{
    DeltaRow, ForecastDetail, ForecastHeader, ForecastLogDetail, ForecastScope, DATE_FORMAT,
    TIMESTAMP_FORMAT,
};
use crate::domain::types::{year_bounds, Linea, TipoForecast};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::gateway::StorageGateway;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{Type, Value};
use rusqlite::{params, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DETAIL_COLUMNS: &str = "ForecastID, SlpCode, CardCode, ItemCode, TipoForecast, OcrCode3, \
                              Linea, FechEntr, Cant, PrecioUN, DocCur";

const UPSERT_DETAIL_SQL: &str = r#"
INSERT INTO Forecast_Detalle (
    ForecastID, SlpCode, CardCode, ItemCode, TipoForecast, OcrCode3,
    Linea, FechEntr, Cant, PrecioUN, DocCur
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT (ForecastID, SlpCode, CardCode, ItemCode, Linea, OcrCode3, TipoForecast, FechEntr)
DO UPDATE SET Cant = excluded.Cant, PrecioUN = excluded.PrecioUN, DocCur = excluded.DocCur
"#;

const INSERT_DETAIL_SQL: &str = r#"
INSERT INTO Forecast_Detalle (
    ForecastID, SlpCode, CardCode, ItemCode, TipoForecast, OcrCode3,
    Linea, FechEntr, Cant, PrecioUN, DocCur
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
"#;

const DELETE_CELL_SQL: &str = r#"
DELETE FROM Forecast_Detalle
WHERE ForecastID = ?1 AND SlpCode = ?2 AND CardCode = ?3 AND ItemCode = ?4
  AND Linea = ?5 AND OcrCode3 = ?6 AND TipoForecast = ?7 AND FechEntr = ?8
"#;

const INSERT_LOG_SQL: &str = r#"
INSERT INTO Forecast_LogDetalle (
    ForecastID, SlpCode, CardCode, ItemCode, TipoForecast, OcrCode3,
    Mes, CantidadAnterior, CantidadNueva, Timestamp
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#;

/// 前序版本的匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorMatch {
    Customer,    // 按客户命中
    Salesperson, // 回退: 按销售员命中
}

/// 前序版本查找结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorForecast {
    pub forecast_id: i64,
    pub matched_by: PriorMatch,
}

// ==========================================
// ForecastRepository - 预测仓储
// ==========================================
pub struct ForecastRepository {
    gateway: Arc<StorageGateway>,
}

impl ForecastRepository {
    pub fn new(gateway: Arc<StorageGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<StorageGateway> {
        &self.gateway
    }

    // ==========================================
    // 前序版本查找
    // ==========================================

    /// 查找最近的前序 ForecastID
    ///
    /// 顺序:
    /// 1. 严格早于 `now`、且明细含 (SlpCode, CardCode, 当年) 的最新表头
    /// 2. 回退: 去掉 CardCode 条件
    /// 3. 否则 None
    ///
    /// 排序: Fecha_Carga DESC, ForecastID DESC
    pub fn find_prior_forecast(
        &self,
        scope: &ForecastScope,
        now: NaiveDateTime,
    ) -> RepositoryResult<Option<PriorForecast>> {
        let (from, to) = year_range(scope.year)?;
        let now_str = now.format(TIMESTAMP_FORMAT).to_string();

        let by_customer = self.gateway.query(
            r#"SELECT f.ForecastID
               FROM Forecast f
               WHERE f.SlpCode = ?1 AND f.Fecha_Carga < ?2
                 AND EXISTS (
                     SELECT 1 FROM Forecast_Detalle d
                     WHERE d.ForecastID = f.ForecastID
                       AND d.SlpCode = ?1 AND d.CardCode = ?3
                       AND d.FechEntr >= ?4 AND d.FechEntr < ?5
                 )
               ORDER BY f.Fecha_Carga DESC, f.ForecastID DESC
               LIMIT 1"#,
            &[
                Value::from(scope.slp_code),
                Value::from(now_str.clone()),
                Value::from(scope.card_code.clone()),
                Value::from(from.clone()),
                Value::from(to.clone()),
            ],
            |row| row.get::<_, i64>(0),
        )?;

        if let Some(id) = by_customer.first() {
            return Ok(Some(PriorForecast {
                forecast_id: *id,
                matched_by: PriorMatch::Customer,
            }));
        }

        let by_salesperson = self.gateway.query(
            r#"SELECT f.ForecastID
               FROM Forecast f
               WHERE f.SlpCode = ?1 AND f.Fecha_Carga < ?2
                 AND EXISTS (
                     SELECT 1 FROM Forecast_Detalle d
                     WHERE d.ForecastID = f.ForecastID
                       AND d.SlpCode = ?1
                       AND d.FechEntr >= ?3 AND d.FechEntr < ?4
                 )
               ORDER BY f.Fecha_Carga DESC, f.ForecastID DESC
               LIMIT 1"#,
            &[
                Value::from(scope.slp_code),
                Value::from(now_str),
                Value::from(from),
                Value::from(to),
            ],
            |row| row.get::<_, i64>(0),
        )?;

        Ok(by_salesperson.first().map(|id| PriorForecast {
            forecast_id: *id,
            matched_by: PriorMatch::Salesperson,
        }))
    }

    // ==========================================
    // 明细读取
    // ==========================================

    /// 读取某版本下某客户当年的明细
    ///
    /// 排序: FechEntr, 插入顺序 (rowid)
    pub fn find_detail(
        &self,
        forecast_id: i64,
        scope: &ForecastScope,
    ) -> RepositoryResult<Vec<ForecastDetail>> {
        let (from, to) = year_range(scope.year)?;
        let sql = format!(
            "SELECT {} FROM Forecast_Detalle
             WHERE ForecastID = ?1 AND SlpCode = ?2 AND CardCode = ?3
               AND FechEntr >= ?4 AND FechEntr < ?5
             ORDER BY FechEntr, rowid",
            DETAIL_COLUMNS
        );
        self.gateway.query(
            &sql,
            &[
                Value::from(forecast_id),
                Value::from(scope.slp_code),
                Value::from(scope.card_code.clone()),
                Value::from(from),
                Value::from(to),
            ],
            map_detail_row,
        )
    }

    /// 读取某版本的全部明细
    pub fn find_detail_by_forecast(&self, forecast_id: i64) -> RepositoryResult<Vec<ForecastDetail>> {
        let sql = format!(
            "SELECT {} FROM Forecast_Detalle WHERE ForecastID = ?1 ORDER BY FechEntr, rowid",
            DETAIL_COLUMNS
        );
        self.gateway
            .query(&sql, &[Value::from(forecast_id)], map_detail_row)
    }

    /// 统计某版本明细行数
    pub fn count_detail(&self, forecast_id: i64) -> RepositoryResult<usize> {
        let counts = self.gateway.query(
            "SELECT COUNT(*) FROM Forecast_Detalle WHERE ForecastID = ?1",
            &[Value::from(forecast_id)],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(counts.first().copied().unwrap_or(0) as usize)
    }

    // ==========================================
    // 表头 / 日志读取
    // ==========================================

    pub fn find_header(&self, forecast_id: i64) -> RepositoryResult<Option<ForecastHeader>> {
        let rows = self.gateway.query(
            "SELECT ForecastID, SlpCode, Fecha_Carga FROM Forecast WHERE ForecastID = ?1",
            &[Value::from(forecast_id)],
            map_header_row,
        )?;
        Ok(rows.into_iter().next())
    }

    /// 销售员的历史表头（新 → 旧）
    pub fn list_headers(&self, slp_code: i64, limit: usize) -> RepositoryResult<Vec<ForecastHeader>> {
        self.gateway.query(
            r#"SELECT ForecastID, SlpCode, Fecha_Carga
               FROM Forecast
               WHERE SlpCode = ?1
               ORDER BY Fecha_Carga DESC, ForecastID DESC
               LIMIT ?2"#,
            &[Value::from(slp_code), Value::from(limit as i64)],
            map_header_row,
        )
    }

    /// 表头总数
    pub fn count_headers(&self) -> RepositoryResult<usize> {
        let counts = self
            .gateway
            .query("SELECT COUNT(*) FROM Forecast", &[], |row| row.get::<_, i64>(0))?;
        Ok(counts.first().copied().unwrap_or(0) as usize)
    }

    /// 客户的变更日志；可按版本过滤
    pub fn list_logs(
        &self,
        slp_code: i64,
        card_code: &str,
        forecast_id: Option<i64>,
    ) -> RepositoryResult<Vec<ForecastLogDetail>> {
        let mut sql = String::from(
            r#"SELECT ForecastID, SlpCode, CardCode, ItemCode, TipoForecast, OcrCode3,
                      Mes, CantidadAnterior, CantidadNueva, Timestamp
               FROM Forecast_LogDetalle
               WHERE SlpCode = ?1 AND CardCode = ?2"#,
        );
        let mut values = vec![Value::from(slp_code), Value::from(card_code.to_string())];
        if let Some(id) = forecast_id {
            sql.push_str(" AND ForecastID = ?3");
            values.push(Value::from(id));
        }
        sql.push_str(" ORDER BY ForecastID, rowid");

        self.gateway.query(&sql, &values, map_log_row)
    }

    /// 日志总数
    pub fn count_logs(&self) -> RepositoryResult<usize> {
        let counts = self.gateway.query(
            "SELECT COUNT(*) FROM Forecast_LogDetalle",
            &[],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(counts.first().copied().unwrap_or(0) as usize)
    }

    // ==========================================
    // 写入（事务内，由 VersionedWriter 编排）
    // ==========================================

    /// 插入表头，返回新 ForecastID
    pub fn insert_header_tx(
        tx: &Transaction<'_>,
        slp_code: i64,
        fecha_carga: NaiveDateTime,
    ) -> RepositoryResult<i64> {
        tx.execute(
            "INSERT INTO Forecast (SlpCode, Fecha_Carga) VALUES (?1, ?2)",
            params![slp_code, fecha_carga.format(TIMESTAMP_FORMAT).to_string()],
        )?;
        Ok(tx.last_insert_rowid())
    }

    /// 追加变更日志
    pub fn insert_logs_tx(
        tx: &Transaction<'_>,
        forecast_id: i64,
        slp_code: i64,
        deltas: &[DeltaRow],
        timestamp: NaiveDateTime,
    ) -> RepositoryResult<usize> {
        let ts = timestamp.format(TIMESTAMP_FORMAT).to_string();
        let mut stmt = tx.prepare(INSERT_LOG_SQL)?;
        for d in deltas {
            stmt.execute(params![
                forecast_id,
                slp_code,
                &d.card_code,
                &d.item_code,
                d.tipo_forecast.as_str(),
                &d.ocr_code3,
                &d.mes,
                d.cantidad_anterior,
                d.cantidad_nueva,
                &ts,
            ])?;
        }
        Ok(deltas.len())
    }

    /// 按完整键定点删除单元
    pub fn delete_cells_tx(
        tx: &Transaction<'_>,
        forecast_id: i64,
        slp_code: i64,
        removals: &[DeltaRow],
    ) -> RepositoryResult<usize> {
        let mut stmt = tx.prepare(DELETE_CELL_SQL)?;
        let mut affected = 0;
        for r in removals {
            affected += stmt.execute(params![
                forecast_id,
                slp_code,
                &r.card_code,
                &r.item_code,
                r.linea.as_str(),
                &r.ocr_code3,
                r.tipo_forecast.as_str(),
                r.fech_entr.format(DATE_FORMAT).to_string(),
            ])?;
        }
        Ok(affected)
    }

    /// 基于唯一索引的 UPSERT
    pub fn upsert_details_tx(
        tx: &Transaction<'_>,
        details: &[ForecastDetail],
    ) -> RepositoryResult<usize> {
        let mut stmt = tx.prepare(UPSERT_DETAIL_SQL)?;
        for d in details {
            stmt.execute(params![
                d.forecast_id,
                d.slp_code,
                &d.card_code,
                &d.item_code,
                d.tipo_forecast.as_str(),
                &d.ocr_code3,
                d.linea.as_str(),
                d.fech_entr.format(DATE_FORMAT).to_string(),
                d.cant,
                d.precio_un,
                &d.doc_cur,
            ])?;
        }
        Ok(details.len())
    }

    /// 无唯一索引时的明细写入：按完整键定点删除后插入
    ///
    /// 调用方保证 `details` 内单元键唯一（见 `ensure_unique_cells`）
    pub fn replace_details_tx(
        tx: &Transaction<'_>,
        details: &[ForecastDetail],
    ) -> RepositoryResult<usize> {
        let mut delete = tx.prepare(DELETE_CELL_SQL)?;
        let mut insert = tx.prepare(INSERT_DETAIL_SQL)?;
        for d in details {
            let fech_entr = d.fech_entr.format(DATE_FORMAT).to_string();
            delete.execute(params![
                d.forecast_id,
                d.slp_code,
                &d.card_code,
                &d.item_code,
                d.linea.as_str(),
                &d.ocr_code3,
                d.tipo_forecast.as_str(),
                &fech_entr,
            ])?;
            insert.execute(params![
                d.forecast_id,
                d.slp_code,
                &d.card_code,
                &d.item_code,
                d.tipo_forecast.as_str(),
                &d.ocr_code3,
                d.linea.as_str(),
                &fech_entr,
                d.cant,
                d.precio_un,
                &d.doc_cur,
            ])?;
        }
        Ok(details.len())
    }

    /// 单独插入表头（不带明细）
    pub fn insert_header(&self, slp_code: i64, fecha_carga: NaiveDateTime) -> RepositoryResult<i64> {
        self.gateway.execute_and_return_id(
            "INSERT INTO Forecast (SlpCode, Fecha_Carga) VALUES (?1, ?2)",
            &[
                Value::from(slp_code),
                Value::from(fecha_carga.format(TIMESTAMP_FORMAT).to_string()),
            ],
        )
    }
}

// ==========================================
// 行映射
// ==========================================

fn year_range(year: i32) -> RepositoryResult<(String, String)> {
    let (from, to) = year_bounds(year).ok_or_else(|| RepositoryError::FieldValueError {
        field: "year".to_string(),
        message: format!("无效年度: {}", year),
    })?;
    Ok((
        from.format(DATE_FORMAT).to_string(),
        to.format(DATE_FORMAT).to_string(),
    ))
}

fn conversion_error(idx: usize, field: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(RepositoryError::FieldValueError {
            field: field.to_string(),
            message: format!("无法解析: {}", raw),
        }),
    )
}

fn parse_date_col(row: &Row<'_>, idx: usize, field: &str) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    let date_part = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(date_part, DATE_FORMAT).map_err(|_| conversion_error(idx, field, &raw))
}

fn parse_timestamp_col(row: &Row<'_>, idx: usize, field: &str) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| conversion_error(idx, field, &raw))
}

fn parse_tipo_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<TipoForecast> {
    let raw: String = row.get(idx)?;
    TipoForecast::parse(&raw).ok_or_else(|| conversion_error(idx, "TipoForecast", &raw))
}

fn map_detail_row(row: &Row<'_>) -> rusqlite::Result<ForecastDetail> {
    Ok(ForecastDetail {
        forecast_id: row.get(0)?,
        slp_code: row.get(1)?,
        card_code: row.get(2)?,
        item_code: row.get(3)?,
        tipo_forecast: parse_tipo_col(row, 4)?,
        ocr_code3: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        linea: Linea::from_db_str(&row.get::<_, Option<String>>(6)?.unwrap_or_default()),
        fech_entr: parse_date_col(row, 7, "FechEntr")?,
        cant: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
        precio_un: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
        doc_cur: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
    })
}

fn map_header_row(row: &Row<'_>) -> rusqlite::Result<ForecastHeader> {
    Ok(ForecastHeader {
        forecast_id: row.get(0)?,
        slp_code: row.get(1)?,
        fecha_carga: parse_timestamp_col(row, 2, "Fecha_Carga")?,
    })
}

fn map_log_row(row: &Row<'_>) -> rusqlite::Result<ForecastLogDetail> {
    Ok(ForecastLogDetail {
        forecast_id: row.get(0)?,
        slp_code: row.get(1)?,
        card_code: row.get(2)?,
        item_code: row.get(3)?,
        tipo_forecast: parse_tipo_col(row, 4)?,
        ocr_code3: row.get(5)?,
        mes: row.get(6)?,
        cantidad_anterior: row.get(7)?,
        cantidad_nueva: row.get(8)?,
        timestamp: parse_timestamp_col(row, 9, "Timestamp")?,
    })
}
