// ==========================================
// 销售预测引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 启动时保证预测表与唯一索引 ux_ForecastDetalle 存在
// ==========================================

use rusqlite::OptionalExtension;
use rusqlite::{Connection, ErrorCode};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
///
/// 网关层另有重试；这里保持较短，让 busy 尽快以错误形式浮出交给重试逻辑。
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 250;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 预测明细唯一索引
pub const FORECAST_DETAIL_UNIQUE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS ux_ForecastDetalle
    ON Forecast_Detalle (ForecastID, SlpCode, CardCode, ItemCode, Linea, OcrCode3, TipoForecast, FechEntr)
"#;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS OSLP (
    SlpCode INTEGER PRIMARY KEY,
    SlpName TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS OCRD (
    CardCode TEXT PRIMARY KEY,
    CardName TEXT NOT NULL,
    SlpCode INTEGER
);

CREATE TABLE IF NOT EXISTS OITM (
    ItemCode TEXT PRIMARY KEY,
    ItemName TEXT NOT NULL,
    ItmsGrpNam TEXT
);

CREATE TABLE IF NOT EXISTS Forecast (
    ForecastID INTEGER PRIMARY KEY AUTOINCREMENT,
    SlpCode INTEGER NOT NULL,
    Fecha_Carga TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS Forecast_Detalle (
    ForecastID INTEGER NOT NULL,
    CardCode TEXT NOT NULL,
    ItemCode TEXT NOT NULL,
    FechEntr TEXT NOT NULL,
    TipoForecast TEXT NOT NULL,
    OcrCode3 TEXT NOT NULL,
    Linea TEXT NOT NULL,
    Cant REAL NOT NULL,
    PrecioUN REAL NOT NULL DEFAULT 0,
    DocCur TEXT NOT NULL DEFAULT 'CLP',
    SlpCode INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS ix_ForecastDetalle_Card
    ON Forecast_Detalle (SlpCode, CardCode, FechEntr);

CREATE TABLE IF NOT EXISTS Forecast_LogDetalle (
    ForecastID INTEGER NOT NULL,
    SlpCode INTEGER NOT NULL,
    CardCode TEXT NOT NULL,
    ItemCode TEXT NOT NULL,
    TipoForecast TEXT NOT NULL,
    OcrCode3 TEXT NOT NULL,
    Mes TEXT NOT NULL,
    CantidadAnterior REAL NOT NULL,
    CantidadNueva REAL NOT NULL,
    Timestamp TEXT NOT NULL
);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建表（幂等）并登记 schema_version
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    if !ensure_forecast_detail_index(conn)? {
        tracing::warn!("历史明细存在重复键，ux_ForecastDetalle 未建立，明细写入改用定点删除+插入");
    }
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 保证明细唯一索引存在（UPSERT 依赖该索引）
///
/// # 返回
/// - Ok(true): 索引存在或已建立
/// - Ok(false): 旧版本明细中已有重复键，索引无法建立
pub fn ensure_forecast_detail_index(conn: &Connection) -> rusqlite::Result<bool> {
    match conn.execute_batch(FORECAST_DETAIL_UNIQUE_INDEX) {
        Ok(()) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 检查唯一索引是否存在
pub fn has_forecast_detail_index(conn: &Connection) -> rusqlite::Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='index' AND name='ux_ForecastDetalle' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    Ok(found)
}
