// ==========================================
// 销售预测引擎 - 存储网关
// ==========================================
// 职责: 对关系库的类型化读写访问
// 约束:
// - 所有 SQL 使用位置占位符，参数绑定，绝不拼接
// - 写操作经由进程级临界区串行化，事务使用 IMMEDIATE 模式
// - "database busy" 按 0.6·attempt 秒线性退避，最多 5 次
// ==========================================

use crate::db;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// 进程级写临界区（同一进程内多个网关实例共享）
static WRITE_GATE: Mutex<()> = Mutex::new(());

// ux_ForecastDetalle 状态
const INDEX_UNCHECKED: u8 = 0;
const INDEX_PRESENT: u8 = 1;
const INDEX_BLOCKED: u8 = 2;

// ==========================================
// RetryPolicy - busy 重试策略
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 退避基数，第 n 次失败后等待 base·n
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 600,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(attempt as u64))
    }
}

// ==========================================
// Table - 通用查询结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// 按列名取单元
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }
}

// ==========================================
// StorageGateway
// ==========================================
pub struct StorageGateway {
    conn: Arc<Mutex<Connection>>,
    retry: RetryPolicy,
    index_state: AtomicU8,
}

impl StorageGateway {
    /// 基于已有连接创建网关
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            retry: RetryPolicy::default(),
            index_state: AtomicU8::new(INDEX_UNCHECKED),
        }
    }

    /// 打开数据库文件，安装 SQL 追踪并建表
    pub fn open(db_path: &str) -> RepositoryResult<Self> {
        let mut conn = db::open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        crate::perf::install_sqlite_tracing(&mut conn);
        db::ensure_schema(&conn)?;

        let gateway = Self::new(Arc::new(Mutex::new(conn)));
        gateway.ensure_unique_index()?;
        tracing::info!(db_path = %db_path, "存储网关已就绪");
        Ok(gateway)
    }

    /// 内存库（测试/演示）
    pub fn open_in_memory() -> RepositoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        db::configure_sqlite_connection(&conn)?;
        db::ensure_schema(&conn)?;
        let gateway = Self::new(Arc::new(Mutex::new(conn)));
        gateway.ensure_unique_index()?;
        Ok(gateway)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// 共享底层连接（供同库的其他组件复用）
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 读操作
    // ==========================================

    /// 执行查询并返回通用表
    pub fn select(&self, sql: &str, params: &[Value]) -> RepositoryResult<Table> {
        self.with_busy_retry("select", || {
            let conn = self.get_conn()?;
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let width = columns.len();

            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    (0..width)
                        .map(|i| row.get::<_, Value>(i))
                        .collect::<rusqlite::Result<Vec<Value>>>()
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Table { columns, rows })
        })
    }

    /// 执行查询并逐行映射为类型化结果
    pub fn query<T, F>(&self, sql: &str, params: &[Value], mut map: F) -> RepositoryResult<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_busy_retry("query", || {
            let conn = self.get_conn()?;
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| map(row))?
                .collect::<Result<Vec<T>, _>>()?;
            Ok(rows)
        })
    }

    // ==========================================
    // 写操作（全部经过写临界区）
    // ==========================================

    /// 执行单条写语句，返回影响行数
    pub fn execute(&self, sql: &str, params: &[Value]) -> RepositoryResult<usize> {
        self.write_transaction(|tx| Ok(tx.execute(sql, params_from_iter(params.iter()))?))
    }

    /// 同一语句批量执行（单事务）
    pub fn execute_many(&self, sql: &str, batch: &[Vec<Value>]) -> RepositoryResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.write_transaction(|tx| {
            let mut stmt = tx.prepare(sql)?;
            let mut affected = 0;
            for params in batch {
                affected += stmt.execute(params_from_iter(params.iter()))?;
            }
            Ok(affected)
        })
    }

    /// 执行插入并返回自增主键
    pub fn execute_and_return_id(&self, sql: &str, params: &[Value]) -> RepositoryResult<i64> {
        self.write_transaction(|tx| {
            tx.execute(sql, params_from_iter(params.iter()))?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// 在 IMMEDIATE 事务中执行闭包
    ///
    /// 闭包返回错误时事务回滚；busy 时整体重试，因此闭包必须可重入。
    pub fn write_transaction<T, F>(&self, mut f: F) -> RepositoryResult<T>
    where
        F: FnMut(&Transaction<'_>) -> RepositoryResult<T>,
    {
        self.with_busy_retry("write", || {
            let _gate = WRITE_GATE
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            let mut conn = self.get_conn()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// 保证明细唯一索引存在（首次 UPSERT 前调用）
    ///
    /// # 返回
    /// - Ok(true): 索引可用，明细可走 UPSERT
    /// - Ok(false): 旧版本明细含重复键，索引无法建立；结果在网关生命周期内缓存
    pub fn ensure_unique_index(&self) -> RepositoryResult<bool> {
        match self.index_state.load(Ordering::Acquire) {
            INDEX_PRESENT => return Ok(true),
            INDEX_BLOCKED => return Ok(false),
            _ => {}
        }
        let present = {
            let conn = self.get_conn()?;
            db::ensure_forecast_detail_index(&conn)?
        };
        if present {
            self.index_state.store(INDEX_PRESENT, Ordering::Release);
            tracing::debug!("ux_ForecastDetalle 已确认存在");
        } else {
            self.index_state.store(INDEX_BLOCKED, Ordering::Release);
            tracing::warn!("旧版本明细存在重复键，ux_ForecastDetalle 无法建立");
        }
        Ok(present)
    }

    // ==========================================
    // busy 重试
    // ==========================================

    fn with_busy_retry<T, F>(&self, op: &str, mut f: F) -> RepositoryResult<T>
    where
        F: FnMut() -> RepositoryResult<T>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f() {
                Err(e) if e.is_busy() => {
                    if attempt >= max_attempts {
                        tracing::error!(op, attempt, error = %e, "数据库忙，重试次数耗尽");
                        return Err(RepositoryError::RetriesExhausted {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    let wait = self.retry.backoff_for(attempt);
                    tracing::warn!(op, attempt, wait_ms = wait.as_millis() as u64, "数据库忙，退避后重试");
                    std::thread::sleep(wait);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
