// ==========================================
// 销售预测引擎 - SQL 追踪与耗时统计
// ==========================================
// 开关:
// - FORECAST_ENGINE_PERF_SQL=1       强制开启（Debug 默认开启）
// - FORECAST_ENGINE_SLOW_SQL_MS=50   慢 SQL 阈值（毫秒）
// 统计按线程累计；PerfGuard 在 drop 时输出区间内的差值
// ==========================================

use rusqlite::Connection;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

pub const ENV_PERF_SQL: &str = "FORECAST_ENGINE_PERF_SQL";
pub const ENV_SLOW_SQL_MS: &str = "FORECAST_ENGINE_SLOW_SQL_MS";

static TRACE_ON: AtomicBool = AtomicBool::new(false);
static SLOW_MS: AtomicU64 = AtomicU64::new(0);

/// 线程内计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlCounters {
    /// 当前嵌套的 PerfGuard 层数
    depth: u32,
    pub statements: u64,
    pub slow_statements: u64,
}

thread_local! {
    static COUNTERS: RefCell<SqlCounters> = RefCell::new(SqlCounters::default());
}

fn with_counters<R>(f: impl FnOnce(&mut SqlCounters) -> R) -> R {
    COUNTERS.with(|c| f(&mut c.borrow_mut()))
}

/// 当前线程的累计计数
pub fn current_counters() -> SqlCounters {
    with_counters(|c| *c)
}

/// SQL 追踪设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlTraceSettings {
    pub enabled: bool,
    pub slow_ms: u64,
}

impl SqlTraceSettings {
    /// 由环境变量原始值解析（None 表示未设置）
    pub fn from_raw(perf_sql: Option<&str>, slow_ms: Option<&str>) -> Self {
        let default_slow = if cfg!(debug_assertions) { 50 } else { 200 };
        Self {
            enabled: perf_sql.map_or(cfg!(debug_assertions), flag_on),
            slow_ms: slow_ms
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default_slow),
        }
    }

    pub fn from_env() -> Self {
        Self::from_raw(
            std::env::var(ENV_PERF_SQL).ok().as_deref(),
            std::env::var(ENV_SLOW_SQL_MS).ok().as_deref(),
        )
    }
}

fn flag_on(raw: &str) -> bool {
    let v = raw.trim().to_ascii_lowercase();
    ["1", "true", "yes", "y", "on"].contains(&v.as_str())
}

/// 折叠空白并截断过长 SQL
fn compact_sql(sql: &str, max_chars: usize) -> String {
    let compact = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    match compact.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &compact[..cut]),
        None => compact,
    }
}

/// 安装 SQLite 语句追踪（语句计数 + 慢查询 warn）
pub fn install_sqlite_tracing(conn: &mut Connection) {
    let settings = SqlTraceSettings::from_env();
    TRACE_ON.store(settings.enabled, AtomicOrdering::Relaxed);
    SLOW_MS.store(settings.slow_ms, AtomicOrdering::Relaxed);

    if settings.enabled {
        conn.trace(Some(on_statement));
        conn.profile(Some(on_profile));
    } else {
        conn.trace(None);
        conn.profile(None);
    }
}

fn on_statement(_sql: &str) {
    if !TRACE_ON.load(AtomicOrdering::Relaxed) {
        return;
    }
    with_counters(|c| {
        if c.depth > 0 {
            c.statements += 1;
        }
    });
}

fn on_profile(sql: &str, duration: Duration) {
    if !TRACE_ON.load(AtomicOrdering::Relaxed) {
        return;
    }
    let threshold = SLOW_MS.load(AtomicOrdering::Relaxed);
    let elapsed_ms = duration.as_millis() as u64;
    if threshold == 0 || elapsed_ms < threshold {
        return;
    }

    tracing::warn!(
        target: "slow_sql",
        elapsed_ms,
        threshold_ms = threshold,
        sql = %compact_sql(sql, 420),
        "慢 SQL"
    );
    with_counters(|c| {
        if c.depth > 0 {
            c.slow_statements += 1;
        }
    });
}

/// 区间耗时统计：drop 时输出 elapsed_ms 与区间内的 SQL 语句数
///
/// ```ignore
/// let _perf = forecast_engine::perf::PerfGuard::new("engine.save").with_label("C001");
/// ```
pub struct PerfGuard {
    op: &'static str,
    label: Option<String>,
    started: Instant,
    baseline: SqlCounters,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        let baseline = with_counters(|c| {
            c.depth += 1;
            *c
        });
        Self {
            op,
            label: None,
            started: Instant::now(),
            baseline,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let now = with_counters(|c| {
            c.depth = c.depth.saturating_sub(1);
            *c
        });
        tracing::debug!(
            target: "perf",
            op = self.op,
            label = self.label.as_deref().unwrap_or(""),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            sql_count = now.statements.saturating_sub(self.baseline.statements),
            slow_sql_count = now.slow_statements.saturating_sub(self.baseline.slow_statements),
            "耗时统计"
        );
    }
}
