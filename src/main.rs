// ==========================================
// 销售预测引擎 - 命令行入口
// ==========================================
// 用法:
//   forecast-engine [--db PATH] init
//   forecast-engine [--db PATH] show <SlpCode> <CardCode> <Year>
//   forecast-engine [--db PATH] save-snapshot <SlpCode> <CardCode> <Year> <File>
//   forecast-engine [--db PATH] history <SlpCode> [Limit]
//   forecast-engine [--db PATH] log <SlpCode> <CardCode> [ForecastID]
// 结果以 JSON 输出到 stdout，日志输出到 stderr
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use forecast_engine::app::{get_default_db_path, AppState};
use forecast_engine::logging;
use serde::Serialize;

const USAGE: &str = "用法: forecast-engine [--db PATH] <init|show|save-snapshot|history|log> [参数...]";

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let db_path = take_db_flag(&mut args)?.unwrap_or_else(get_default_db_path);

    let Some(command) = args.first().cloned() else {
        bail!("{}", USAGE);
    };
    let rest = &args[1..];

    tracing::info!("{} v{}", forecast_engine::APP_NAME, forecast_engine::VERSION);
    let state = AppState::new(db_path.clone())
        .await
        .map_err(|e| anyhow!(e))
        .context("初始化失败")?;
    let api = &state.forecast_api;

    match command.as_str() {
        "init" => {
            let snapshot = state
                .config_manager
                .get_config_snapshot()
                .map_err(|e| anyhow!(e.to_string()))?;
            print_json(&serde_json::json!({
                "db_path": db_path,
                "config": serde_json::from_str::<serde_json::Value>(&snapshot)?,
                "engine_config": state.engine_config,
            }))?;
        }
        "show" => {
            let (slp_code, card_code, year) = scope_args(rest)?;
            let view = api.open_customer(slp_code, card_code, year)?;
            print_json(&view)?;
        }
        "save-snapshot" => {
            let (slp_code, card_code, year) = scope_args(rest)?;
            let file = rest.get(3).ok_or_else(|| anyhow!("缺少快照文件参数"))?;

            let changed = api.import_snapshot_file(slp_code, card_code, year, file)?;
            if !changed {
                tracing::info!(card_code = %card_code, "快照与当前版本一致，无需保存");
            }
            let report = api.save(slp_code, year)?;
            print_json(&report)?;
            if report.failed_count() > 0 {
                bail!("{} 个客户保存失败", report.failed_count());
            }
        }
        "history" => {
            let slp_code = parse_arg::<i64>(rest, 0, "SlpCode")?;
            let limit = rest
                .get(1)
                .map(|s| s.parse::<usize>())
                .transpose()
                .context("Limit 必须为正整数")?;
            print_json(&api.list_history(slp_code, limit)?)?;
        }
        "log" => {
            let slp_code = parse_arg::<i64>(rest, 0, "SlpCode")?;
            let card_code = rest.get(1).ok_or_else(|| anyhow!("缺少 CardCode 参数"))?;
            let forecast_id = rest
                .get(2)
                .map(|s| s.parse::<i64>())
                .transpose()
                .context("ForecastID 必须为整数")?;
            print_json(&api.list_logs(slp_code, card_code, forecast_id)?)?;
        }
        other => bail!("未知命令: {}\n{}", other, USAGE),
    }

    Ok(())
}

/// 取出 --db PATH / --db=PATH
fn take_db_flag(args: &mut Vec<String>) -> Result<Option<String>> {
    if let Some(pos) = args.iter().position(|a| a == "--db") {
        if pos + 1 >= args.len() {
            bail!("--db 缺少路径参数");
        }
        let path = args.remove(pos + 1);
        args.remove(pos);
        return Ok(Some(path));
    }
    if let Some(pos) = args.iter().position(|a| a.starts_with("--db=")) {
        let flag = args.remove(pos);
        return Ok(Some(flag.trim_start_matches("--db=").to_string()));
    }
    Ok(None)
}

fn parse_arg<T>(args: &[String], idx: usize, name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = args
        .get(idx)
        .ok_or_else(|| anyhow!("缺少 {} 参数", name))?;
    raw.parse::<T>()
        .with_context(|| format!("{} 参数非法: {}", name, raw))
}

fn scope_args(args: &[String]) -> Result<(i64, &str, i32)> {
    let slp_code = parse_arg::<i64>(args, 0, "SlpCode")?;
    let card_code = args
        .get(1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("缺少 CardCode 参数"))?;
    let year = parse_arg::<i32>(args, 2, "Year")?;
    Ok((slp_code, card_code, year))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
