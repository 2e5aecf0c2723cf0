use super::*;
use crate::domain::types::{Metrica, TipoForecast};
use crate::repository::gateway::RetryPolicy;

// ==========================================
// 测试辅助函数
// ==========================================

fn setup() -> (SaveOrchestrator, Arc<ForecastRepository>) {
    let gateway = Arc::new(
        StorageGateway::open_in_memory()
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                backoff_base_ms: 1,
            }),
    );
    let repo = Arc::new(ForecastRepository::new(Arc::clone(&gateway)));
    (SaveOrchestrator::new(gateway, EngineConfig::default()), repo)
}

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn cantidad(item: &str, tipo: TipoForecast, cells: &[(usize, f64)]) -> WideRow {
    let mut months = [f64::NAN; 12];
    for (idx, v) in cells {
        months[*idx] = *v;
    }
    WideRow {
        item_code: item.to_string(),
        tipo_forecast: tipo,
        metrica: Metrica::Cantidad,
        ocr_code3: "Pta-Nutr".to_string(),
        doc_cur: "CLP".to_string(),
        item_name: None,
        linea: None,
        months,
    }
}

// ==========================================
// 测试用例
// ==========================================

#[test]
fn test_open_customer_without_history_is_empty() {
    let (orch, _repo) = setup();
    let mut session = SessionState::new(10);
    orch.open_customer(&mut session, "C001", 2025).unwrap();
    let customer = session.customer("C001").unwrap();
    assert!(customer.buffer.is_empty());
    assert_eq!(customer.state(), EditState::Clean);
}

#[test]
fn test_all_zero_save_is_no_change() {
    let (orch, repo) = setup();
    let mut session = SessionState::new(10);
    let changed = orch
        .apply_editor_snapshot(
            &mut session,
            "C001",
            2025,
            &[cantidad("I100", TipoForecast::Firme, &[(0, 0.0)])],
        )
        .unwrap();
    assert!(changed);
    assert!(session.is_edited("C001"));

    let report = orch.save_at(&mut session, 2025, ts("2025-06-01 10:00:00"));
    assert_eq!(report.outcome_for("C001"), Some(&SaveOutcome::NoChange));
    assert_eq!(repo.count_headers().unwrap(), 0);
    assert_eq!(repo.count_logs().unwrap(), 0);
    assert!(session.edited_customers().is_empty());
    assert_eq!(session.state_of("C001"), Some(EditState::Clean));
}

#[test]
fn test_save_persists_and_rehydrates() {
    let (orch, repo) = setup();
    let mut session = SessionState::new(10);
    orch.apply_editor_snapshot(
        &mut session,
        "C002",
        2025,
        &[cantidad("I100", TipoForecast::Firme, &[(6, 10.0), (7, 20.0)])],
    )
    .unwrap();

    let report = orch.save_at(&mut session, 2025, ts("2025-06-01 10:00:00"));
    let ids = report.persisted_ids();
    assert_eq!(ids.len(), 1);
    match report.outcome_for("C002").unwrap() {
        SaveOutcome::Persisted {
            additions,
            modifications,
            removals,
            prior_forecast_id,
            ..
        } => {
            assert_eq!((*additions, *modifications, *removals), (2, 0, 0));
            assert_eq!(*prior_forecast_id, None);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(repo.count_detail(ids[0]).unwrap(), 2);
    let customer = session.customer("C002").unwrap();
    assert_eq!(customer.state(), EditState::Clean);
    assert_eq!(customer.buffer.len(), 4);
    assert!(customer.buffer.is_grid_complete());
    assert_eq!(customer.hash, customer.buffer.structural_hash());
}

#[test]
fn test_resubmitting_same_snapshot_short_circuits() {
    let (orch, repo) = setup();
    let mut session = SessionState::new(10);
    orch.apply_editor_snapshot(
        &mut session,
        "C002",
        2025,
        &[cantidad("I100", TipoForecast::Firme, &[(6, 10.0)])],
    )
    .unwrap();
    orch.save_at(&mut session, 2025, ts("2025-06-01 10:00:00"));

    let snapshot = session.customer("C002").unwrap().buffer.to_wide_rows();
    let changed = orch
        .apply_editor_snapshot(&mut session, "C002", 2025, &snapshot)
        .unwrap();
    assert!(!changed);
    assert!(!session.is_edited("C002"));

    let report = orch.save_at(&mut session, 2025, ts("2025-06-01 10:00:05"));
    assert!(report.outcomes.is_empty());
    assert_eq!(repo.count_headers().unwrap(), 1);
}

#[test]
fn test_failure_isolated_per_customer() {
    let (orch, repo) = setup();
    let mut session = SessionState::new(10);
    orch.apply_editor_snapshot(
        &mut session,
        "C003",
        2025,
        &[cantidad("I100", TipoForecast::Firme, &[(0, 5.0)])],
    )
    .unwrap();
    orch.apply_editor_snapshot(
        &mut session,
        "C004",
        2025,
        &[cantidad("I100", TipoForecast::Firme, &[(0, -3.0)])],
    )
    .unwrap();

    let report = orch.save_at(&mut session, 2025, ts("2025-06-01 10:00:00"));

    assert!(report.is_partial());
    assert!(matches!(
        report.outcome_for("C003"),
        Some(SaveOutcome::Persisted { .. })
    ));
    match report.outcome_for("C004") {
        Some(SaveOutcome::Failed { code, .. }) => assert_eq!(code, "INVARIANT_VIOLATION"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(repo.count_headers().unwrap(), 1);
    assert!(session.edited_customers().is_empty());
    // 失败客户回到 Editing，缓冲区保留
    assert_eq!(session.state_of("C004"), Some(EditState::Editing));
    assert_eq!(session.customer("C004").unwrap().buffer.len(), 4);
}

#[test]
fn test_year_mismatch_fails() {
    let (orch, _repo) = setup();
    let mut session = SessionState::new(10);
    orch.apply_editor_snapshot(
        &mut session,
        "C002",
        2025,
        &[cantidad("I100", TipoForecast::Firme, &[(0, 1.0)])],
    )
    .unwrap();
    let report = orch.save_at(&mut session, 2026, ts("2025-06-01 10:00:00"));
    assert_eq!(report.failed_count(), 1);
}
