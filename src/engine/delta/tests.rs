use super::*;
use crate::domain::types::{TipoForecast, DEFAULT_TOLERANCE};

// ==========================================
// 测试辅助函数
// ==========================================

fn candidate(mes: &str, cant: f64) -> LongRow {
    let month: u32 = mes.parse().unwrap();
    LongRow {
        slp_code: 10,
        card_code: "C002".to_string(),
        item_code: "I100".to_string(),
        tipo_forecast: TipoForecast::Firme,
        ocr_code3: "Pta-Nutr".to_string(),
        linea: Linea::Planta,
        doc_cur: "CLP".to_string(),
        mes: mes.to_string(),
        fech_entr: NaiveDate::from_ymd_opt(2025, month, 1).unwrap(),
        cant,
        precio_un: 1500.0,
    }
}

fn prior(month: u32, cant: f64) -> ForecastDetail {
    ForecastDetail {
        forecast_id: 7,
        slp_code: 10,
        card_code: "C002".to_string(),
        item_code: "I100".to_string(),
        tipo_forecast: TipoForecast::Firme,
        ocr_code3: "Pta-Nutr".to_string(),
        linea: Linea::Planta,
        fech_entr: NaiveDate::from_ymd_opt(2025, month, 1).unwrap(),
        cant,
        precio_un: 1400.0,
        doc_cur: "CLP".to_string(),
    }
}

fn computer() -> DeltaComputer {
    DeltaComputer::new(DuplicatePolicy::Mean, DEFAULT_TOLERANCE)
}

// ==========================================
// 无前序版本
// ==========================================

#[test]
fn test_baseline_all_zero_is_empty() {
    let cands: Vec<LongRow> = (1..=12).map(|m| candidate(&format!("{:02}", m), 0.0)).collect();
    let delta = computer().compute("C002", &cands, None).unwrap();
    assert!(delta.is_empty());
}

#[test]
fn test_baseline_non_zero_are_additions() {
    let cands = vec![candidate("07", 10.0), candidate("08", 20.0), candidate("09", 0.0)];
    let delta = computer().compute("C002", &cands, None).unwrap();
    assert_eq!(delta.rows.len(), 2);
    assert_eq!(delta.count(ChangeKind::Addition), 2);
    assert_eq!(delta.rows[0].mes, "07");
    assert_eq!(delta.rows[0].cantidad_anterior, 0.0);
    assert_eq!(delta.rows[0].cantidad_nueva, 10.0);
}

// ==========================================
// 有前序版本
// ==========================================

#[test]
fn test_zero_to_zero_is_noop() {
    let prior_rows = vec![prior(7, 10.0)];
    let cands = vec![candidate("07", 10.0), candidate("03", 0.0)];
    let delta = computer().compute("C002", &cands, Some(&prior_rows)).unwrap();
    assert!(delta.is_empty());
}

#[test]
fn test_modification_and_removal() {
    let prior_rows = vec![prior(7, 10.0), prior(8, 20.0)];
    let cands = vec![candidate("07", 15.0), candidate("08", 0.0)];
    let delta = computer().compute("C002", &cands, Some(&prior_rows)).unwrap();

    assert_eq!(delta.rows.len(), 2);
    let jul = &delta.rows[0];
    assert_eq!(jul.kind, ChangeKind::Modification);
    assert_eq!((jul.cantidad_anterior, jul.cantidad_nueva), (10.0, 15.0));
    assert_eq!(jul.delta(), 5.0);

    let aug = &delta.rows[1];
    assert_eq!(aug.kind, ChangeKind::Removal);
    assert_eq!((aug.cantidad_anterior, aug.cantidad_nueva), (20.0, 0.0));
    assert_eq!(delta.removals().len(), 1);
}

#[test]
fn test_addition_against_prior() {
    let prior_rows = vec![prior(7, 10.0)];
    let cands = vec![candidate("07", 10.0), candidate("09", 7.0)];
    let delta = computer().compute("C002", &cands, Some(&prior_rows)).unwrap();
    assert_eq!(delta.rows.len(), 1);
    assert_eq!(delta.rows[0].kind, ChangeKind::Addition);
    assert_eq!(delta.rows[0].cantidad_nueva, 7.0);
}

#[test]
fn test_prior_only_key_becomes_removal() {
    let prior_rows = vec![prior(11, 4.0)];
    let delta = computer().compute("C002", &[], Some(&prior_rows)).unwrap();
    assert_eq!(delta.rows.len(), 1);
    let row = &delta.rows[0];
    assert_eq!(row.kind, ChangeKind::Removal);
    assert_eq!(row.mes, "11");
    assert_eq!(row.precio_un, 1400.0);
}

#[test]
fn test_change_within_tolerance_ignored() {
    let prior_rows = vec![prior(7, 10.0)];
    let cands = vec![candidate("07", 10.0 + 1e-8)];
    let delta = computer().compute("C002", &cands, Some(&prior_rows)).unwrap();
    assert!(delta.is_empty());
}

// ==========================================
// 前序重复键策略
// ==========================================

fn duplicated_prior() -> Vec<ForecastDetail> {
    let mut other_linea = prior(7, 30.0);
    other_linea.linea = Linea::Desconocido;
    vec![prior(7, 10.0), other_linea]
}

#[test]
fn test_duplicate_prior_mean() {
    let prior_rows = duplicated_prior();
    let cands = vec![candidate("07", 20.0)];
    let delta = computer().compute("C002", &cands, Some(&prior_rows)).unwrap();
    // 均值 20 → 无变化
    assert!(delta.is_empty());
    assert_eq!(delta.warnings.len(), 1);
}

#[test]
fn test_duplicate_prior_sum() {
    let prior_rows = duplicated_prior();
    let cands = vec![candidate("07", 20.0)];
    let delta = DeltaComputer::new(DuplicatePolicy::Sum, DEFAULT_TOLERANCE)
        .compute("C002", &cands, Some(&prior_rows))
        .unwrap();
    assert_eq!(delta.rows.len(), 1);
    assert_eq!(delta.rows[0].cantidad_anterior, 40.0);
}

#[test]
fn test_duplicate_prior_error() {
    let prior_rows = duplicated_prior();
    let cands = vec![candidate("07", 20.0)];
    let err = DeltaComputer::new(DuplicatePolicy::Error, DEFAULT_TOLERANCE)
        .compute("C002", &cands, Some(&prior_rows))
        .unwrap_err();
    assert_eq!(err.code(), "INVARIANT_VIOLATION");
}

#[test]
fn test_duplicate_candidates_rejected() {
    let cands = vec![candidate("07", 1.0), candidate("07", 2.0)];
    let err = computer().compute("C002", &cands, None).unwrap_err();
    assert_eq!(err.code(), "INVARIANT_VIOLATION");
}

// ==========================================
// 仅单价变更
// ==========================================

#[test]
fn test_price_only_change_is_counted_but_not_emitted() {
    // 数量相同，单价 1500 vs 前序 1400
    let cands = vec![candidate("07", 10.0), candidate("08", 0.0)];
    let delta = computer()
        .compute("C002", &cands, Some(&[prior(7, 10.0)]))
        .unwrap();
    assert!(delta.is_empty());
    assert_eq!(delta.price_only_cells, 1);
}

#[test]
fn test_price_only_ignores_zero_quantity_cells() {
    let cands = vec![candidate("07", 0.0)];
    let delta = computer().compute("C002", &cands, None).unwrap();
    assert!(delta.is_empty());
    assert_eq!(delta.price_only_cells, 0);
}
