// ==========================================
// 快照文件导入集成测试
// ==========================================
// 职责: CSV 快照 → 合并 → 保存 → 落库
// ==========================================


#[cfg(test)]
mod snapshot_import_test {
    use forecast_engine::api::ApiError;
    use forecast_engine::domain::types::Linea;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    use crate::test_helpers::*;

    const HEADER: &str =
        "ItemCode,ItemName,TipoForecast,Metrica,OcrCode3,DocCur,01,02,03,04,05,06,07,08,09,10,11,12";

    fn csv_snapshot(lines: &[&str]) -> NamedTempFile {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_import_csv_and_save() {
        let (_temp, db_path) = create_test_db().unwrap();
        let (api, repo) = setup_api(&db_path);

        let file = csv_snapshot(&[
            HEADER,
            "I100,Urea Granulada,Firme,Cantidad,Pta-Nutr,CLP,,,,,,,10,20,,,,",
            "I100,Urea Granulada,Firme,Precio,Pta-Nutr,CLP,,,,,,,1500,1500,,,,",
            "I200,NPK,Proyectado,Cantidad,Trd-Imp,USD,5,,,,,,,,,,,",
        ]);
        let changed = api.import_snapshot_file(SLP, "C002", YEAR, file.path()).unwrap();
        assert!(changed);

        let report = api.save_at(SLP, YEAR, ts("2025-06-01 12:00:00")).unwrap();
        let forecast_id = report.persisted_ids()[0];

        let details = repo.find_detail_by_forecast(forecast_id).unwrap();
        assert_eq!(details.len(), 3);

        let jul = details
            .iter()
            .find(|d| d.item_code == "I100" && d.fech_entr.format("%m").to_string() == "07")
            .unwrap();
        assert_eq!(jul.cant, 10.0);
        assert_eq!(jul.precio_un, 1500.0);

        let trader = details.iter().find(|d| d.item_code == "I200").unwrap();
        assert_eq!(trader.linea, Linea::Trader);
        assert_eq!(trader.doc_cur, "USD");
        assert_eq!(trader.precio_un, 0.0);
    }

    #[test]
    fn test_import_rejects_forbidden_column() {
        let (_temp, db_path) = create_test_db().unwrap();
        let (api, _repo) = setup_api(&db_path);

        let file = csv_snapshot(&[
            "ItemCode,TipoForecast,Metrica,OcrCode3,DocCur,PrecioUN,01",
            "I100,Firme,Cantidad,Pta-Nutr,CLP,1500,1",
        ]);
        let err = api
            .import_snapshot_file(SLP, "C002", YEAR, file.path())
            .unwrap_err();
        assert!(matches!(err, ApiError::SchemaError(_)), "got {:?}", err);
        assert_eq!(count_rows(&db_path, "Forecast"), 0);
    }

    #[test]
    fn test_import_rejects_duplicate_keys() {
        let (_temp, db_path) = create_test_db().unwrap();
        let (api, _repo) = setup_api(&db_path);

        let file = csv_snapshot(&[
            HEADER,
            "I100,,Firme,Cantidad,Pta-Nutr,CLP,1,,,,,,,,,,,",
            "I100,,Firme,Cantidad,Pta-Nutr,CLP,2,,,,,,,,,,,",
        ]);
        let err = api
            .import_snapshot_file(SLP, "C002", YEAR, file.path())
            .unwrap_err();
        assert_eq!(err.code(), "INVARIANT_VIOLATION");
    }

    #[test]
    fn test_import_unknown_extension() {
        let (_temp, db_path) = create_test_db().unwrap();
        let (api, _repo) = setup_api(&db_path);

        let file = Builder::new().suffix(".parquet").tempfile().unwrap();
        let err = api
            .import_snapshot_file(SLP, "C002", YEAR, file.path())
            .unwrap_err();
        assert_eq!(err.code(), "IMPORT_ERROR");
    }
}
