// ==========================================
// 配置管理集成测试
// ==========================================
// 职责: config_kv 覆写 → AppState 装载 → 引擎行为
// ==========================================


#[cfg(test)]
mod config_test {
    use forecast_engine::app::AppState;
    use forecast_engine::config::{config_keys, ConfigManager, DuplicatePolicy, EngineConfigReader};
    use forecast_engine::engine::SaveOutcome;

    use crate::test_helpers::*;

    #[tokio::test]
    async fn test_defaults_when_config_absent() {
        let (_temp, db_path) = create_test_db().unwrap();
        let manager = ConfigManager::new(&db_path).unwrap();
        let config = manager.load_engine_config().await.unwrap();

        assert_eq!(config.default_doc_cur, "CLP");
        assert_eq!(config.tolerance, 1e-6);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Mean);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_base_ms, 600);
    }

    #[tokio::test]
    async fn test_invalid_values_fall_back() {
        let (_temp, db_path) = create_test_db().unwrap();
        let manager = ConfigManager::new(&db_path).unwrap();
        manager
            .set_global_config_value(config_keys::DEFAULT_DOC_CUR, "pesos")
            .unwrap();
        manager
            .set_global_config_value(config_keys::TOLERANCE, "-1")
            .unwrap();
        manager
            .set_global_config_value(config_keys::DUPLICATE_POLICY, "median")
            .unwrap();

        let config = manager.load_engine_config().await.unwrap();
        assert_eq!(config.default_doc_cur, "CLP");
        assert_eq!(config.tolerance, 1e-6);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Mean);
    }

    #[tokio::test]
    async fn test_app_state_uses_configured_currency() {
        let (_temp, db_path) = create_test_db().unwrap();
        {
            let manager = ConfigManager::new(&db_path).unwrap();
            manager
                .set_global_config_value(config_keys::DEFAULT_DOC_CUR, "USD")
                .unwrap();
            manager
                .set_global_config_value(config_keys::BUSY_BACKOFF_MS, "1")
                .unwrap();
        }

        let state = AppState::new(db_path.clone()).await.unwrap();
        assert_eq!(state.engine_config.default_doc_cur, "USD");
        assert_eq!(state.gateway.retry_policy().backoff_base_ms, 1);

        // 快照行缺省币种时使用配置值
        let mut row = firme_cantidad("I100", &[(4, 3.0)]);
        row.doc_cur = String::new();
        let api = &state.forecast_api;
        api.apply_snapshot(SLP, "C001", YEAR, &[row]).unwrap();
        let report = api.save_at(SLP, YEAR, ts("2025-02-01 08:00:00")).unwrap();
        let forecast_id = match report.outcome_for("C001").unwrap() {
            SaveOutcome::Persisted { forecast_id, .. } => *forecast_id,
            other => panic!("unexpected outcome: {:?}", other),
        };

        let details = api.stored_detail(forecast_id).unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].doc_cur, "USD");
    }
}
