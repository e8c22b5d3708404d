// ==========================================
// ConfigManager 集成测试
// ==========================================
// 测试目标: 验证分配策略的读取、覆写与快照
// ==========================================

mod test_helpers;

use stock_allocator::config::{config_keys, AllocationPolicy, ConfigManager};
use stock_allocator::engine::AllocationOptions;
use test_helpers::{create_test_db, open_test_connection};

#[test]
fn test_policy_defaults_when_unset() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let config_manager = ConfigManager::new(&db_path).expect("Failed to create ConfigManager");

    let policy = config_manager.allocation_policy().unwrap();
    assert_eq!(policy, AllocationPolicy::default());
    assert_eq!(
        config_manager
            .get_global_config_value(config_keys::USE_SUBSTITUTES)
            .unwrap(),
        None
    );
}

#[test]
fn test_policy_overrides() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let conn = open_test_connection(&db_path).expect("Failed to open db");
    let config_manager = ConfigManager::from_connection(conn).unwrap();

    config_manager
        .set_global_config_value(config_keys::USE_SUBSTITUTES, "false")
        .unwrap();
    config_manager
        .set_global_config_value(config_keys::FAIL_IF_INSUFFICIENT, "1")
        .unwrap();
    config_manager
        .set_global_config_value(config_keys::LOG_ENABLED, "off")
        .unwrap();

    let policy = config_manager.allocation_policy().unwrap();
    assert!(!policy.use_substitutes);
    assert!(policy.fail_if_insufficient);
    assert!(!policy.log_enabled);

    let options = AllocationOptions::from(&policy);
    assert!(!options.use_substitutes);
    assert!(options.fail_if_insufficient);
}

#[test]
fn test_set_overwrites_existing_value() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let config_manager = ConfigManager::new(&db_path).unwrap();

    config_manager
        .set_global_config_value(config_keys::USE_SUBSTITUTES, "no")
        .unwrap();
    config_manager
        .set_global_config_value(config_keys::USE_SUBSTITUTES, "yes")
        .unwrap();

    assert_eq!(
        config_manager
            .get_global_config_value(config_keys::USE_SUBSTITUTES)
            .unwrap()
            .as_deref(),
        Some("yes")
    );
    assert!(config_manager.allocation_policy().unwrap().use_substitutes);
}

#[test]
fn test_invalid_value_falls_back_to_default() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let config_manager = ConfigManager::new(&db_path).unwrap();

    config_manager
        .set_global_config_value(config_keys::FAIL_IF_INSUFFICIENT, "sometimes")
        .unwrap();

    assert!(!config_manager.allocation_policy().unwrap().fail_if_insufficient);
}

#[test]
fn test_config_snapshot_is_sorted_json() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let config_manager = ConfigManager::new(&db_path).unwrap();

    assert_eq!(config_manager.get_config_snapshot().unwrap(), "{}");

    config_manager
        .set_global_config_value(config_keys::USE_SUBSTITUTES, "true")
        .unwrap();
    config_manager
        .set_global_config_value(config_keys::LOG_ENABLED, "false")
        .unwrap();

    let snapshot: serde_json::Value =
        serde_json::from_str(&config_manager.get_config_snapshot().unwrap()).unwrap();
    assert_eq!(snapshot[config_keys::USE_SUBSTITUTES], "true");
    assert_eq!(snapshot[config_keys::LOG_ENABLED], "false");
    assert_eq!(snapshot.as_object().unwrap().len(), 2);
}
