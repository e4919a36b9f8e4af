//! Execution database selection at node construction

use livenode::config::ExecDatabaseConfig;
use livenode::domain::TraderId;
use livenode::{build_exec_database, NodeConfig, NodeError, TradingNode};

fn config(exec_database: &str) -> NodeConfig {
    NodeConfig::from_toml_str(&format!(
        r#"
        [trader]
        name = "TESTER"
        id_tag = "001"

        [node]
        handle_signals = false

        {exec_database}
        "#
    ))
    .unwrap()
}

#[test]
fn test_redis_without_host_fails_construction() {
    let err = TradingNode::new(
        Vec::new(),
        config("[exec_database]\ntype = \"redis\"\nport = 6379\n"),
    )
    .err()
    .unwrap();

    assert!(matches!(err, NodeError::MissingConfig(_)));
}

#[test]
fn test_unreachable_redis_fails_cache_load() {
    let err = TradingNode::new(
        Vec::new(),
        config("[exec_database]\ntype = \"redis\"\nhost = \"127.0.0.1\"\nport = 1\n"),
    )
    .err()
    .unwrap();

    assert!(matches!(err, NodeError::Redis(_)));
}

#[test]
fn test_bypass_and_unknown_types_build() {
    for section in [
        "",
        "[exec_database]\ntype = \"bypass\"\n",
        "[exec_database]\ntype = \"in-memory\"\n",
    ] {
        let node = TradingNode::new(Vec::new(), config(section)).unwrap();
        let database = node.exec_engine().unwrap().database();
        assert_eq!(database.kind(), "bypass");
        node.dispose();
    }
}

#[test]
fn test_redis_backend_requires_exact_type() {
    let database = build_exec_database(
        &ExecDatabaseConfig {
            db_type: "Redis".to_string(),
            host: Some("localhost".to_string()),
            port: Some(6379),
        },
        &TraderId::new("TESTER", "001"),
    )
    .unwrap();

    assert_eq!(database.kind(), "bypass");
}

#[test]
fn test_invalid_settings_rejected() {
    let mut config = config("");
    config.node.readiness_poll_interval_ms = 0;

    let err = TradingNode::new(Vec::new(), config).err().unwrap();
    assert!(matches!(err, NodeError::InvalidConfig(ref reason) if reason.contains("readiness")));
}
