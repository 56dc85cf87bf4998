//! Configuration loading from the environment and from TOML files

use std::io::Write;
use std::time::Duration;

use roundkeeper::config::Config;
use roundkeeper::rpc::EndpointConfig;
use roundkeeper::scheduler::OverrunPolicy;
use serial_test::serial;

const VARS: &[&str] = &[
    "ROUNDKEEPER_DATABASE_URL",
    "DATABASE_URL",
    "ROUNDKEEPER_LEDGER_ENDPOINTS",
    "ROUNDKEEPER_LEDGER_MAX_REQUESTS_PER_WINDOW",
    "ROUNDKEEPER_FREEZE_SEC",
    "ROUNDKEEPER_AUTO_CREATE",
    "ROUNDKEEPER_API_KEY",
    "ROUNDKEEPER_SOCIAL_BEARER_TOKEN",
    "ROUNDKEEPER_SOCIAL_USER_ID",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_from_env_reads_overrides() {
    clear_env();
    std::env::set_var("DATABASE_URL", "postgresql://fallback/db");
    std::env::set_var("ROUNDKEEPER_DATABASE_URL", "postgresql://primary/db");
    std::env::set_var("ROUNDKEEPER_LEDGER_MAX_REQUESTS_PER_WINDOW", "25");
    std::env::set_var(
        "ROUNDKEEPER_LEDGER_ENDPOINTS",
        "https://a.example/rpc, https://b.example/rpc|0|50",
    );
    std::env::set_var("ROUNDKEEPER_FREEZE_SEC", "240");
    std::env::set_var("ROUNDKEEPER_AUTO_CREATE", "false");
    std::env::set_var("ROUNDKEEPER_API_KEY", "s3cret");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.database.url, "postgresql://primary/db");
    assert_eq!(
        config.ledger.endpoints,
        vec![
            EndpointConfig::new("https://a.example/rpc", 0, 25),
            EndpointConfig::new("https://b.example/rpc", 0, 50),
        ]
    );
    assert_eq!(config.lifecycle.freeze_sec, 240);
    assert!(!config.lifecycle.auto_create);
    assert_eq!(config.api.api_key.as_deref(), Some("s3cret"));
}

#[test]
#[serial]
fn test_from_env_falls_back_to_database_url() {
    clear_env();
    std::env::set_var("DATABASE_URL", "postgresql://fallback/db");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.database.url, "postgresql://fallback/db");
    assert!(config.ledger.endpoints.is_empty());
    assert!(config.api.api_key.is_none());
}

#[test]
#[serial]
fn test_from_env_rejects_bad_values() {
    clear_env();
    std::env::set_var("ROUNDKEEPER_FREEZE_SEC", "soon");
    let err = Config::from_env().unwrap_err();
    clear_env();
    assert!(err.to_string().contains("ROUNDKEEPER_FREEZE_SEC"));

    std::env::set_var("ROUNDKEEPER_LEDGER_ENDPOINTS", "not a url");
    let result = Config::from_env();
    clear_env();
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_from_env_then_validate() {
    clear_env();
    std::env::set_var("ROUNDKEEPER_DATABASE_URL", "postgresql://localhost/rk");
    std::env::set_var("ROUNDKEEPER_LEDGER_ENDPOINTS", "http://localhost:8545");
    std::env::set_var("ROUNDKEEPER_SOCIAL_BEARER_TOKEN", "token");
    std::env::set_var("ROUNDKEEPER_SOCIAL_USER_ID", "42");

    let config = Config::from_env().unwrap();
    clear_env();
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[database]
url = "postgresql://localhost/roundkeeper"
pool_size = 4

[ledger]
confirmations = 0

[[ledger.endpoints]]
url = "https://primary.example/rpc"
priority = 0
max_requests_per_window = 120

[[ledger.endpoints]]
url = "https://backup.example/rpc"
priority = 1
max_requests_per_window = 30

[social]
bearer_token = "token"
user_id = "42"

[lifecycle]
round_duration_sec = 3600
freeze_sec = 120
safety_sec = 10
automation_check_ms = 20000

[scheduler]
on_overrun = "wait"

[api]
enabled = false
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.database.pool_size, 4);
    assert_eq!(config.ledger.endpoints.len(), 2);
    assert_eq!(config.ledger.endpoints[1].max_requests_per_window, 30);
    assert_eq!(config.ledger.confirmations, 0);
    // Unspecified fields keep their defaults
    assert_eq!(config.ledger.window_secs, 60);
    assert_eq!(config.lifecycle.round_duration_sec, 3_600);
    assert_eq!(config.scheduler.on_overrun, OverrunPolicy::Wait);
    assert!(!config.api.enabled);

    assert!(config.validate().is_ok());
    assert_eq!(config.failover_config().window, Duration::from_secs(60));
    assert_eq!(config.confirmation_policy().confirmations, 0);
}

#[test]
fn test_from_file_reports_parse_errors() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[lifecycle]\nfreeze_sec = \"three minutes\"").unwrap();

    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_from_file_missing() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::from_file(&dir.path().join("absent.toml")).is_err());
}

#[test]
fn test_freeze_longer_than_round_rejected() {
    let mut config = Config::default();
    config.lifecycle.round_duration_sec = 100;
    config.lifecycle.freeze_sec = 100;
    assert!(config.validate_lifecycle().is_err());
}
