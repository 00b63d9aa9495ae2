// Config loading, validation and env override tests

use dockerdash::config::AppConfig;
use std::collections::HashMap;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "127.0.0.1"

[auth]
password = "hunter2"
jwt_secret = "s3cret"
token_ttl_secs = 3600

[docker]
list_timeout_ms = 1500
stop_timeout_secs = 10
restart_timeout_secs = 5

[publishing]
containers_interval_ms = 2000
"#;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.auth.password.as_deref(), Some("hunter2"));
    assert_eq!(config.auth.jwt_secret.as_deref(), Some("s3cret"));
    assert_eq!(config.auth.token_ttl_secs, 3600);
    assert_eq!(config.docker.list_timeout_ms, 1500);
    assert_eq!(config.docker.stop_timeout_secs, 10);
    assert_eq!(config.docker.restart_timeout_secs, 5);
    assert_eq!(config.publishing.containers_interval_ms, 2000);
}

#[test]
fn test_config_defaults_when_sections_omitted() {
    let config = AppConfig::load_from_str("").expect("empty config is valid");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.auth.password, None);
    assert_eq!(config.auth.jwt_secret, None);
    assert_eq!(config.auth.token_ttl_secs, 30 * 24 * 60 * 60);
    assert_eq!(config.docker.list_timeout_ms, 2000);
    assert_eq!(config.docker.stop_timeout_secs, 10);
    assert_eq!(config.docker.restart_timeout_secs, 5);
    assert_eq!(config.publishing.containers_interval_ms, 2000);
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_host() {
    let bad = VALID_CONFIG.replace("host = \"127.0.0.1\"", "host = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.host"));
}

#[test]
fn test_config_validation_rejects_token_ttl_zero() {
    let bad = VALID_CONFIG.replace("token_ttl_secs = 3600", "token_ttl_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("token_ttl_secs"));
}

#[test]
fn test_config_validation_rejects_token_ttl_beyond_ten_years() {
    let bad = VALID_CONFIG.replace("token_ttl_secs = 3600", "token_ttl_secs = 10000000000");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("auth.token_ttl_secs"));

    let edge = VALID_CONFIG.replace(
        "token_ttl_secs = 3600",
        &format!("token_ttl_secs = {}", dockerdash::config::MAX_TOKEN_TTL_SECS),
    );
    assert!(AppConfig::load_from_str(&edge).is_ok());
}

#[test]
fn test_config_validation_rejects_list_timeout_zero() {
    let bad = VALID_CONFIG.replace("list_timeout_ms = 1500", "list_timeout_ms = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("list_timeout_ms"));
}

#[test]
fn test_config_validation_rejects_negative_stop_timeout() {
    let bad = VALID_CONFIG.replace("stop_timeout_secs = 10", "stop_timeout_secs = -1");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("stop_timeout_secs"));
}

#[test]
fn test_config_validation_rejects_negative_restart_timeout() {
    let bad = VALID_CONFIG.replace("restart_timeout_secs = 5", "restart_timeout_secs = -5");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("restart_timeout_secs"));
}

#[test]
fn test_config_validation_rejects_containers_interval_zero() {
    let bad = VALID_CONFIG.replace("containers_interval_ms = 2000", "containers_interval_ms = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("containers_interval_ms"));
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_env_overrides_file_values() {
    let mut config = AppConfig::load_from_str(VALID_CONFIG).expect("valid");
    config
        .apply_env(env(&[
            ("PASSWORD", "from-env"),
            ("JWT_SECRET", "env-secret"),
            ("PORT", "9090"),
            ("HOST", "::"),
        ]))
        .expect("apply_env");
    assert_eq!(config.auth.password.as_deref(), Some("from-env"));
    assert_eq!(config.auth.jwt_secret.as_deref(), Some("env-secret"));
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.server.host, "::");
}

#[test]
fn test_empty_env_password_keeps_file_value() {
    let mut config = AppConfig::load_from_str(VALID_CONFIG).expect("valid");
    config
        .apply_env(env(&[("PASSWORD", ""), ("JWT_SECRET", "")]))
        .expect("apply_env");
    assert_eq!(config.auth.password.as_deref(), Some("hunter2"));
    assert_eq!(config.auth.jwt_secret.as_deref(), Some("s3cret"));
}

#[test]
fn test_env_port_must_be_numeric() {
    let mut config = AppConfig::default();
    let err = config.apply_env(env(&[("PORT", "eighty")])).unwrap_err();
    assert!(err.to_string().contains("PORT"));
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.docker.list_timeout_ms, 1500);
    assert_eq!(config.publishing.containers_interval_ms, 2000);
}
