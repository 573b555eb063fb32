use edge_purge::config::PurgeConfig;
use edge_purge::PurgeError;
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
api_token: secret
zone_id: zone123
purge_batch_size: 10
purge_delay_seconds: 1.5
background_purge: false
site_url: "https://www.example.com"
url_dependencies:
  blog.post: ["/blog/", "/"]
trigger:
  enabled: true
  address: "0.0.0.0:9000"
  auth_token: trigger-secret
"#,
    );

    let config = PurgeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.api_token, "secret");
    assert_eq!(config.zone_id, "zone123");
    assert_eq!(config.purge_batch_size, 10);
    assert_eq!(config.purge_delay().as_millis(), 1500);
    assert!(!config.background_purge);
    assert_eq!(
        config.url_dependencies.expand("blog.post", &config.site_url),
        vec!["https://www.example.com/blog/", "https://www.example.com/"]
    );

    let trigger = config.trigger.unwrap();
    assert!(trigger.enabled);
    assert_eq!(trigger.socket_addr().unwrap().port(), 9000);
    assert_eq!(trigger.auth_token.as_deref(), Some("trigger-secret"));
    assert!(trigger.enable_metrics);
}

#[test]
fn test_load_minimal_config() {
    let file = write_config("zone_id: zone123\n");

    let config = PurgeConfig::from_file(file.path()).unwrap();
    // Check defaults are applied
    assert_eq!(config.api_base_url, "https://api.cloudflare.com/client/v4");
    assert!(config.enabled);
    assert_eq!(config.purge_batch_size, 30);
    assert_eq!(config.purge_delay_seconds, 0.0);
    assert!(config.background_purge);
    assert!(config.url_dependencies.is_empty());
    assert_eq!(config.site_url, "");
    assert_eq!(config.request_timeout_seconds, 30);
    assert!(config.trigger.is_none());
}

#[test]
fn test_upper_case_option_names() {
    let file = write_config(
        r#"
API_TOKEN: secret
ZONE_ID: zone123
ENABLED: false
PURGE_BATCH_SIZE: 5
SITE_URL: "https://x.com"
"#,
    );

    let config = PurgeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.api_token, "secret");
    assert!(!config.enabled);
    assert_eq!(config.purge_batch_size, 5);
    assert_eq!(config.site_url, "https://x.com");
}

#[test]
fn test_load_invalid_config() {
    for yaml in [
        "purge_batch_size: 0\n",
        "purge_batch_size: 31\n",
        "purge_delay_seconds: -1\n",
        "api_base_url: ftp://example.com\n",
        "request_timeout_seconds: 0\n",
        "trigger:\n  enabled: true\n  address: not-an-address\n",
    ] {
        let file = write_config(yaml);
        let result = PurgeConfig::from_file(file.path());
        assert!(
            matches!(result, Err(PurgeError::Config(_))),
            "expected config error for {:?}, got {:?}",
            yaml,
            result
        );
    }
}

#[test]
fn test_missing_file() {
    let result = PurgeConfig::from_file("/nonexistent/edge_purge.yaml");
    match result {
        Err(e) => {
            assert!(e.to_string().contains("Failed to read config file"));
            assert_eq!(e.exit_code(), 2);
        }
        Ok(_) => panic!("expected error for missing file"),
    }
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config("zone_id: from-file\npurge_batch_size: 10\n");
    let mut config = PurgeConfig::from_file(file.path()).unwrap();

    let env: HashMap<&str, &str> = HashMap::from([
        ("CLOUDFLARE_ZONE_ID", "from-env"),
        ("CLOUDFLARE_BACKGROUND_PURGE", "false"),
        ("CLOUDFLARE_PURGE_DELAY_SECONDS", "2"),
        ("CLOUDFLARE_URL_DEPENDENCIES", r#"{"shop.product": ["/shop/"]}"#),
    ]);
    config
        .apply_env_from(|name| env.get(name).map(|v| v.to_string()))
        .unwrap();

    assert_eq!(config.zone_id, "from-env");
    assert_eq!(config.purge_batch_size, 10);
    assert!(!config.background_purge);
    assert_eq!(config.purge_delay_seconds, 2.0);
    assert_eq!(config.url_dependencies.paths_for("shop.product"), ["/shop/"]);
}

#[test]
fn test_invalid_environment_values() {
    let mut config = PurgeConfig::default();
    let result = config.apply_env_from(|name| {
        (name == "CLOUDFLARE_ENABLED").then(|| "sometimes".to_string())
    });
    assert!(matches!(result, Err(PurgeError::Config(_))));

    let mut config = PurgeConfig::default();
    let result = config.apply_env_from(|name| {
        (name == "CLOUDFLARE_URL_DEPENDENCIES").then(|| "[not a map]".to_string())
    });
    assert!(matches!(result, Err(PurgeError::Config(_))));
}

#[test]
fn test_require_credentials() {
    let mut config = PurgeConfig::default();
    assert!(config.require_credentials().is_err());

    config.api_token = "secret".to_string();
    assert!(config.require_credentials().is_err());

    config.zone_id = "zone".to_string();
    assert!(config.require_credentials().is_ok());
}
