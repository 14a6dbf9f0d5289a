//! Tests for TOML config loading, creation, and path resolution.

use super::*;
use crate::schema::CaptureQuality;
use std::path::Path;

#[test]
fn load_from_nonexistent_returns_file_not_found() {
    let result = load_from_path(Path::new("/tmp/nonexistent_spinshare_config.toml"));
    let err = result.unwrap_err();
    assert!(matches!(err, spinshare_common::ConfigError::FileNotFound(_)));
}

#[test]
fn load_valid_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[negotiation]
timeout_secs = 45

[capture]
quality = "low"
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.negotiation.timeout_secs, 45);
    assert_eq!(config.capture.quality, CaptureQuality::Low);
    // Defaults preserved
    assert_eq!(config.negotiation.sweep_interval_ms, 1000);
    assert_eq!(config.ice.servers.len(), 2);
}

#[test]
fn load_invalid_toml_returns_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is not valid toml {{{").unwrap();

    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, spinshare_common::ConfigError::ParseError(_)));
}

#[test]
fn out_of_range_values_are_returned_as_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[negotiation]
timeout_secs = 0
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.negotiation.timeout_secs, 0);
}

#[test]
fn create_and_load_default_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spinshare").join("config.toml");

    create_default_config(&path).unwrap();
    assert!(path.exists());

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.relay.listen_port, 3003);
    assert_eq!(config.ice.servers.len(), 2);
}

#[test]
fn default_config_toml_is_valid() {
    use super::template::default_config_toml;
    use crate::schema::SpinshareConfig;

    let config: SpinshareConfig = toml::from_str(&default_config_toml()).unwrap();
    assert!(crate::validation::validate(&config).is_ok());
}

#[test]
fn default_config_path_is_reasonable() {
    // Not every CI sandbox has a config dir.
    if let Ok(path) = default_config_path() {
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("spinshare"));
        assert!(path_str.ends_with("config.toml"));
    }
}
