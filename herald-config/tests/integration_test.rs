//! Integration tests for herald-config

use herald_config::*;
use std::io::Write;

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn test_load_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "herald.toml",
        r#"
            default_priority = 2

            [callback]
            start_delay = 0.5
        "#,
    );

    let config = ConfigManager::new();
    config.load_file(&path).unwrap();

    assert_eq!(config.get_int("default_priority").unwrap(), 2);
    assert_eq!(config.get_float("callback.start_delay").unwrap(), 0.5);
}

#[test]
fn test_load_json_then_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "herald.json", r#"{"callback": {"loop_count": 4}}"#);

    let config = ConfigManager::new();
    config.load_file(&path).unwrap();
    config.set("callback.loop_count", 1).unwrap();

    assert_eq!(config.get_int("callback.loop_count").unwrap(), 1);
}

#[test]
fn test_unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "herald.yaml", "a: 1");

    let config = ConfigManager::new();
    assert!(matches!(config.load_file(&path), Err(ConfigError::LoadError(_))));
}

#[test]
fn test_dotenv_file_feeds_prefixed_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "test.env",
        "HERALD_ITEST_DOTENV_ENABLED=true\nHERALD_ITEST_DOTENV_NAME=relay\n",
    );

    let config = ConfigManager::with_prefix("HERALD_ITEST_DOTENV");
    config.load_dotenv(Some(path.as_path())).unwrap();

    assert!(config.get_bool("enabled").unwrap());
    assert_eq!(config.get_string("name").unwrap(), "relay");
}

#[test]
fn test_missing_key() {
    let config = ConfigManager::new();
    assert!(matches!(
        config.get_int("nothing.here"),
        Err(ConfigError::KeyNotFound(_))
    ));
}
