use nightcap_utils::config::{Config, ConfigError};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_full_config() {
    let mut file = NamedTempFile::new().unwrap();

    let config_str = r#"
        log_level = "debug"

        [reactor]
        command = ["xset", "s", "activate"]
        delay_ms = 750
        background = true

        [logging]
        json = true
        log_to_file = true
        log_dir = "/tmp/nightcap-logs"
    "#;

    file.write_all(config_str.as_bytes()).unwrap();

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(
        config.reactor.command,
        vec!["xset".to_string(), "s".to_string(), "activate".to_string()]
    );
    assert_eq!(config.reactor.delay(), Duration::from_millis(750));
    assert!(config.reactor.background);
    assert!(config.logging.json);
    assert!(config.logging.log_to_file);
    assert_eq!(config.logging.log_dir, "/tmp/nightcap-logs");
}

#[test]
fn test_load_partial_config_uses_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[reactor]\ncommand = [\"slock\"]\n").unwrap();

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.log_level, "info");
    assert_eq!(config.reactor.command, vec!["slock".to_string()]);
    assert_eq!(config.reactor.delay_ms, 500);
    assert!(!config.reactor.background);
    assert!(!config.logging.json);
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let result = Config::load_or_default(Some(&path));
    assert!(matches!(result, Err(ConfigError::FileNotFound(p)) if p == path));
}

#[test]
fn test_malformed_toml_is_reported() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[reactor\ncommand = ").unwrap();

    let result = Config::load(file.path());
    assert!(matches!(result, Err(ConfigError::TomlError(_))));
}

#[test]
fn test_invalid_delay_is_rejected_on_load() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[reactor]\ndelay_ms = 3600000\n").unwrap();

    let result = Config::load(file.path());
    assert!(matches!(
        result,
        Err(ConfigError::InvalidValue { key, .. }) if key == "reactor.delay_ms"
    ));
}

#[test]
fn test_save_and_reload() {
    let file = NamedTempFile::new().unwrap();

    let mut config = Config::default();
    config.reactor.command = vec!["i3lock".to_string(), "-n".to_string()];
    config.reactor.background = true;
    config.save(file.path()).unwrap();

    let loaded = Config::load(file.path()).unwrap();
    assert_eq!(loaded.reactor.command, config.reactor.command);
    assert!(loaded.reactor.background);
    assert_eq!(loaded.reactor.delay_ms, config.reactor.delay_ms);
}
