//! Configuration system tests
//!
//! Tests for config paths and config loading.

use std::path::PathBuf;

use scopemark::config::Config;
use scopemark::config_paths;

// ========================================================================
// Config Paths Tests
// ========================================================================

#[test]
fn test_config_dir_contains_app_name() {
    if let Some(dir) = config_paths::config_dir() {
        assert!(dir.to_string_lossy().contains("scopemark"));
    }
}

#[test]
fn test_config_file_ends_with_yaml() {
    if let Some(path) = config_paths::config_file() {
        assert!(path.to_string_lossy().ends_with("config.yaml"));
    }
}

#[test]
fn test_extensions_and_logs_are_subdirs_of_config() {
    if let Some(config) = config_paths::config_dir() {
        assert!(config_paths::extensions_dir().unwrap().starts_with(&config));
        assert!(config_paths::logs_dir().unwrap().starts_with(&config));
    }
}

// ========================================================================
// Config Loading Tests
// ========================================================================

#[test]
fn test_default_config_is_empty() {
    let config = Config::default();
    assert!(config.extensions_path.is_empty());
    assert!(config.rules.is_empty());
}

#[test]
fn test_load_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(Config::load_from(&dir.path().join("nope.yaml")), Config::default());
}

#[test]
fn test_load_full_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        r#"
extensions_path:
  - /opt/grammars
  - ~/more
rules:
  default:
    comment: Comment
  source.rust:
    keyword: Statement
    keyword.operator: Operator
"#,
    )
    .unwrap();

    let config = Config::load_from(&path);

    assert_eq!(
        config.extensions_path,
        vec![PathBuf::from("/opt/grammars"), PathBuf::from("~/more")]
    );
    let rust = config.rules.resolve("source.rust");
    assert_eq!(rust.group_for_scope("keyword.operator.arrow"), Some("Operator"));
    assert_eq!(rust.group_for_scope("comment.line"), None);
    assert_eq!(
        config.rules.resolve("source.go").group_for_scope("comment.line"),
        Some("Comment")
    );
}

#[test]
fn test_malformed_config_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "extensions_path: {not: [a list").unwrap();

    assert_eq!(Config::load_from(&path), Config::default());
}

#[test]
fn test_empty_config_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "").unwrap();

    assert_eq!(Config::load_from(&path), Config::default());
}

#[test]
fn test_extension_roots_expand_home() {
    let config = Config {
        extensions_path: vec![PathBuf::from("/opt/grammars"), PathBuf::from("~/more")],
        ..Config::default()
    };

    let roots = config.extension_roots();

    assert_eq!(roots[0], PathBuf::from("/opt/grammars"));
    if let Some(home) = dirs::home_dir() {
        assert_eq!(roots[1], home.join("more"));
    }
}

#[test]
fn test_extension_roots_default_to_config_dir() {
    let roots = Config::default().extension_roots();
    assert_eq!(roots, config_paths::extensions_dir().into_iter().collect::<Vec<_>>());
}
